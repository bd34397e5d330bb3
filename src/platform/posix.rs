// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX implementation of named shared memory and named semaphores.
// Segments carry no in-band header: other processes map them as plain
// arrays, so the layout is exactly the user-visible bytes.

use std::ffi::CString;
use std::io;
use std::ptr;
use std::time::{Duration, Instant};

fn c_name(posix_name: &str) -> io::Result<CString> {
    CString::new(posix_name.as_bytes()).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

// ---------------------------------------------------------------------------
// PlatformShm: POSIX shared memory
// ---------------------------------------------------------------------------

/// Open mode flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmMode {
    /// `O_CREAT | O_EXCL`, sized with `ftruncate`.
    Create,
    /// Existing object; its size must cover the requested size.
    Open,
}

pub struct PlatformShm {
    mem: *mut u8,
    size: usize,
    name: String,
}

// Safety: the mapping is shared with other processes anyway; element access goes
// through volatile reads and writes.
unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

impl PlatformShm {
    /// Create or open the segment `posix_name` (leading '/') of `size` bytes.
    ///
    /// `perms` is applied with `fchmod` on creation so that the process
    /// umask does not narrow the access granted to cooperating processes.
    /// A zero `size` creates or opens the object but maps nothing.
    pub fn acquire(posix_name: &str, size: usize, mode: ShmMode, perms: u32) -> io::Result<Self> {
        let c_name = c_name(posix_name)?;
        let perms = perms as libc::mode_t;

        let flags = match mode {
            ShmMode::Create => libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
            ShmMode::Open => libc::O_RDWR,
        };
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), flags, perms as libc::c_uint) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        let prepared = match mode {
            ShmMode::Create => Self::prepare_created(fd, size, perms),
            ShmMode::Open => Self::check_opened(fd, size),
        };
        if let Err(err) = prepared {
            unsafe { libc::close(fd) };
            if mode == ShmMode::Create {
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
            }
            return Err(err);
        }

        let mapped = Self::map(fd, size, posix_name);
        unsafe { libc::close(fd) };
        if mapped.is_err() && mode == ShmMode::Create {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
        mapped
    }

    fn prepare_created(fd: libc::c_int, size: usize, perms: libc::mode_t) -> io::Result<()> {
        if unsafe { libc::fchmod(fd, perms) } != 0 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn check_opened(fd: libc::c_int, size: usize) -> io::Result<()> {
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut st) } != 0 {
            return Err(io::Error::last_os_error());
        }
        if (st.st_size as u64) < size as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("segment holds {} bytes, {} requested", st.st_size, size),
            ));
        }
        Ok(())
    }

    fn map(fd: libc::c_int, size: usize, posix_name: &str) -> io::Result<Self> {
        let mem = if size == 0 {
            ptr::null_mut()
        } else {
            let mem = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    size,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    fd,
                    0,
                )
            };
            if mem == libc::MAP_FAILED {
                return Err(io::Error::last_os_error());
            }
            mem as *mut u8
        };
        Ok(Self {
            mem,
            size,
            name: posix_name.to_string(),
        })
    }

    /// Start of the mapping; null for zero-sized segments.
    pub fn as_ptr(&self) -> *const u8 {
        self.mem
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// POSIX name (with leading '/').
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the name. Existing mappings stay valid until unmapped.
    pub fn unlink(&self) -> io::Result<()> {
        Self::unlink_by_name(&self.name)
    }

    pub fn unlink_by_name(posix_name: &str) -> io::Result<()> {
        let c_name = c_name(posix_name)?;
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        if !self.mem.is_null() {
            unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) };
        }
    }
}

// ---------------------------------------------------------------------------
// PlatformSemaphore: POSIX named semaphore (sem_open)
// ---------------------------------------------------------------------------

pub struct PlatformSemaphore {
    sem: *mut libc::sem_t,
    name: String,
}

// Safety: sem_t operations are thread-safe; the handle is only closed on drop.
unsafe impl Send for PlatformSemaphore {}
unsafe impl Sync for PlatformSemaphore {}

impl PlatformSemaphore {
    /// Create `posix_name` exclusively with the initial `value`.
    pub fn create(posix_name: &str, value: u32, perms: u32) -> io::Result<Self> {
        let c_name = c_name(posix_name)?;
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                perms as libc::c_uint,
                value as libc::c_uint,
            )
        };
        Self::finish(sem, posix_name)
    }

    /// Open an existing semaphore.
    pub fn open(posix_name: &str) -> io::Result<Self> {
        let c_name = c_name(posix_name)?;
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        Self::finish(sem, posix_name)
    }

    fn finish(sem: *mut libc::sem_t, posix_name: &str) -> io::Result<Self> {
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            sem,
            name: posix_name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decrement the semaphore, waiting at most `timeout`.
    /// Returns `Ok(true)` if decremented, `Ok(false)` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        #[cfg(target_os = "macos")]
        {
            // No sem_timedwait on macOS: poll sem_trywait until the deadline.
            let deadline = Instant::now() + timeout;
            loop {
                if unsafe { libc::sem_trywait(self.sem) } == 0 {
                    return Ok(true);
                }
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EAGAIN) | Some(libc::EINTR) => {}
                    _ => return Err(err),
                }
                if Instant::now() >= deadline {
                    return Ok(false);
                }
                std::thread::sleep(Duration::from_micros(500));
            }
        }
        #[cfg(not(target_os = "macos"))]
        {
            let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
            unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
            let ns_total = ts.tv_nsec as u64 + timeout.subsec_nanos() as u64;
            ts.tv_sec += timeout.as_secs() as libc::time_t
                + (ns_total / 1_000_000_000) as libc::time_t;
            ts.tv_nsec = (ns_total % 1_000_000_000) as libc::c_long;
            let started = Instant::now();
            loop {
                if unsafe { libc::sem_timedwait(self.sem, &ts) } == 0 {
                    return Ok(true);
                }
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::ETIMEDOUT) => return Ok(false),
                    Some(libc::EINTR) if started.elapsed() < timeout => continue,
                    Some(libc::EINTR) => return Ok(false),
                    _ => return Err(err),
                }
            }
        }
    }

    /// Decrement without blocking. Returns `Ok(false)` if the count is zero.
    pub fn try_wait(&self) -> io::Result<bool> {
        if unsafe { libc::sem_trywait(self.sem) } == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) => Ok(false),
            _ => Err(err),
        }
    }

    pub fn post(&self) -> io::Result<()> {
        if unsafe { libc::sem_post(self.sem) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn unlink_by_name(posix_name: &str) -> io::Result<()> {
        let c_name = c_name(posix_name)?;
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for PlatformSemaphore {
    fn drop(&mut self) {
        unsafe { libc::sem_close(self.sem) };
    }
}
