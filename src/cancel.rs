// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cancellation: one atomic flag plus a self-pipe. Setting the flag also
// writes a byte to the pipe, so a receive blocked in poll() wakes up at once.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};

struct Inner {
    flag: AtomicBool,
    wake_rx: OwnedFd,
    wake_tx: OwnedFd,
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Clone)]
pub struct Cancellation {
    inner: Arc<Inner>,
}

impl Cancellation {
    pub fn new() -> Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(Error::os("pipe", io::Error::last_os_error()));
        }
        let (wake_rx, wake_tx) =
            unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        for fd in [&wake_rx, &wake_tx] {
            set_nonblocking_cloexec(fd.as_raw_fd())
                .map_err(|e| Error::os("fcntl on wake pipe", e))?;
        }
        Ok(Self {
            inner: Arc::new(Inner {
                flag: AtomicBool::new(false),
                wake_rx,
                wake_tx,
            }),
        })
    }

    /// Set the flag and wake any poller. Async-signal-safe.
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::Release);
        let byte = 1u8;
        unsafe {
            libc::write(
                self.inner.wake_tx.as_raw_fd(),
                &byte as *const u8 as *const libc::c_void,
                1,
            )
        };
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// Becomes readable once `cancel` has been called.
    pub fn wake_fd(&self) -> BorrowedFd<'_> {
        self.inner.wake_rx.as_fd()
    }
}

fn set_nonblocking_cloexec(fd: libc::c_int) -> io::Result<()> {
    unsafe {
        let fl = libc::fcntl(fd, libc::F_GETFL);
        if fl == -1 || libc::fcntl(fd, libc::F_SETFL, fl | libc::O_NONBLOCK) == -1 {
            return Err(io::Error::last_os_error());
        }
        let fd_flags = libc::fcntl(fd, libc::F_GETFD);
        if fd_flags == -1 || libc::fcntl(fd, libc::F_SETFD, fd_flags | libc::FD_CLOEXEC) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

static SIGNAL_TARGET: OnceLock<Cancellation> = OnceLock::new();

extern "C" fn on_terminate(_: libc::c_int) {
    if let Some(cancel) = SIGNAL_TARGET.get() {
        cancel.cancel();
    }
}

/// Cancel `cancel` on SIGINT, SIGTERM and SIGHUP.
///
/// Only the first installed `Cancellation` is signalled; later calls keep
/// the existing target.
pub fn install_signal_handlers(cancel: &Cancellation) -> Result<()> {
    let _ = SIGNAL_TARGET.set(cancel.clone());
    for sig in [libc::SIGINT, libc::SIGTERM, libc::SIGHUP] {
        let prev = unsafe { libc::signal(sig, on_terminate as *const () as libc::sighandler_t) };
        if prev == libc::SIG_ERR {
            return Err(Error::os(
                "failed to establish signal handler",
                io::Error::last_os_error(),
            ));
        }
    }
    Ok(())
}
