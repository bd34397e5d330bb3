// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named shared memory handle.
// Delegates to platform::PlatformShm.

use crate::error::{Error, Result};
use crate::platform::posix::ShmMode;
use crate::platform::PlatformShm;
use crate::shm_name;

/// Open mode for shared memory segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmOpenMode {
    /// Create exclusively; fail with `AlreadyExists` if the name is taken.
    Create,
    /// Create, unlinking any segment that already holds the name.
    CreateForce,
    /// Open an existing segment.
    Open,
}

/// A named, inter-process shared memory segment.
///
/// Dropping the handle unmaps the segment but never removes the name;
/// removal is an explicit [`ShmHandle::unlink`].
pub struct ShmHandle {
    inner: PlatformShm,
    name: String,
}

impl ShmHandle {
    /// Acquire the segment `name` of `size` bytes.
    ///
    /// `perms` only matters when the segment is created.
    pub fn acquire(name: &str, size: usize, mode: ShmOpenMode, perms: u32) -> Result<Self> {
        let posix = shm_name::posix_name(name)?;
        let inner = match mode {
            ShmOpenMode::Create => PlatformShm::acquire(&posix, size, ShmMode::Create, perms),
            ShmOpenMode::Open => PlatformShm::acquire(&posix, size, ShmMode::Open, perms),
            ShmOpenMode::CreateForce => {
                match PlatformShm::acquire(&posix, size, ShmMode::Create, perms) {
                    Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                        log::warn!("shared memory '{name}' already exists, reclaiming it");
                        let _ = PlatformShm::unlink_by_name(&posix);
                        PlatformShm::acquire(&posix, size, ShmMode::Create, perms)
                    }
                    other => other,
                }
            }
        }
        .map_err(|e| Error::from_os(name, e))?;

        Ok(Self {
            inner,
            name: name.to_string(),
        })
    }

    /// Start of the mapping; null for zero-sized segments.
    pub fn as_ptr(&self) -> *const u8 {
        self.inner.as_ptr()
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.inner.as_mut_ptr()
    }

    /// Mapped size in bytes.
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    /// The name the handle was acquired with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The platform name (with leading '/').
    pub fn posix_name(&self) -> &str {
        self.inner.name()
    }

    /// Remove the name; the mapping stays valid until the handle drops.
    pub fn unlink(&self) -> Result<()> {
        self.inner
            .unlink()
            .map_err(|e| Error::os(format!("shm_unlink '{}'", self.name), e))
    }

    /// Remove a named segment without an open handle. Missing names are ignored.
    pub fn unlink_by_name(name: &str) {
        if let Ok(posix) = shm_name::posix_name(name) {
            let _ = PlatformShm::unlink_by_name(&posix);
        }
    }
}
