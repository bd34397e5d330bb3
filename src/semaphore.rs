// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named inter-process semaphore.
// Delegates to platform::PlatformSemaphore.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::platform::PlatformSemaphore;
use crate::shm_name;

/// Permission bits for semaphores this crate creates.
pub const SEMAPHORE_PERMISSIONS: u32 = 0o666;

/// A named POSIX semaphore.
///
/// A handle that created the semaphore removes the name when dropped;
/// handles that merely opened it leave it in place.
pub struct IpcSemaphore {
    inner: PlatformSemaphore,
    name: String,
    creator: bool,
}

impl IpcSemaphore {
    /// Create `name` with the initial count `value`.
    ///
    /// Fails with `AlreadyExists` if the name is taken, unless `force` is set,
    /// in which case the old semaphore is unlinked first.
    pub fn create(name: &str, value: u32, force: bool) -> Result<Self> {
        let posix = shm_name::posix_name(name)?;
        let inner = match PlatformSemaphore::create(&posix, value, SEMAPHORE_PERMISSIONS) {
            Err(e) if force && e.raw_os_error() == Some(libc::EEXIST) => {
                log::warn!("semaphore '{name}' already exists, reclaiming it");
                let _ = PlatformSemaphore::unlink_by_name(&posix);
                PlatformSemaphore::create(&posix, value, SEMAPHORE_PERMISSIONS)
            }
            other => other,
        }
        .map_err(|e| Error::from_os(name, e))?;

        Ok(Self {
            inner,
            name: name.to_string(),
            creator: true,
        })
    }

    /// Open an existing semaphore created by another process.
    pub fn open(name: &str) -> Result<Self> {
        let posix = shm_name::posix_name(name)?;
        let inner = PlatformSemaphore::open(&posix).map_err(|e| Error::from_os(name, e))?;
        Ok(Self {
            inner,
            name: name.to_string(),
            creator: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handle created the semaphore.
    pub fn is_creator(&self) -> bool {
        self.creator
    }

    /// Returns `Ok(true)` if the count was decremented within `timeout`.
    pub fn wait(&self, timeout: Duration) -> Result<bool> {
        self.inner
            .wait_timeout(timeout)
            .map_err(|e| Error::os(format!("sem_timedwait '{}'", self.name), e))
    }

    pub fn try_wait(&self) -> Result<bool> {
        self.inner
            .try_wait()
            .map_err(|e| Error::os(format!("sem_trywait '{}'", self.name), e))
    }

    pub fn post(&self) -> Result<()> {
        self.inner
            .post()
            .map_err(|e| Error::os(format!("sem_post '{}'", self.name), e))
    }

    /// Remove a named semaphore without an open handle. Missing names are ignored.
    pub fn clear_storage(name: &str) {
        if let Ok(posix) = shm_name::posix_name(name) {
            let _ = PlatformSemaphore::unlink_by_name(&posix);
        }
    }
}

impl Drop for IpcSemaphore {
    fn drop(&mut self) {
        if self.creator {
            let _ = PlatformSemaphore::unlink_by_name(self.inner.name());
        }
    }
}
