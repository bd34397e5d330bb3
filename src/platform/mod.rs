// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

#[cfg(unix)]
pub mod posix;

#[cfg(unix)]
pub mod serial;

#[cfg(unix)]
pub use posix::{PlatformSemaphore, PlatformShm};
