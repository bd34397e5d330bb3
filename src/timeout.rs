// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Timeout adapter: fractional seconds <-> (seconds, microseconds).

use std::time::Duration;

use crate::error::{Error, Result};

/// A timeout in the two-field form used on the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NativeTimeout {
    pub sec: u32,
    pub usec: u32,
}

impl NativeTimeout {
    pub fn as_duration(&self) -> Duration {
        Duration::new(self.sec as u64, self.usec.saturating_mul(1000))
    }

    pub fn as_secs_f64(&self) -> f64 {
        from_native(self.sec, self.usec)
    }
}

/// Split `seconds` into whole seconds and microseconds.
///
/// The fraction is truncated, not rounded. Negative and NaN inputs give 0,
/// values beyond `u32::MAX` seconds saturate.
pub fn to_native(seconds: f64) -> NativeTimeout {
    let sec = seconds as u32;
    let fractional = seconds - sec as f64;
    let usec = ((fractional * 1_000_000.0) as u32).min(999_999);
    NativeTimeout { sec, usec }
}

/// Inverse of [`to_native`].
pub fn from_native(sec: u32, usec: u32) -> f64 {
    sec as f64 + usec as f64 / 1_000_000.0
}

/// [`to_native`] for values coming from configuration: rejects negative and
/// non-finite input instead of clamping it.
pub fn checked_to_native(seconds: f64) -> Result<NativeTimeout> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(Error::InvalidArgument(format!(
            "timeout must be a non-negative number of seconds, got {seconds}"
        )));
    }
    if seconds > u32::MAX as f64 {
        return Err(Error::InvalidArgument(format!("timeout {seconds}s is too large")));
    }
    Ok(to_native(seconds))
}
