// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Naming of the POSIX objects this crate creates: one shm segment per
// register bank and one named semaphore for the access guard.

use crate::error::{Error, Result};

/// Maximum length of a POSIX object name including the leading '/'.
/// `PSHMNAMLEN` on macOS, `NAME_MAX` on Linux.
#[cfg(target_os = "macos")]
pub const NAME_MAX: usize = 31;

#[cfg(not(target_os = "macos"))]
pub const NAME_MAX: usize = 255;

/// FNV-1a 64-bit hash.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Produce a POSIX object name (leading '/') for `name`.
///
/// Names longer than [`NAME_MAX`] are shortened to
/// `/<head>_<16 hex digits of FNV-1a>` so that distinct long prefixes stay
/// distinct. Embedded '/' and NUL are rejected.
pub fn posix_name(name: &str) -> Result<String> {
    let body = name.strip_prefix('/').unwrap_or(name);
    if body.is_empty() {
        return Err(Error::InvalidArgument("object name is empty".into()));
    }
    if body.contains('/') || body.contains('\0') {
        return Err(Error::InvalidArgument(format!(
            "object name '{name}' must not contain '/' or NUL"
        )));
    }

    let full = format!("/{body}");
    if full.len() <= NAME_MAX {
        return Ok(full);
    }

    // '/' + head + '_' + 16 hex digits
    let head_len = NAME_MAX.saturating_sub(1 + 1 + 16);
    let mut head_end = head_len.min(body.len());
    while !body.is_char_boundary(head_end) {
        head_end -= 1;
    }
    Ok(format!(
        "/{}_{:016x}",
        &body[..head_end],
        fnv1a_64(full.as_bytes())
    ))
}

/// Name of the segment holding one register bank: `<prefix><suffix>`.
pub fn bank_name(prefix: &str, suffix: &str) -> String {
    format!("{prefix}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_known_value() {
        assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn posix_name_prepends_slash() {
        assert_eq!(posix_name("modbus_DO").unwrap(), "/modbus_DO");
        assert_eq!(posix_name("/modbus_AI").unwrap(), "/modbus_AI");
    }

    #[test]
    fn posix_name_rejects_bad_names() {
        assert!(posix_name("").is_err());
        assert!(posix_name("/").is_err());
        assert!(posix_name("a/b").is_err());
    }

    #[test]
    fn long_names_are_shortened_and_distinct() {
        let a = posix_name(&"x".repeat(400)).unwrap();
        let b = posix_name(&format!("{}y", "x".repeat(400))).unwrap();
        assert!(a.len() <= NAME_MAX);
        assert!(b.len() <= NAME_MAX);
        assert_ne!(a, b);
    }

    #[test]
    fn bank_name_appends_suffix() {
        assert_eq!(bank_name("modbus_", "AO"), "modbus_AO");
    }
}
