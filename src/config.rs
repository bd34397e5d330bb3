// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Serial line configuration and its validation.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl TryFrom<char> for Parity {
    type Error = Error;

    fn try_from(c: char) -> Result<Self> {
        match c.to_ascii_uppercase() {
            'N' => Ok(Parity::None),
            'E' => Ok(Parity::Even),
            'O' => Ok(Parity::Odd),
            _ => Err(Error::InvalidArgument(format!(
                "invalid parity '{c}' (N(one), E(ven), O(dd))"
            ))),
        }
    }
}

impl FromStr for Parity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Parity::try_from(c),
            _ => Err(Error::InvalidArgument(format!(
                "invalid parity '{s}' (N(one), E(ven), O(dd))"
            ))),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        };
        write!(f, "{c}")
    }
}

/// Electrical mode of the serial port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerialMode {
    /// Leave the driver's setting alone.
    #[default]
    Unchanged,
    Rs232,
    Rs485,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub device: PathBuf,
    pub baud: u32,
    pub parity: Parity,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub mode: SerialMode,
}

impl SerialConfig {
    /// 9600 8N1 on `device`.
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
            baud: 9600,
            parity: Parity::None,
            data_bits: 8,
            stop_bits: 1,
            mode: SerialMode::Unchanged,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("serial device is empty".into()));
        }
        if self.baud == 0 {
            return Err(Error::InvalidArgument("invalid baud rate".into()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(Error::InvalidArgument(format!(
                "data-bits out of range: {} (5-8)",
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(Error::InvalidArgument(format!(
                "stop-bits out of range: {} (1-2)",
                self.stop_bits
            )));
        }
        Ok(())
    }
}
