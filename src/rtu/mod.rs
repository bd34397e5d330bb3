// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Modbus RTU framing and a register-bank responder.

pub mod crc;
pub mod frame;

mod responder;
pub use responder::{build_request, Exception, RtuEngine};
