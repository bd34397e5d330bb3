// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// RTU request framing.

use crate::engine::FrameLength;

/// Largest RTU frame: unit id, 253-byte PDU, CRC.
pub const MAX_ADU_LENGTH: usize = 256;

/// Unit id, function code, CRC.
pub const MIN_ADU_LENGTH: usize = 4;

pub const READ_COILS: u8 = 0x01;
pub const READ_DISCRETE_INPUTS: u8 = 0x02;
pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const READ_INPUT_REGISTERS: u8 = 0x04;
pub const WRITE_SINGLE_COIL: u8 = 0x05;
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
pub const REPORT_SERVER_ID: u8 = 0x11;
pub const MASK_WRITE_REGISTER: u8 = 0x16;
pub const WRITE_READ_MULTIPLE_REGISTERS: u8 = 0x17;

/// Length of a request frame that starts with `partial`.
pub fn request_length(partial: &[u8]) -> FrameLength {
    if partial.len() < 2 {
        return FrameLength::NeedAtLeast(2);
    }
    match partial[1] {
        READ_COILS..=WRITE_SINGLE_REGISTER => FrameLength::Exactly(8),
        WRITE_MULTIPLE_COILS | WRITE_MULTIPLE_REGISTERS => {
            // unit, fc, address, quantity, byte count
            if partial.len() < 7 {
                return FrameLength::NeedAtLeast(7);
            }
            let total = 7 + partial[6] as usize + 2;
            FrameLength::Exactly(total.min(MAX_ADU_LENGTH))
        }
        REPORT_SERVER_ID => FrameLength::Exactly(MIN_ADU_LENGTH),
        // address, AND mask, OR mask
        MASK_WRITE_REGISTER => FrameLength::Exactly(10),
        WRITE_READ_MULTIPLE_REGISTERS => {
            // unit, fc, read address and quantity, write address and quantity, byte count
            if partial.len() < 11 {
                return FrameLength::NeedAtLeast(11);
            }
            let total = 11 + partial[10] as usize + 2;
            FrameLength::Exactly(total.min(MAX_ADU_LENGTH))
        }
        _ => FrameLength::UntilSilence,
    }
}

/// Hex dump in the `[01][03]...` style of the monitor output.
pub fn hex(frame: &[u8]) -> String {
    frame.iter().map(|b| format!("[{b:02X}]")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_length_requests() {
        assert_eq!(request_length(&[]), FrameLength::NeedAtLeast(2));
        assert_eq!(request_length(&[1]), FrameLength::NeedAtLeast(2));
        for fc in 1..=6u8 {
            assert_eq!(request_length(&[1, fc]), FrameLength::Exactly(8));
        }
    }

    #[test]
    fn multiple_write_requests_carry_a_byte_count() {
        assert_eq!(
            request_length(&[1, WRITE_MULTIPLE_REGISTERS, 0, 0]),
            FrameLength::NeedAtLeast(7)
        );
        assert_eq!(
            request_length(&[1, WRITE_MULTIPLE_REGISTERS, 0, 0, 0, 2, 4]),
            FrameLength::Exactly(13)
        );
        assert_eq!(
            request_length(&[1, WRITE_MULTIPLE_COILS, 0, 0, 0, 1, 255]),
            FrameLength::Exactly(MAX_ADU_LENGTH)
        );
    }

    #[test]
    fn register_maintenance_requests() {
        assert_eq!(request_length(&[1, REPORT_SERVER_ID]), FrameLength::Exactly(4));
        assert_eq!(request_length(&[1, MASK_WRITE_REGISTER]), FrameLength::Exactly(10));
        assert_eq!(
            request_length(&[1, WRITE_READ_MULTIPLE_REGISTERS, 0, 0, 0, 1, 0, 0, 0]),
            FrameLength::NeedAtLeast(11)
        );
        assert_eq!(
            request_length(&[1, WRITE_READ_MULTIPLE_REGISTERS, 0, 0, 0, 1, 0, 0, 0, 2, 4]),
            FrameLength::Exactly(17)
        );
        assert_eq!(
            request_length(&[1, WRITE_READ_MULTIPLE_REGISTERS, 0, 0, 0, 1, 0, 0, 0, 0x7F, 0xFE]),
            FrameLength::Exactly(MAX_ADU_LENGTH)
        );
    }

    #[test]
    fn unknown_functions_end_at_silence() {
        assert_eq!(request_length(&[1, 0x2B]), FrameLength::UntilSilence);
    }

    #[test]
    fn hex_dump() {
        assert_eq!(hex(&[0x01, 0xAB]), "[01][AB]");
    }
}
