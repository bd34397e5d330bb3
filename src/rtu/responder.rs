// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// RTU responder: answers read/write requests for one unit id from the
// register banks.

use crate::engine::{FrameLength, ProtocolEngine, Reply};
use crate::error::{Error, Result};
use crate::rtu::crc;
use crate::rtu::frame::{self, *};
use crate::store::{Banks, BitBank, WordBank};

const MAX_READ_BITS: usize = 2000;
const MAX_READ_REGISTERS: usize = 125;
const MAX_WRITE_BITS: usize = 1968;
const MAX_WRITE_REGISTERS: usize = 123;
const MAX_WRITE_READ_REGISTERS: usize = 121;

const RUN_INDICATOR_ON: u8 = 0xFF;
/// Device identification appended to the report server id reply.
pub const SERVER_ID: &str = concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION"));

const BROADCAST: u8 = 0;

/// Modbus exception codes sent back in error replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Exception {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
}

/// Answers requests addressed to `unit_id` (and broadcasts).
#[derive(Debug, Clone)]
pub struct RtuEngine {
    unit_id: u8,
}

impl RtuEngine {
    /// `unit_id` must be a valid RTU address (1-247).
    pub fn new(unit_id: u8) -> Result<Self> {
        if !(1..=247).contains(&unit_id) {
            return Err(Error::InvalidArgument(format!(
                "invalid modbus id {unit_id} (1-247)"
            )));
        }
        Ok(Self { unit_id })
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    fn execute(&self, pdu: &[u8], banks: &Banks<'_>) -> std::result::Result<Vec<u8>, Exception> {
        let (&function, data) = pdu.split_first().ok_or(Exception::IllegalFunction)?;
        match function {
            READ_COILS => read_bits(function, data, banks.coils),
            READ_DISCRETE_INPUTS => read_bits(function, data, banks.discrete_inputs),
            READ_HOLDING_REGISTERS => read_words(function, data, banks.holding_registers),
            READ_INPUT_REGISTERS => read_words(function, data, banks.input_registers),
            WRITE_SINGLE_COIL => {
                let (addr, value) = two_words(data)?;
                let on = match value {
                    0xFF00 => true,
                    0x0000 => false,
                    _ => return Err(Exception::IllegalDataValue),
                };
                if !banks.coils.set(addr as usize, on) {
                    return Err(Exception::IllegalDataAddress);
                }
                Ok(pdu.to_vec())
            }
            WRITE_SINGLE_REGISTER => {
                let (addr, value) = two_words(data)?;
                if !banks.holding_registers.set(addr as usize, value) {
                    return Err(Exception::IllegalDataAddress);
                }
                Ok(pdu.to_vec())
            }
            WRITE_MULTIPLE_COILS => {
                let (addr, qty, payload) = multiple_write(data)?;
                if !(1..=MAX_WRITE_BITS).contains(&qty) || payload.len() != qty.div_ceil(8) {
                    return Err(Exception::IllegalDataValue);
                }
                let values: Vec<bool> =
                    (0..qty).map(|i| payload[i / 8] & (1 << (i % 8)) != 0).collect();
                if !banks.coils.write(addr, &values) {
                    return Err(Exception::IllegalDataAddress);
                }
                Ok(pdu[..5].to_vec())
            }
            WRITE_MULTIPLE_REGISTERS => {
                let (addr, qty, payload) = multiple_write(data)?;
                if !(1..=MAX_WRITE_REGISTERS).contains(&qty) || payload.len() != qty * 2 {
                    return Err(Exception::IllegalDataValue);
                }
                if !banks.holding_registers.write(addr, &words(payload)) {
                    return Err(Exception::IllegalDataAddress);
                }
                Ok(pdu[..5].to_vec())
            }
            REPORT_SERVER_ID => {
                if !data.is_empty() {
                    return Err(Exception::IllegalDataValue);
                }
                let mut body = vec![function, 0, self.unit_id, RUN_INDICATOR_ON];
                body.extend_from_slice(SERVER_ID.as_bytes());
                body[1] = (body.len() - 2) as u8;
                Ok(body)
            }
            MASK_WRITE_REGISTER => {
                if data.len() != 6 {
                    return Err(Exception::IllegalDataValue);
                }
                let (addr, and_mask) = two_words(&data[..4])?;
                let or_mask = u16::from_be_bytes([data[4], data[5]]);
                let bank = banks.holding_registers;
                let current = bank.get(addr as usize).ok_or(Exception::IllegalDataAddress)?;
                bank.set(addr as usize, (current & and_mask) | (or_mask & !and_mask));
                Ok(pdu.to_vec())
            }
            WRITE_READ_MULTIPLE_REGISTERS => {
                if data.len() < 9 {
                    return Err(Exception::IllegalDataValue);
                }
                let (read_addr, read_qty) = two_words(&data[..4])?;
                let (read_addr, read_qty) = (read_addr as usize, read_qty as usize);
                let (write_addr, write_qty, payload) = multiple_write(&data[4..])?;
                if !(1..=MAX_READ_REGISTERS).contains(&read_qty)
                    || !(1..=MAX_WRITE_READ_REGISTERS).contains(&write_qty)
                    || payload.len() != write_qty * 2
                {
                    return Err(Exception::IllegalDataValue);
                }
                let bank = banks.holding_registers;
                if !bank.contains(read_addr, read_qty) || !bank.contains(write_addr, write_qty) {
                    return Err(Exception::IllegalDataAddress);
                }
                // the write happens before the read
                bank.write(write_addr, &words(payload));
                read_words(function, &data[..4], bank)
            }
            _ => Err(Exception::IllegalFunction),
        }
    }
}

impl ProtocolEngine for RtuEngine {
    fn reply(&mut self, request: &[u8], banks: &Banks<'_>) -> Reply {
        if request.len() < MIN_ADU_LENGTH {
            log::debug!("discarding short frame {}", frame::hex(request));
            return Reply::NoReply;
        }
        if !crc::check_crc(request) {
            log::debug!("discarding frame with bad CRC {}", frame::hex(request));
            return Reply::NoReply;
        }
        let unit = request[0];
        if unit != self.unit_id && unit != BROADCAST {
            return Reply::NoReply;
        }

        let pdu = &request[1..request.len() - 2];
        let function = pdu[0];
        let response = self.execute(pdu, banks);
        if unit == BROADCAST {
            return Reply::NoReply;
        }

        let mut adu = Vec::with_capacity(MAX_ADU_LENGTH);
        adu.push(unit);
        match response {
            Ok(body) => adu.extend_from_slice(&body),
            Err(exception) => {
                log::debug!("function {function:#04x}: {exception:?}");
                adu.push(function | 0x80);
                adu.push(exception as u8);
            }
        }
        crc::append_crc(&mut adu);
        Reply::Send(adu)
    }

    fn frame_length(&self, partial: &[u8]) -> FrameLength {
        frame::request_length(partial)
    }
}

fn two_words(data: &[u8]) -> std::result::Result<(u16, u16), Exception> {
    if data.len() != 4 {
        return Err(Exception::IllegalDataValue);
    }
    Ok((
        u16::from_be_bytes([data[0], data[1]]),
        u16::from_be_bytes([data[2], data[3]]),
    ))
}

fn words(payload: &[u8]) -> Vec<u16> {
    payload
        .chunks_exact(2)
        .map(|w| u16::from_be_bytes([w[0], w[1]]))
        .collect()
}

/// Address, quantity and payload of a 0x0F / 0x10 request, or the write
/// half of a 0x17 request.
fn multiple_write(data: &[u8]) -> std::result::Result<(usize, usize, &[u8]), Exception> {
    if data.len() < 5 {
        return Err(Exception::IllegalDataValue);
    }
    let (addr, qty) = two_words(&data[..4])?;
    let count = data[4] as usize;
    let payload = &data[5..];
    if payload.len() != count {
        return Err(Exception::IllegalDataValue);
    }
    Ok((addr as usize, qty as usize, payload))
}

fn read_bits(function: u8, data: &[u8], bank: BitBank<'_>) -> std::result::Result<Vec<u8>, Exception> {
    let (addr, qty) = two_words(data)?;
    let (addr, qty) = (addr as usize, qty as usize);
    if !(1..=MAX_READ_BITS).contains(&qty) {
        return Err(Exception::IllegalDataValue);
    }
    let bits = bank.read(addr, qty).ok_or(Exception::IllegalDataAddress)?;
    let mut packed = vec![0u8; qty.div_ceil(8)];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    let mut body = Vec::with_capacity(2 + packed.len());
    body.push(function);
    body.push(packed.len() as u8);
    body.extend_from_slice(&packed);
    Ok(body)
}

fn read_words(function: u8, data: &[u8], bank: WordBank<'_>) -> std::result::Result<Vec<u8>, Exception> {
    let (addr, qty) = two_words(data)?;
    let (addr, qty) = (addr as usize, qty as usize);
    if !(1..=MAX_READ_REGISTERS).contains(&qty) {
        return Err(Exception::IllegalDataValue);
    }
    let words = bank.read(addr, qty).ok_or(Exception::IllegalDataAddress)?;
    let mut body = Vec::with_capacity(2 + 2 * qty);
    body.push(function);
    body.push((2 * qty) as u8);
    for w in words {
        body.extend_from_slice(&w.to_be_bytes());
    }
    Ok(body)
}

/// Build a request frame for `unit` with `pdu`, CRC appended.
pub fn build_request(unit: u8, pdu: &[u8]) -> Vec<u8> {
    let mut adu = Vec::with_capacity(pdu.len() + 3);
    adu.push(unit);
    adu.extend_from_slice(pdu);
    crc::append_crc(&mut adu);
    adu
}
