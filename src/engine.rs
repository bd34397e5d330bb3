// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Protocol engine seam: turns one request frame into a reply against the
// register banks.

use crate::store::Banks;

/// What the engine decided for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Transmit these bytes.
    Send(Vec<u8>),
    /// Nothing is due: malformed frame, foreign unit id, or broadcast.
    NoReply,
}

/// Interprets request frames and reads or writes the banks to answer them.
///
/// Called with the guard held when one is configured; implementations must
/// not block.
pub trait ProtocolEngine {
    fn reply(&mut self, request: &[u8], banks: &Banks<'_>) -> Reply;

    /// How long the request starting with `partial` is, for framing on the line.
    fn frame_length(&self, partial: &[u8]) -> FrameLength;
}

/// Framing hint returned by [`ProtocolEngine::frame_length`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLength {
    /// Read at least this many bytes before asking again.
    NeedAtLeast(usize),
    /// The frame is exactly this long.
    Exactly(usize),
    /// Length unknown; the frame ends at the next silence.
    UntilSilence,
}
