// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Connection: the line the server reads requests from and writes replies to.
// FdConnection works on any pollable descriptor (serial tty, socket, pipe).

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::time::{Duration, Instant};

use crate::cancel::Cancellation;
use crate::config::SerialConfig;
use crate::engine::FrameLength;
use crate::error::{Error, Result};
use crate::platform::serial;
use crate::rtu::frame::MAX_ADU_LENGTH;
use crate::timeout::{self, NativeTimeout};

/// Default wait between two bytes of one frame (0.5 s).
pub const DEFAULT_BYTE_TIMEOUT: NativeTimeout = NativeTimeout { sec: 0, usec: 500_000 };

/// Default time allowed to transmit a reply (0.5 s).
pub const DEFAULT_RESPONSE_TIMEOUT: NativeTimeout = NativeTimeout { sec: 0, usec: 500_000 };

/// The bytes of one inbound request.
pub struct RequestContext {
    buf: [u8; MAX_ADU_LENGTH],
    len: usize,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            buf: [0; MAX_ADU_LENGTH],
            len: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Append `bytes`, truncating at the maximum frame size.
    /// Returns the number of bytes taken.
    pub fn extend(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(MAX_ADU_LENGTH - self.len);
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        n
    }

    /// Writable space up to `target` bytes in total.
    fn spare(&mut self, target: usize) -> &mut [u8] {
        let end = target.clamp(self.len, MAX_ADU_LENGTH);
        &mut self.buf[self.len..end]
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of waiting for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// A frame is in the context.
    Request,
    /// The other side ended the session.
    PeerClosed,
}

/// A request/reply line.
pub trait Connection {
    /// Block until a full frame is in `ctx`, using `framing` to tell when the
    /// frame is complete.
    ///
    /// Failures other than an orderly close are `Error::Transport`.
    fn receive<F>(&mut self, ctx: &mut RequestContext, framing: F) -> Result<Received>
    where
        F: Fn(&[u8]) -> FrameLength;

    fn send(&mut self, frame: &[u8]) -> Result<()>;
}

/// The error a receive returns when woken by cancellation.
pub fn cancelled_error() -> Error {
    Error::Transport(io::Error::new(
        io::ErrorKind::Interrupted,
        "connection closed by cancellation",
    ))
}

enum Readiness {
    Readable,
    Writable,
    TimedOut,
    HangUp,
    Woken,
}

/// A connection over a pollable file descriptor.
pub struct FdConnection {
    fd: OwnedFd,
    cancel: Cancellation,
    byte_timeout: NativeTimeout,
    response_timeout: NativeTimeout,
    closed: bool,
}

impl FdConnection {
    /// Wrap `fd`, switching it to non-blocking mode.
    pub fn from_fd(fd: OwnedFd, cancel: Cancellation) -> Result<Self> {
        let raw = fd.as_raw_fd();
        let fl = unsafe { libc::fcntl(raw, libc::F_GETFL) };
        if fl == -1 || unsafe { libc::fcntl(raw, libc::F_SETFL, fl | libc::O_NONBLOCK) } == -1 {
            return Err(Error::os("fcntl", io::Error::last_os_error()));
        }
        Ok(Self {
            fd,
            cancel,
            byte_timeout: DEFAULT_BYTE_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            closed: false,
        })
    }

    /// Open and configure the serial device described by `config`.
    pub fn open_serial(config: &SerialConfig, cancel: Cancellation) -> Result<Self> {
        config.validate()?;
        let device = config.device.display().to_string();
        let fd = serial::open_serial(config).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidInput | io::ErrorKind::Unsupported => {
                Error::InvalidArgument(format!("{device}: {e}"))
            }
            _ => Error::from_os(&device, e),
        })?;
        log::debug!(
            "opened {device} at {} {}{}{}",
            config.baud,
            config.data_bits,
            config.parity,
            config.stop_bits
        );
        Self::from_fd(fd, cancel)
    }

    /// Longest silence between two bytes of one frame, in seconds.
    pub fn set_byte_timeout(&mut self, seconds: f64) -> Result<()> {
        self.byte_timeout = timeout::checked_to_native(seconds)?;
        Ok(())
    }

    pub fn byte_timeout(&self) -> f64 {
        self.byte_timeout.as_secs_f64()
    }

    /// Longest time a reply may take to leave, in seconds.
    pub fn set_response_timeout(&mut self, seconds: f64) -> Result<()> {
        self.response_timeout = timeout::checked_to_native(seconds)?;
        Ok(())
    }

    pub fn response_timeout(&self) -> f64 {
        self.response_timeout.as_secs_f64()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn wait(&self, events: libc::c_short, timeout: Option<Duration>) -> io::Result<Readiness> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let mut fds = [
                libc::pollfd {
                    fd: self.fd.as_raw_fd(),
                    events,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.cancel.wake_fd().as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            let ms = match deadline {
                None => -1,
                Some(d) => {
                    let left = d.saturating_duration_since(Instant::now());
                    // round up so a short wait is not a busy loop
                    (left.as_micros().div_ceil(1000)).min(i32::MAX as u128) as libc::c_int
                }
            };
            let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, ms) };
            if n == -1 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted && !self.cancel.is_cancelled() {
                    continue;
                }
                return Err(err);
            }
            if fds[1].revents & libc::POLLIN != 0 || self.cancel.is_cancelled() {
                return Ok(Readiness::Woken);
            }
            if n == 0 {
                return Ok(Readiness::TimedOut);
            }
            let rev = fds[0].revents;
            if rev & libc::POLLIN != 0 {
                return Ok(Readiness::Readable);
            }
            if rev & libc::POLLOUT != 0 {
                return Ok(Readiness::Writable);
            }
            if rev & libc::POLLHUP != 0 {
                return Ok(Readiness::HangUp);
            }
            if rev & (libc::POLLERR | libc::POLLNVAL) != 0 {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("poll reported error condition {rev:#x}"),
                ));
            }
        }
    }

    fn peer_closed(&mut self) -> Result<Received> {
        self.closed = true;
        Ok(Received::PeerClosed)
    }
}

impl Connection for FdConnection {
    fn receive<F>(&mut self, ctx: &mut RequestContext, framing: F) -> Result<Received>
    where
        F: Fn(&[u8]) -> FrameLength,
    {
        ctx.clear();
        if self.closed {
            return Ok(Received::PeerClosed);
        }

        loop {
            let hint = framing(ctx.as_bytes());
            let target = match hint {
                FrameLength::NeedAtLeast(n) | FrameLength::Exactly(n) => n.min(MAX_ADU_LENGTH),
                FrameLength::UntilSilence => MAX_ADU_LENGTH,
            };
            let complete = match hint {
                FrameLength::Exactly(_) => ctx.len() >= target,
                _ => ctx.len() >= MAX_ADU_LENGTH,
            };
            if complete {
                return Ok(Received::Request);
            }

            // The first byte may take forever; later ones must follow promptly.
            let timeout = (!ctx.is_empty()).then(|| self.byte_timeout.as_duration());
            match self.wait(libc::POLLIN, timeout).map_err(Error::Transport)? {
                Readiness::Readable => {}
                Readiness::Woken => return Err(cancelled_error()),
                Readiness::HangUp => return self.peer_closed(),
                Readiness::TimedOut => {
                    if hint != FrameLength::UntilSilence {
                        log::debug!("byte timeout after {} bytes of a frame", ctx.len());
                    }
                    return Ok(Received::Request);
                }
                Readiness::Writable => continue,
            }

            let spare = ctx.spare(target);
            if spare.is_empty() {
                return Ok(Received::Request);
            }
            let n = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    spare.as_mut_ptr() as *mut libc::c_void,
                    spare.len(),
                )
            };
            match n {
                0 => return self.peer_closed(),
                n if n > 0 => ctx.len += n as usize,
                _ => {
                    let err = io::Error::last_os_error();
                    match err.kind() {
                        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => continue,
                        io::ErrorKind::ConnectionReset => return self.peer_closed(),
                        _ => return Err(Error::Transport(err)),
                    }
                }
            }
        }
    }

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        let deadline = Instant::now() + self.response_timeout.as_duration();
        let mut sent = 0;
        while sent < frame.len() {
            let n = unsafe {
                libc::write(
                    self.fd.as_raw_fd(),
                    frame[sent..].as_ptr() as *const libc::c_void,
                    frame.len() - sent,
                )
            };
            if n >= 0 {
                sent += n as usize;
                continue;
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    match self.wait(libc::POLLOUT, Some(left)).map_err(Error::Reply)? {
                        Readiness::Writable | Readiness::Readable => {}
                        Readiness::Woken => return Err(Error::Cancelled),
                        Readiness::HangUp => {
                            return Err(Error::Reply(io::ErrorKind::BrokenPipe.into()))
                        }
                        Readiness::TimedOut => {
                            return Err(Error::Reply(io::Error::new(
                                io::ErrorKind::TimedOut,
                                "reply not sent within the response timeout",
                            )))
                        }
                    }
                }
                _ => return Err(Error::Reply(err)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_truncates_at_max_frame() {
        let mut ctx = RequestContext::new();
        assert_eq!(ctx.extend(&[1u8; 200]), 200);
        assert_eq!(ctx.extend(&[2u8; 100]), MAX_ADU_LENGTH - 200);
        assert_eq!(ctx.len(), MAX_ADU_LENGTH);
        ctx.clear();
        assert!(ctx.is_empty());
    }

    #[test]
    fn spare_never_exceeds_buffer() {
        let mut ctx = RequestContext::new();
        ctx.extend(&[0; 10]);
        assert_eq!(ctx.spare(8).len(), 0);
        assert_eq!(ctx.spare(12).len(), 2);
        assert_eq!(ctx.spare(10_000).len(), MAX_ADU_LENGTH - 10);
    }
}
