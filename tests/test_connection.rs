// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// FdConnection framing, timeouts and shutdown.

use std::io::{ErrorKind, Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::{Duration, Instant};

use modbus_rtu_shm::rtu::frame::request_length;
use modbus_rtu_shm::{
    Cancellation, Connection, Error, FdConnection, FrameLength, Received, RequestContext,
    SerialConfig,
};

fn pair() -> (FdConnection, UnixStream, Cancellation) {
    let (line, peer) = UnixStream::pair().expect("socket pair");
    let cancel = Cancellation::new().expect("cancellation");
    let conn = FdConnection::from_fd(OwnedFd::from(line), cancel.clone()).expect("connection");
    (conn, peer, cancel)
}

#[test]
fn default_timeouts() {
    let (mut conn, _peer, _cancel) = pair();
    assert_eq!(conn.byte_timeout(), 0.5);
    assert_eq!(conn.response_timeout(), 0.5);

    conn.set_byte_timeout(1.25).expect("byte");
    conn.set_response_timeout(2.0).expect("response");
    assert_eq!(conn.byte_timeout(), 1.25);
    assert_eq!(conn.response_timeout(), 2.0);

    for bad in [-1.0, f64::NAN, f64::INFINITY] {
        assert!(matches!(conn.set_byte_timeout(bad), Err(Error::InvalidArgument(_))));
    }
    assert_eq!(conn.byte_timeout(), 1.25);
}

#[test]
fn exact_length_frames_are_split() {
    let (mut conn, mut peer, _cancel) = pair();
    let mut ctx = RequestContext::new();

    // two back-to-back 8-byte requests in one write
    let frames = [1, 3, 0, 0, 0, 1, 0x84, 0x0A, 1, 6, 0, 1, 0, 3, 0x98, 0x0B];
    peer.write_all(&frames).unwrap();

    assert_eq!(conn.receive(&mut ctx, request_length).unwrap(), Received::Request);
    assert_eq!(ctx.as_bytes(), &frames[..8]);
    assert_eq!(conn.receive(&mut ctx, request_length).unwrap(), Received::Request);
    assert_eq!(ctx.as_bytes(), &frames[8..]);
}

#[test]
fn variable_length_frame_uses_byte_count() {
    let (mut conn, mut peer, _cancel) = pair();
    let mut ctx = RequestContext::new();

    // write multiple registers: 9 + 4 data bytes
    let frame = [1, 0x10, 0, 0, 0, 2, 4, 0, 1, 0, 2, 0xAA, 0xBB];
    peer.write_all(&frame).unwrap();
    peer.write_all(&[0xFF]).unwrap();

    assert_eq!(conn.receive(&mut ctx, request_length).unwrap(), Received::Request);
    assert_eq!(ctx.as_bytes(), &frame);
}

#[test]
fn unknown_length_ends_at_silence() {
    let (mut conn, mut peer, _cancel) = pair();
    conn.set_byte_timeout(0.02).unwrap();
    let mut ctx = RequestContext::new();

    peer.write_all(&[1, 0x2B, 0x0E, 0x01, 0x00]).unwrap();
    let start = Instant::now();
    let r = conn.receive(&mut ctx, |_: &[u8]| FrameLength::UntilSilence).unwrap();
    assert_eq!(r, Received::Request);
    assert_eq!(ctx.len(), 5);
    assert!(start.elapsed() >= Duration::from_millis(15));
}

#[test]
fn peer_close_is_sticky() {
    let (mut conn, peer, _cancel) = pair();
    let mut ctx = RequestContext::new();
    drop(peer);

    assert_eq!(conn.receive(&mut ctx, request_length).unwrap(), Received::PeerClosed);
    assert!(conn.is_closed());
    assert_eq!(conn.receive(&mut ctx, request_length).unwrap(), Received::PeerClosed);
}

#[test]
fn cancel_interrupts_receive() {
    let (mut conn, _peer, cancel) = pair();
    let mut ctx = RequestContext::new();

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        cancel.cancel();
    });
    match conn.receive(&mut ctx, request_length) {
        Err(Error::Transport(e)) => assert_eq!(e.kind(), ErrorKind::Interrupted),
        other => panic!("unexpected {other:?}"),
    }
    canceller.join().unwrap();
}

#[test]
fn send_delivers_all_bytes() {
    let (mut conn, mut peer, _cancel) = pair();
    let reply: Vec<u8> = (0..=255).collect();
    conn.send(&reply).expect("send");

    let mut got = vec![0u8; reply.len()];
    peer.read_exact(&mut got).unwrap();
    assert_eq!(got, reply);
}

#[test]
fn send_gives_up_when_peer_never_reads() {
    let (mut conn, _peer, _cancel) = pair();
    conn.set_response_timeout(0.05).unwrap();
    // far more than a socket buffer holds
    let big = vec![0u8; 8 << 20];
    match conn.send(&big) {
        Err(Error::Reply(e)) => assert_eq!(e.kind(), ErrorKind::TimedOut),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn open_serial_validates_first() {
    let cancel = Cancellation::new().unwrap();
    let config = SerialConfig {
        data_bits: 9,
        ..SerialConfig::new("/dev/ttyS0")
    };
    assert!(matches!(
        FdConnection::open_serial(&config, cancel.clone()),
        Err(Error::InvalidArgument(_))
    ));

    let missing = SerialConfig::new("/dev/no-such-serial-device");
    assert!(FdConnection::open_serial(&missing, cancel).is_err());
}
