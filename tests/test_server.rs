// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Request server over a socket pair, with real shm banks and semaphores.

use std::io::{Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use modbus_rtu_shm::rtu::build_request;
use modbus_rtu_shm::rtu::crc::check_crc;
use modbus_rtu_shm::store::{BankSizes, DEFAULT_PERMISSIONS};
use modbus_rtu_shm::{
    AccessGuard, Acquisition, BankKind, Banks, Cancellation, Error, FdConnection, FrameLength,
    GuardPolicy, IpcSemaphore, ProtocolEngine, RegisterStore, Reply, RequestServer, Role,
    RtuEngine, ServerState, ShmHandle, Shutdown, Step,
};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

const UNIT: u8 = 1;

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_srv_{}_{n}", std::process::id())
}

type Server = RequestServer<FdConnection, RtuEngine>;

/// Banks plus a line whose other end is returned as the client stream.
fn parts(prefix: &str) -> (RegisterStore, FdConnection, UnixStream, Cancellation) {
    let prefix = format!("{}_", unique_name(prefix));
    for kind in BankKind::ALL {
        ShmHandle::unlink_by_name(&format!("{prefix}{}", kind.suffix()));
    }
    let store = RegisterStore::create(BankSizes::new(10, 10, 10, 10), &prefix, false, DEFAULT_PERMISSIONS)
        .expect("store");

    let (line, client) = UnixStream::pair().expect("socket pair");
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    let cancel = Cancellation::new().expect("cancellation");
    let connection = FdConnection::from_fd(OwnedFd::from(line), cancel.clone()).expect("connection");
    (store, connection, client, cancel)
}

/// A server on one end of a socket pair and a client stream on the other.
fn setup(prefix: &str) -> (Server, UnixStream, Cancellation) {
    let (store, connection, client, cancel) = parts(prefix);
    let engine = RtuEngine::new(UNIT).expect("engine");
    let server = RequestServer::new(Role::Slave, connection, engine, store, cancel.clone());
    (server, client, cancel)
}

/// Answers like the RTU engine, but cancels the server while answering.
struct CancellingEngine {
    inner: RtuEngine,
    cancel: Cancellation,
}

impl ProtocolEngine for CancellingEngine {
    fn reply(&mut self, request: &[u8], banks: &Banks<'_>) -> Reply {
        self.cancel.cancel();
        self.inner.reply(request, banks)
    }

    fn frame_length(&self, partial: &[u8]) -> FrameLength {
        self.inner.frame_length(partial)
    }
}

fn fast_policy(max: u32) -> GuardPolicy {
    GuardPolicy {
        timeout: Duration::from_millis(1),
        max,
        ..GuardPolicy::default()
    }
}

/// Read one reply of `len` bytes and return its PDU.
fn read_reply(client: &mut UnixStream, len: usize) -> Vec<u8> {
    let mut adu = vec![0u8; len];
    client.read_exact(&mut adu).expect("reply");
    assert!(check_crc(&adu), "bad crc in {adu:02X?}");
    assert_eq!(adu[0], UNIT);
    adu[1..len - 2].to_vec()
}

#[test]
fn write_then_read_over_the_line() {
    let (mut server, client, _cancel) = setup("rw");

    let peer = thread::spawn(move || {
        let mut client = client;
        // write AO[3] = 0x1234
        client
            .write_all(&build_request(UNIT, &[0x06, 0x00, 0x03, 0x12, 0x34]))
            .unwrap();
        let echo = read_reply(&mut client, 8);
        // read AO[2..4]
        client
            .write_all(&build_request(UNIT, &[0x03, 0x00, 0x02, 0x00, 0x02]))
            .unwrap();
        let read = read_reply(&mut client, 9);
        // write DO[0..3] via multiple coils
        client
            .write_all(&build_request(UNIT, &[0x0F, 0x00, 0x00, 0x00, 0x03, 0x01, 0b101]))
            .unwrap();
        let coils = read_reply(&mut client, 8);
        (echo, read, coils)
    });

    assert_eq!(server.run().expect("run"), Shutdown::PeerClosed);
    assert_eq!(server.state(), ServerState::Closed);

    let (echo, read, coils) = peer.join().unwrap();
    assert_eq!(echo, [0x06, 0x00, 0x03, 0x12, 0x34]);
    assert_eq!(read, [0x03, 0x04, 0x00, 0x00, 0x12, 0x34]);
    assert_eq!(coils, [0x0F, 0x00, 0x00, 0x00, 0x03]);

    let banks = server.store().banks();
    assert_eq!(banks.holding_registers.get(3), Some(0x1234));
    assert_eq!(banks.coils.read(0, 3), Some(vec![true, false, true]));
}

#[test]
fn values_written_by_other_processes_are_served() {
    let (mut server, mut client, _cancel) = setup("external");
    let ai = server.store().name(BankKind::AnalogInput).to_string();

    // another process maps the AI bank and publishes a value
    let external = ShmHandle::acquire(&ai, 20, modbus_rtu_shm::ShmOpenMode::Open, 0).expect("open");
    unsafe { *(external.as_mut_ptr() as *mut u16).add(5) = 4242 };

    client
        .write_all(&build_request(UNIT, &[0x04, 0x00, 0x05, 0x00, 0x01]))
        .unwrap();
    assert_eq!(server.serve_one().expect("serve"), Step::Continue);
    let [hi, lo] = 4242u16.to_be_bytes();
    assert_eq!(read_reply(&mut client, 7), [0x04, 0x02, hi, lo]);
}

#[test]
fn malformed_and_foreign_frames_get_no_reply() {
    let (mut server, mut client, _cancel) = setup("noreply");

    let mut corrupt = build_request(UNIT, &[0x03, 0x00, 0x00, 0x00, 0x01]);
    corrupt[7] ^= 0xFF;
    client.write_all(&corrupt).unwrap();
    assert_eq!(server.serve_one().expect("corrupt"), Step::Continue);

    client
        .write_all(&build_request(9, &[0x06, 0x00, 0x01, 0x00, 0x07]))
        .unwrap();
    assert_eq!(server.serve_one().expect("foreign"), Step::Continue);
    assert_eq!(server.store().banks().holding_registers.get(1), Some(0));

    // broadcast writes are executed but not answered
    client
        .write_all(&build_request(0, &[0x06, 0x00, 0x02, 0x00, 0x05]))
        .unwrap();
    assert_eq!(server.serve_one().expect("broadcast"), Step::Continue);
    assert_eq!(server.store().banks().holding_registers.get(2), Some(5));

    // the first reply on the line belongs to this request
    client
        .write_all(&build_request(UNIT, &[0x03, 0x00, 0x02, 0x00, 0x01]))
        .unwrap();
    assert_eq!(server.serve_one().expect("valid"), Step::Continue);
    assert_eq!(read_reply(&mut client, 7), [0x03, 0x02, 0x00, 0x05]);
    assert_eq!(server.state(), ServerState::Idle);
}

#[test]
fn exception_replies() {
    let (mut server, mut client, _cancel) = setup("exception");

    client
        .write_all(&build_request(UNIT, &[0x03, 0x00, 0x09, 0x00, 0x02]))
        .unwrap();
    server.serve_one().expect("serve");
    assert_eq!(read_reply(&mut client, 5), [0x83, 0x02]);
}

#[test]
fn truncated_frame_is_dropped_after_byte_timeout() {
    let (mut server, mut client, _cancel) = setup("truncated");
    server.connection_mut().set_byte_timeout(0.05).expect("byte timeout");

    client.write_all(&[UNIT, 0x03, 0x00]).unwrap();
    assert_eq!(server.serve_one().expect("truncated"), Step::Continue);
    assert_eq!(server.last_request(), [UNIT, 0x03, 0x00]);

    client
        .write_all(&build_request(UNIT, &[0x03, 0x00, 0x00, 0x00, 0x01]))
        .unwrap();
    server.serve_one().expect("valid");
    assert_eq!(read_reply(&mut client, 7), [0x03, 0x02, 0x00, 0x00]);
}

#[test]
fn guarded_requests_release_the_semaphore() {
    let (mut server, mut client, _cancel) = setup("guarded");
    let name = unique_name("guard_ok");
    IpcSemaphore::clear_storage(&name);
    server.enable_guard(&name, false).expect("guard");

    for _ in 0..3 {
        client
            .write_all(&build_request(UNIT, &[0x06, 0x00, 0x00, 0x00, 0x01]))
            .unwrap();
        server.serve_one().expect("serve");
        read_reply(&mut client, 8);
    }
    let guard = server.guard().expect("guard enabled");
    assert!(!guard.is_held());
    assert_eq!(guard.health(), 0);

    let mut other = AccessGuard::join(&name, fast_policy(1000)).expect("join");
    assert_eq!(other.try_acquire().expect("free"), Acquisition::Acquired);
}

#[test]
fn guard_can_only_be_enabled_once() {
    let (mut server, _client, _cancel) = setup("guard_twice");
    let name = unique_name("guard_twice");
    IpcSemaphore::clear_storage(&name);

    server.enable_guard(&name, false).expect("first");
    assert!(matches!(
        server.enable_guard(&name, true),
        Err(Error::AlreadyEnabled)
    ));
}

#[test]
fn guard_timeout_still_serves() {
    let (mut server, mut client, _cancel) = setup("guard_timeout");
    let name = unique_name("guard_busy");
    IpcSemaphore::clear_storage(&name);
    server
        .enable_guard_with_policy(&name, false, fast_policy(1000))
        .expect("guard");

    let mut holder = AccessGuard::join(&name, fast_policy(1000)).expect("join");
    holder.try_acquire().expect("hold");

    client
        .write_all(&build_request(UNIT, &[0x06, 0x00, 0x04, 0x00, 0x2A]))
        .unwrap();
    assert_eq!(server.serve_one().expect("served"), Step::Continue);
    assert_eq!(read_reply(&mut client, 8), [0x06, 0x00, 0x04, 0x00, 0x2A]);
    assert_eq!(server.guard().map(|g| g.health()), Some(10));
    assert_eq!(server.store().banks().holding_registers.get(4), Some(42));
}

#[test]
fn sustained_contention_is_fatal() {
    let (mut server, mut client, _cancel) = setup("guard_fatal");
    let name = unique_name("guard_fatal");
    IpcSemaphore::clear_storage(&name);
    // escalates on the third timeout
    server
        .enable_guard_with_policy(&name, false, fast_policy(30))
        .expect("guard");

    let mut holder = AccessGuard::join(&name, fast_policy(30)).expect("join");
    holder.try_acquire().expect("hold");

    for value in 1..=2u8 {
        client
            .write_all(&build_request(UNIT, &[0x06, 0x00, 0x00, 0x00, value]))
            .unwrap();
        assert_eq!(server.serve_one().expect("degraded"), Step::Continue);
        read_reply(&mut client, 8);
    }

    client
        .write_all(&build_request(UNIT, &[0x06, 0x00, 0x00, 0x00, 0x03]))
        .unwrap();
    assert!(matches!(server.serve_one(), Err(Error::GuardEscalated(_))));
    assert_eq!(server.state(), ServerState::Fatal);
    // the engine never saw the escalated request
    assert_eq!(server.store().banks().holding_registers.get(0), Some(2));

    assert!(matches!(server.serve_one(), Err(Error::Terminated)));
    assert!(matches!(server.run(), Err(Error::Terminated)));
}

#[test]
fn peer_close_is_not_an_error() {
    let (mut server, client, _cancel) = setup("peer_close");
    drop(client);

    assert_eq!(server.serve_one().expect("closed"), Step::PeerClosed);
    assert_eq!(server.state(), ServerState::Closed);
    assert!(server.connection().is_closed());
    assert!(matches!(server.serve_one(), Err(Error::Terminated)));
}

#[test]
fn cancellation_stops_a_blocked_run() {
    let (mut server, _client, cancel) = setup("cancel");

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        cancel.cancel();
    });
    assert_eq!(server.run().expect("run"), Shutdown::Cancelled);
    assert_eq!(server.state(), ServerState::Closed);
    canceller.join().unwrap();
}

#[test]
fn cancelled_before_receive() {
    let (mut server, _client, cancel) = setup("cancel_early");
    cancel.cancel();
    assert!(matches!(server.serve_one(), Err(Error::Cancelled)));
    assert_eq!(server.state(), ServerState::Closed);
}

#[test]
fn send_failure_after_cancel_is_a_shutdown() {
    let (store, connection, mut client, cancel) = parts("cancel_reply");
    let engine = CancellingEngine {
        inner: RtuEngine::new(UNIT).expect("engine"),
        cancel: cancel.clone(),
    };
    let mut server = RequestServer::new(Role::Slave, connection, engine, store, cancel);
    let name = unique_name("cancel_reply_guard");
    IpcSemaphore::clear_storage(&name);
    server.enable_guard(&name, false).expect("guard");

    // the request stays readable, but the reply has nowhere to go
    client
        .write_all(&build_request(UNIT, &[0x06, 0x00, 0x01, 0x00, 0x09]))
        .unwrap();
    drop(client);

    assert_eq!(server.run().expect("run"), Shutdown::Cancelled);
    assert_eq!(server.state(), ServerState::Closed);
    assert_eq!(server.store().banks().holding_registers.get(1), Some(9));
    assert!(!server.guard().expect("guard enabled").is_held());
}
