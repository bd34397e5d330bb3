// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Request server: receive a frame, take the access guard, let the engine
// answer against the register banks, release the guard, send the reply.

use crate::cancel::Cancellation;
use crate::connection::{Connection, Received, RequestContext};
use crate::engine::{ProtocolEngine, Reply};
use crate::error::{Error, Result};
use crate::guard::{AccessGuard, Acquisition, GuardPolicy};
use crate::rtu::frame::hex;
use crate::store::RegisterStore;

/// Which side of the bus this server plays. Only changes wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Slave,
}

impl Role {
    /// The party on the other end of the line.
    pub fn peer(self) -> &'static str {
        match self {
            Role::Client => "server",
            Role::Slave => "master",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Slave => "slave",
        }
    }

    fn peer_title(self) -> &'static str {
        match self {
            Role::Client => "Server",
            Role::Slave => "Master",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Receiving,
    Guarding,
    Replying,
    /// Peer closed or cancelled. Terminal.
    Closed,
    /// Unrecoverable error. Terminal.
    Fatal,
}

impl ServerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ServerState::Closed | ServerState::Fatal)
    }
}

/// Outcome of one request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    PeerClosed,
}

/// Why [`RequestServer::run`] returned normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    PeerClosed,
    Cancelled,
}

pub struct RequestServer<C: Connection, E: ProtocolEngine> {
    role: Role,
    connection: C,
    engine: E,
    store: RegisterStore,
    guard: Option<AccessGuard>,
    cancel: Cancellation,
    state: ServerState,
    monitor: bool,
    ctx: RequestContext,
}

impl<C: Connection, E: ProtocolEngine> RequestServer<C, E> {
    pub fn new(
        role: Role,
        connection: C,
        engine: E,
        store: RegisterStore,
        cancel: Cancellation,
    ) -> Self {
        Self {
            role,
            connection,
            engine,
            store,
            guard: None,
            cancel,
            state: ServerState::Idle,
            monitor: false,
            ctx: RequestContext::new(),
        }
    }

    /// Guard every reply with the named semaphore `name`.
    pub fn enable_guard(&mut self, name: &str, force: bool) -> Result<()> {
        self.enable_guard_with_policy(name, force, GuardPolicy::default())
    }

    pub fn enable_guard_with_policy(
        &mut self,
        name: &str,
        force: bool,
        policy: GuardPolicy,
    ) -> Result<()> {
        if self.guard.is_some() {
            return Err(Error::AlreadyEnabled);
        }
        self.guard = Some(AccessGuard::with_policy(name, force, policy)?);
        Ok(())
    }

    /// Print every inbound and outbound frame as hex on stdout.
    pub fn set_monitor(&mut self, enabled: bool) {
        self.monitor = enabled;
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn store(&self) -> &RegisterStore {
        &self.store
    }

    pub fn guard(&self) -> Option<&AccessGuard> {
        self.guard.as_ref()
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The last frame received.
    pub fn last_request(&self) -> &[u8] {
        self.ctx.as_bytes()
    }

    /// Wait for the next frame.
    pub fn receive(&mut self) -> Result<Received> {
        if self.state.is_terminal() {
            return Err(Error::Terminated);
        }
        self.state = ServerState::Receiving;
        let engine = &self.engine;
        let received = self
            .connection
            .receive(&mut self.ctx, |partial| engine.frame_length(partial));

        match received {
            Ok(Received::Request) => {
                if self.monitor {
                    println!("<{}", hex(self.ctx.as_bytes()));
                }
                Ok(Received::Request)
            }
            Ok(Received::PeerClosed) => {
                self.state = ServerState::Closed;
                log::info!("{} closed connection.", self.role.peer_title());
                Ok(Received::PeerClosed)
            }
            Err(_) if self.cancel.is_cancelled() => Err(self.cancelled()),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Serve one request.
    ///
    /// `Err(Error::Cancelled)` after cancellation; any other error is fatal
    /// and leaves the server in [`ServerState::Fatal`].
    pub fn serve_one(&mut self) -> Result<Step> {
        if self.state.is_terminal() {
            return Err(Error::Terminated);
        }
        if self.cancel.is_cancelled() {
            return Err(self.cancelled());
        }
        if self.receive()? == Received::PeerClosed {
            return Ok(Step::PeerClosed);
        }
        if self.cancel.is_cancelled() {
            return Err(self.cancelled());
        }

        self.state = ServerState::Guarding;
        let acquisition = self.guard.as_mut().map(AccessGuard::try_acquire).transpose();
        match acquisition {
            // A timed-out acquisition is still served.
            Ok(Some(Acquisition::Acquired | Acquisition::TimedOut)) | Ok(None) => {}
            Err(_) if self.cancel.is_cancelled() => return Err(self.cancelled()),
            Err(e) => return Err(self.fail(e)),
        }

        self.state = ServerState::Replying;
        let reply = self.engine.reply(self.ctx.as_bytes(), &self.store.banks());
        let released = self.guard.as_mut().map_or(Ok(()), AccessGuard::release);
        match released {
            Ok(()) => {}
            Err(_) if self.cancel.is_cancelled() => return Err(self.cancelled()),
            Err(e) => return Err(self.fail(e)),
        }

        if let Reply::Send(frame) = reply {
            if self.monitor {
                println!(">{}", hex(&frame));
            }
            match self.connection.send(&frame) {
                Ok(()) => {}
                Err(Error::Cancelled) => return Err(self.cancelled()),
                // a transport error seen while cancelled is a shutdown
                Err(_) if self.cancel.is_cancelled() => return Err(self.cancelled()),
                Err(e) => return Err(self.fail(e)),
            }
        }

        self.state = ServerState::Idle;
        Ok(Step::Continue)
    }

    /// Serve until the peer closes, cancellation, or a fatal error.
    pub fn run(&mut self) -> Result<Shutdown> {
        log::debug!("{} loop started", self.role.label());
        loop {
            match self.serve_one() {
                Ok(Step::Continue) => {}
                Ok(Step::PeerClosed) => return Ok(Shutdown::PeerClosed),
                Err(Error::Cancelled) => return Ok(Shutdown::Cancelled),
                Err(e) => return Err(e),
            }
        }
    }

    fn cancelled(&mut self) -> Error {
        self.state = ServerState::Closed;
        if let Some(guard) = self.guard.as_mut() {
            let _ = guard.release();
        }
        Error::Cancelled
    }

    fn fail(&mut self, e: Error) -> Error {
        self.state = ServerState::Fatal;
        if let Some(guard) = self.guard.as_mut() {
            let _ = guard.release();
        }
        log::error!("{e}");
        e
    }
}
