// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Modbus RTU responder over POSIX shared memory.
// Four register banks live in named shm segments so other processes can map
// them; an optional named semaphore serializes access while a request is
// answered.

pub mod error;
pub use error::{Category, Error, Result};

pub mod shm_name;

mod platform;

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod semaphore;
pub use semaphore::IpcSemaphore;

pub mod store;
pub use store::{BankKind, BankSizes, Banks, Ownership, RegisterStore};

pub mod guard;
pub use guard::{AccessGuard, Acquisition, GuardPolicy, HealthState};

pub mod timeout;
pub use timeout::NativeTimeout;

pub mod cancel;
pub use cancel::{install_signal_handlers, Cancellation};

pub mod engine;
pub use engine::{FrameLength, ProtocolEngine, Reply};

pub mod rtu;
pub use rtu::RtuEngine;

pub mod config;
pub use config::{Parity, SerialConfig, SerialMode};

pub mod connection;
pub use connection::{Connection, FdConnection, Received, RequestContext};

pub mod server;
pub use server::{RequestServer, Role, ServerState, Shutdown, Step};
