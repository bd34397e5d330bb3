// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Crate-wide error type.
// Platform code speaks io::Error; everything above it speaks Error.

use std::io;

/// Coarse classification used by the serving loop and the binary to pick a
/// reaction and an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Bad parameters or name collisions, found before the loop starts.
    Configuration,
    /// The OS could not provide a resource (memory, descriptors, devices).
    Resource,
    /// Sustained guard contention; terminal for the session.
    Contention,
    /// Line or socket failure while serving.
    Transport,
    /// Operator-requested shutdown.
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("'{0}' already exists")]
    AlreadyExists(String),

    #[error("permission denied for '{name}': {source}")]
    PermissionDenied { name: String, source: io::Error },

    #[error("cannot allocate '{name}': {source}")]
    ResourceExhausted { name: String, source: io::Error },

    #[error("semaphore already enabled")]
    AlreadyEnabled,

    #[error("repeatedly failed to acquire the semaphore '{0}'")]
    GuardEscalated(String),

    #[error("modbus_receive failed: {0}")]
    Transport(#[source] io::Error),

    #[error("failed to send reply: {0}")]
    Reply(#[source] io::Error),

    #[error("{context}: {source}")]
    Os {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("session already terminated")]
    Terminated,

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Map an OS error raised while creating or opening the object `name`.
    pub(crate) fn from_os(name: &str, source: io::Error) -> Self {
        match source.raw_os_error() {
            Some(libc::EEXIST) => Error::AlreadyExists(name.to_string()),
            Some(libc::EACCES) | Some(libc::EPERM) => Error::PermissionDenied {
                name: name.to_string(),
                source,
            },
            Some(libc::ENOMEM) | Some(libc::ENOSPC) | Some(libc::EMFILE) | Some(libc::ENFILE) => {
                Error::ResourceExhausted {
                    name: name.to_string(),
                    source,
                }
            }
            Some(libc::EINVAL) | Some(libc::ENAMETOOLONG) => {
                Error::InvalidArgument(format!("'{name}': {source}"))
            }
            _ => Error::Os {
                context: format!("'{name}'"),
                source,
            },
        }
    }

    pub(crate) fn os(context: impl Into<String>, source: io::Error) -> Self {
        Error::Os {
            context: context.into(),
            source,
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Error::InvalidArgument(_)
            | Error::AlreadyExists(_)
            | Error::PermissionDenied { .. }
            | Error::AlreadyEnabled => Category::Configuration,
            Error::ResourceExhausted { .. } | Error::Os { .. } => Category::Resource,
            Error::GuardEscalated(_) => Category::Contention,
            Error::Transport(_) | Error::Reply(_) | Error::Terminated => Category::Transport,
            Error::Cancelled => Category::Cancelled,
        }
    }

    /// Whether this error ends a serving session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self.category(), Category::Cancelled)
    }
}
