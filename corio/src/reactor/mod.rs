//! Reactors: dedicated threads that multiplex socket readiness.
//!
//! Each [`AsyncIo`] instance owns one OS thread. Operations return
//! [`Lazy`] tasks; awaiting one hands a command to the reactor thread,
//! which resumes the awaiting task on that thread once the kernel
//! reports readiness (epoll) or completion (`io_uring`).
//!
//! Failures follow the syscall convention: a byte count `>= 0` on
//! success, `-errno` otherwise. Shutting a reactor down resolves every
//! pending operation with `-ECANCELED` (read/write), an invalid handle
//! carrying `-ECANCELED` (accept/connect), or `false` (schedule).

mod backend;
mod builder;
mod core;
mod event;
mod handoff;
mod io;
mod poller;

pub(crate) mod context;

pub use backend::io_uring_supported;
pub use builder::AsyncIoBuilder;

use crate::net::{ServerSocket, SocketHandle};
use crate::task::Lazy;

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

pub(crate) use io::Direction;
pub(crate) use poller::platform;

/// Kernel facility a reactor is built on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Readiness-based multiplexing with `epoll`.
    Epoll,

    /// Submission/completion queues with `io_uring`.
    IoUring,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Epoll => "epoll",
            Backend::IoUring => "io_uring",
        })
    }
}

impl FromStr for Backend {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "epoll" => Ok(Backend::Epoll),
            "io_uring" | "iouring" | "uring" => Ok(Backend::IoUring),
            other => Err(crate::Error::Config(format!("unknown backend `{other}`"))),
        }
    }
}

/// Reactor bookkeeping, as last published by the reactor thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IoStats {
    /// File descriptors currently registered with the kernel.
    pub registered_fds: usize,

    /// Operations waiting for readiness or completion.
    pub pending_ops: usize,
}

/// A reactor: asynchronous socket operations served by one thread.
///
/// Implementations are built with [`AsyncIoBuilder`]. Every returned task
/// resumes on the reactor thread. Issuing a second read (or write) on the
/// same socket while one is outstanding is a contract violation.
pub trait AsyncIo: Send + Sync {
    /// The backend this reactor runs on.
    fn backend(&self) -> Backend;

    /// Returns `true` when called from this reactor's thread.
    fn in_thread(&self) -> bool;

    /// Accepts one connection on `listener`.
    fn accept<'a>(&'a self, listener: &'a ServerSocket) -> Lazy<'a, SocketHandle>;

    /// Opens a connection to `addr`.
    fn connect(&self, addr: SocketAddr) -> Lazy<'_, SocketHandle>;

    /// Reads into `buf`, returning the byte count or `-errno`.
    fn read<'a>(&'a self, socket: &'a SocketHandle, buf: &'a mut [u8]) -> Lazy<'a, isize>;

    /// Writes from `buf`, returning the byte count or `-errno`.
    fn write<'a>(&'a self, socket: &'a SocketHandle, buf: &'a [u8]) -> Lazy<'a, isize>;

    /// Resumes the caller on the reactor thread.
    ///
    /// Resolves to `false` once the reactor has stopped.
    fn schedule(&self) -> Lazy<'_, bool>;

    /// Stops the reactor, cancelling pending operations, and joins its
    /// thread. Idempotent; from the reactor thread it only signals.
    fn shutdown(&self);

    /// Registration and pending-operation counts.
    fn stats(&self) -> IoStats;
}
