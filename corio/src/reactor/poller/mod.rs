//! Kernel-facing pieces shared by the reactor backends.
//!
//! - `epoll`: the readiness multiplexer used by the poll-based backend.
//! - `common`: interest flags and the `eventfd` notifier.
//! - `unix`: raw socket syscalls.

pub(crate) mod common;
pub(crate) mod epoll;
pub(crate) mod unix;

pub(crate) use common::{Interest, Notifier};
pub(crate) use epoll::EpollPoller;
pub(crate) use unix as platform;
