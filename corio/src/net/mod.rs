//! Owned socket descriptors.
//!
//! [`SocketHandle`] is the currency of the reactor: accept and connect
//! produce one, read and write borrow one. [`ServerSocket`] is a bound,
//! listening handle.

mod handle;
mod listener;

pub use handle::SocketHandle;
pub use listener::ServerSocket;
