//! # Corio
//!
//! **Corio** is a small asynchronous I/O runtime for Linux. It is built
//! from a handful of pieces that compose:
//!
//! - [`Lazy`]: a one-shot task that only runs once it is awaited
//! - **Reactors** ([`AsyncIo`]): one dedicated thread each, multiplexing
//!   sockets with either `epoll` or `io_uring`
//! - **Layered sockets** ([`socket`]): a single byte-stream interface over
//!   plaintext, TLS, or TLS detected by sniffing the first bytes
//! - **Combinators**: [`ActiveWork`] for fan-out/fan-in, [`detach`] for
//!   fire-and-forget, and [`sync_wait`], [`make_future`],
//!   [`completion_callback`] to consume a task from outside
//!
//! There is no executor thread pool. [`sync_wait`] polls on the calling
//! thread; a [`detach`]ed task runs on whichever thread resumes it,
//! usually the reactor thread that completed its I/O.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use corio::net::ServerSocket;
//!
//! #[corio::main(io)]
//! async fn main() {
//!     let server = ServerSocket::bind("127.0.0.1:0").unwrap();
//!     let addr = server.local_addr().unwrap();
//!
//!     let (client, accepted) = corio::join!(io.connect(addr), io.accept(&server));
//!     assert!(client.valid() && accepted.valid());
//!
//!     let written = io.write(&client, b"hello").await;
//!     let mut buf = [0u8; 5];
//!     let read = io.read(&accepted, &mut buf).await;
//!     assert_eq!((written, read), (5, 5));
//! }
//! ```
//!
//! ## Modules
//!
//! - [`task`]: task primitives and completion adapters
//! - [`net`]: owned socket descriptors and listeners
//! - [`crypto`]: crypto engines, codecs and the TLS sniffer
//! - [`socket`]: plaintext/TLS sockets over a reactor

mod error;
mod reactor;
mod utils;

pub mod crypto;
pub mod net;
pub mod socket;
pub mod task;

pub use error::{Error, PanicPayload, Result};
pub use reactor::{AsyncIo, AsyncIoBuilder, Backend, IoStats, io_uring_supported};
pub use task::{ActiveWork, Lazy, Received, completion_callback, detach, make_future, sync_wait};

pub use corio_macros::*;
