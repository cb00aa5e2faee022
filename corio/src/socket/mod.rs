//! Byte-stream sockets that hide whether the wire is encrypted.
//!
//! [`accept`] and [`connect`] turn a connected [`SocketHandle`] into a
//! boxed [`AsyncCryptoSocket`], choosing plaintext, TLS, or (on the
//! accept side) sniffing the first bytes, according to the engine's
//! modes. A connection whose handshake fails becomes an
//! [`InvalidSocket`] instead of an error, so callers treat protocol
//! failure like any other failing socket.

mod raw;
mod tls;

pub use raw::RawSocket;
pub use tls::TlsSocket;

use crate::crypto::{AcceptMode, ConnectMode, CryptoEngine, SNOOP_SIZE, SmartBuffer, SnoopResult, snoop};
use crate::net::SocketHandle;
use crate::reactor::AsyncIo;
use crate::task::Lazy;

use libc::EINVAL;
use std::sync::Arc;

/// Which variant a socket ended up as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketKind {
    Raw,
    Tls,
    Invalid,
}

/// A byte stream over a reactor.
///
/// Reads and writes follow the reactor convention: a byte count `>= 0`,
/// or `-errno`. A read of `0` means the peer closed the stream.
pub trait AsyncCryptoSocket: Send {
    /// Reads at least one byte into `buf`, unless the stream closed or
    /// failed.
    fn read<'a>(&'a mut self, buf: &'a mut [u8]) -> Lazy<'a, isize>;

    /// Writes all of `buf`.
    fn write<'a>(&'a mut self, buf: &'a [u8]) -> Lazy<'a, isize>;

    fn kind(&self) -> SocketKind;

    /// The underlying descriptor, if any.
    fn handle(&self) -> Option<&SocketHandle>;
}

/// A permanently failing socket: every operation returns `-EINVAL`.
#[derive(Debug, Default)]
pub struct InvalidSocket;

impl AsyncCryptoSocket for InvalidSocket {
    fn read<'a>(&'a mut self, _buf: &'a mut [u8]) -> Lazy<'a, isize> {
        Lazy::ready(-(EINVAL as isize))
    }

    fn write<'a>(&'a mut self, _buf: &'a [u8]) -> Lazy<'a, isize> {
        Lazy::ready(-(EINVAL as isize))
    }

    fn kind(&self) -> SocketKind {
        SocketKind::Invalid
    }

    fn handle(&self) -> Option<&SocketHandle> {
        None
    }
}

fn invalid() -> Box<dyn AsyncCryptoSocket> {
    Box::new(InvalidSocket)
}

fn raw(io: Arc<dyn AsyncIo>, handle: SocketHandle, prefix: &[u8]) -> Box<dyn AsyncCryptoSocket> {
    Box::new(RawSocket::with_prefix(io, handle, prefix))
}

async fn tls_client(
    io: Arc<dyn AsyncIo>,
    handle: SocketHandle,
    engine: &dyn CryptoEngine,
) -> Box<dyn AsyncCryptoSocket> {
    let codec = match engine.create_client_codec() {
        Ok(codec) => codec,
        Err(err) => {
            tracing::warn!(error = %err, "cannot create client codec");
            return invalid();
        }
    };

    let mut socket = TlsSocket::new(io, handle, codec, SmartBuffer::new());
    if socket.handshake().await {
        Box::new(socket)
    } else {
        tracing::warn!("client handshake failed");
        invalid()
    }
}

async fn tls_server(
    io: Arc<dyn AsyncIo>,
    handle: SocketHandle,
    engine: &dyn CryptoEngine,
    prefix: SmartBuffer,
) -> Box<dyn AsyncCryptoSocket> {
    let codec = match engine.create_server_codec() {
        Ok(codec) => codec,
        Err(err) => {
            tracing::warn!(error = %err, "cannot create server codec");
            return invalid();
        }
    };

    let mut socket = TlsSocket::new(io, handle, codec, prefix);
    if socket.handshake().await {
        Box::new(socket)
    } else {
        tracing::warn!("server handshake failed");
        invalid()
    }
}

/// Reads up to [`SNOOP_SIZE`] bytes, stopping early once they cannot be
/// a ClientHello or the peer stops sending.
async fn sniff(io: &dyn AsyncIo, handle: &SocketHandle) -> Result<([u8; SNOOP_SIZE], usize), isize> {
    let mut prefix = [0u8; SNOOP_SIZE];
    let mut filled = 0;

    while filled < SNOOP_SIZE {
        let n = io.read(handle, &mut prefix[filled..]).await;
        if n < 0 {
            return Err(n);
        }
        if n == 0 {
            break;
        }

        filled += n as usize;
        if snoop(&prefix[..filled]) == SnoopResult::NotTls {
            break;
        }
    }

    Ok((prefix, filled))
}

/// Wraps an accepted connection according to `engine.accept_mode()`.
pub fn accept<'a>(
    io: Arc<dyn AsyncIo>,
    handle: SocketHandle,
    engine: &'a dyn CryptoEngine,
) -> Lazy<'a, Box<dyn AsyncCryptoSocket>> {
    Lazy::new(async move {
        if !handle.valid() {
            return invalid();
        }

        match engine.accept_mode() {
            AcceptMode::Plaintext => raw(io, handle, &[]),
            AcceptMode::Tls => tls_server(io, handle, engine, SmartBuffer::new()).await,
            AcceptMode::Sniff => {
                let (prefix, filled) = match sniff(io.as_ref(), &handle).await {
                    Ok(sniffed) => sniffed,
                    Err(err) => {
                        tracing::debug!(error = err, "read failed while sniffing");
                        return invalid();
                    }
                };

                let prefix = &prefix[..filled];
                if snoop(prefix) == SnoopResult::ClientHello {
                    tracing::trace!(fd = handle.fd(), "sniffed TLS");
                    let mut input = SmartBuffer::new();
                    input.extend_from_slice(prefix);
                    tls_server(io, handle, engine, input).await
                } else {
                    tracing::trace!(fd = handle.fd(), "sniffed plaintext");
                    raw(io, handle, prefix)
                }
            }
        }
    })
}

/// Wraps a connected socket according to `engine.connect_mode()`.
pub fn connect<'a>(
    io: Arc<dyn AsyncIo>,
    handle: SocketHandle,
    engine: &'a dyn CryptoEngine,
) -> Lazy<'a, Box<dyn AsyncCryptoSocket>> {
    Lazy::new(async move {
        if !handle.valid() {
            return invalid();
        }

        match engine.connect_mode() {
            ConnectMode::Plaintext => raw(io, handle, &[]),
            ConnectMode::Tls => tls_client(io, handle, engine).await,
        }
    })
}
