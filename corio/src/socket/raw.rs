use super::{AsyncCryptoSocket, SocketKind};
use crate::crypto::SmartBuffer;
use crate::net::SocketHandle;
use crate::reactor::AsyncIo;
use crate::task::Lazy;

use libc::EPIPE;
use std::sync::Arc;

/// A plaintext socket.
///
/// Bytes peeked while sniffing the protocol are served before anything
/// is read from the network, so nothing the peer sent is lost.
pub struct RawSocket {
    io: Arc<dyn AsyncIo>,
    handle: SocketHandle,
    prefix: SmartBuffer,
}

impl RawSocket {
    pub fn new(io: Arc<dyn AsyncIo>, handle: SocketHandle) -> Self {
        Self::with_prefix(io, handle, &[])
    }

    /// A socket whose first reads return `prefix`.
    pub fn with_prefix(io: Arc<dyn AsyncIo>, handle: SocketHandle, prefix: &[u8]) -> Self {
        let mut buffer = SmartBuffer::new();
        buffer.extend_from_slice(prefix);

        Self {
            io,
            handle,
            prefix: buffer,
        }
    }
}

impl AsyncCryptoSocket for RawSocket {
    fn read<'a>(&'a mut self, buf: &'a mut [u8]) -> Lazy<'a, isize> {
        if !self.prefix.is_empty() {
            let n = buf.len().min(self.prefix.len());
            buf[..n].copy_from_slice(&self.prefix.obtain()[..n]);
            self.prefix.evict(n);
            return Lazy::ready(n as isize);
        }

        self.io.read(&self.handle, buf)
    }

    fn write<'a>(&'a mut self, buf: &'a [u8]) -> Lazy<'a, isize> {
        Lazy::new(async move {
            let mut written = 0;
            while written < buf.len() {
                let n = self.io.write(&self.handle, &buf[written..]).await;
                if n < 0 {
                    return n;
                }
                if n == 0 {
                    return -(EPIPE as isize);
                }

                written += n as usize;
            }

            written as isize
        })
    }

    fn kind(&self) -> SocketKind {
        SocketKind::Raw
    }

    fn handle(&self) -> Option<&SocketHandle> {
        Some(&self.handle)
    }
}
