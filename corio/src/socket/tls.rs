use super::{AsyncCryptoSocket, SocketKind};
use crate::crypto::{CryptoCodec, DecodeState, HandshakeState, SmartBuffer};
use crate::net::SocketHandle;
use crate::reactor::AsyncIo;
use crate::task::Lazy;

use libc::{EIO, EPIPE};
use std::sync::Arc;

/// How much to read from the network at a time.
const READ_CHUNK: usize = 16 * 1024;

/// A socket speaking TLS through a [`CryptoCodec`].
///
/// Owns three buffers: decrypted application input, encrypted input
/// from the peer, and encrypted output for the peer. Once the codec
/// fails, every read and write returns `-EIO`.
pub struct TlsSocket {
    io: Arc<dyn AsyncIo>,
    handle: SocketHandle,
    codec: Box<dyn CryptoCodec>,

    app_input: SmartBuffer,
    input: SmartBuffer,
    output: SmartBuffer,

    failed: bool,
}

impl TlsSocket {
    /// Wraps a connected socket. `input` holds peer bytes already read,
    /// such as a sniffed ClientHello prefix.
    pub(crate) fn new(
        io: Arc<dyn AsyncIo>,
        handle: SocketHandle,
        codec: Box<dyn CryptoCodec>,
        input: SmartBuffer,
    ) -> Self {
        Self {
            io,
            handle,
            codec,
            app_input: SmartBuffer::new(),
            input,
            output: SmartBuffer::new(),
            failed: false,
        }
    }

    /// Writes out all buffered ciphertext. Returns `0` or `-errno`.
    async fn flush(&mut self) -> isize {
        while !self.output.is_empty() {
            let n = self.io.write(&self.handle, self.output.obtain()).await;
            if n < 0 {
                return n;
            }
            if n == 0 {
                return -(EPIPE as isize);
            }

            self.output.evict(n as usize);
        }

        0
    }

    /// Reads one chunk of ciphertext. Returns the byte count or `-errno`.
    async fn fill(&mut self) -> isize {
        let space = self.input.reserve(READ_CHUNK);
        let n = self.io.read(&self.handle, space).await;
        if n > 0 {
            self.input.commit(n as usize);
        }

        n
    }

    /// Runs the handshake to completion. Returns `false` on failure.
    pub(crate) async fn handshake(&mut self) -> bool {
        loop {
            let space = self.output.reserve(self.codec.min_encode_buffer_size());
            let result = self.codec.handshake(self.input.obtain(), space);
            self.input.evict(result.input_consumed);
            self.output.commit(result.output_produced);

            match result.state {
                HandshakeState::Failed => {
                    // Best effort: let the peer see the alert.
                    let _ = self.flush().await;
                    self.failed = true;
                    return false;
                }
                HandshakeState::Done => return self.flush().await == 0,
                HandshakeState::NeedsWork => {
                    self.codec.do_handshake_work();
                    if self.flush().await < 0 {
                        return false;
                    }
                }
                HandshakeState::NeedsMorePeerData => {
                    if self.flush().await < 0 || self.fill().await <= 0 {
                        return false;
                    }
                }
            }
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> isize {
        if self.failed {
            return -(EIO as isize);
        }

        let mut written = 0;
        loop {
            let space = self.output.reserve(self.codec.min_encode_buffer_size());
            let result = self.codec.encode(&buf[written..], space);
            if result.failed {
                self.failed = true;
                return -(EIO as isize);
            }

            self.output.commit(result.output_produced);
            written += result.input_consumed;

            let flushed = self.flush().await;
            if flushed < 0 {
                return flushed;
            }

            // Done once the input is consumed and the codec has nothing
            // left to emit.
            if written == buf.len() && result.output_produced == 0 {
                return written as isize;
            }
            if result.input_consumed == 0 && result.output_produced == 0 {
                self.failed = true;
                return -(EIO as isize);
            }
        }
    }

    async fn read_some(&mut self, buf: &mut [u8]) -> isize {
        if self.failed {
            return -(EIO as isize);
        }
        if buf.is_empty() {
            return 0;
        }

        loop {
            if !self.app_input.is_empty() {
                let n = buf.len().min(self.app_input.len());
                buf[..n].copy_from_slice(&self.app_input.obtain()[..n]);
                self.app_input.evict(n);
                return n as isize;
            }

            let space = self.app_input.reserve(self.codec.min_decode_buffer_size());
            let result = self.codec.decode(self.input.obtain(), space);
            self.input.evict(result.input_consumed);
            self.app_input.commit(result.output_produced);

            match result.state {
                DecodeState::Ok => {}
                DecodeState::Closed => return 0,
                DecodeState::Failed => {
                    self.failed = true;
                    return -(EIO as isize);
                }
                DecodeState::NeedsMorePeerData => {
                    let n = self.fill().await;
                    if n <= 0 {
                        return n;
                    }
                }
            }
        }
    }
}

impl AsyncCryptoSocket for TlsSocket {
    fn read<'a>(&'a mut self, buf: &'a mut [u8]) -> Lazy<'a, isize> {
        Lazy::new(self.read_some(buf))
    }

    fn write<'a>(&'a mut self, buf: &'a [u8]) -> Lazy<'a, isize> {
        Lazy::new(self.write_all(buf))
    }

    fn kind(&self) -> SocketKind {
        SocketKind::Tls
    }

    fn handle(&self) -> Option<&SocketHandle> {
        Some(&self.handle)
    }
}
