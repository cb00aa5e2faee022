//! Pluggable per-connection cryptography.
//!
//! A [`CryptoEngine`] is shared configuration: it decides whether
//! accepted and connected sockets speak TLS, and creates one
//! [`CryptoCodec`] per connection. Codecs are buffer-in/buffer-out state
//! machines; they never touch a socket, which keeps them independent of
//! the reactor that drives them.

mod buffer;
mod snoop;
mod tls;

pub use buffer::SmartBuffer;
pub use snoop::{SNOOP_SIZE, SnoopResult, snoop};
pub use tls::{TlsCodec, TlsCryptoEngine, TlsEngineBuilder};

/// Progress of a handshake step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    /// The handshake failed; the connection is unusable.
    Failed,

    /// The handshake completed.
    Done,

    /// Call `handshake` again, after flushing any output produced.
    NeedsWork,

    /// Nothing more can happen until the peer sends more bytes.
    NeedsMorePeerData,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandshakeResult {
    pub input_consumed: usize,
    pub output_produced: usize,
    pub state: HandshakeState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncodeResult {
    pub input_consumed: usize,
    pub output_produced: usize,
    pub failed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeState {
    Failed,

    /// Some plaintext was produced.
    Ok,

    /// The ciphertext ended mid-record.
    NeedsMorePeerData,

    /// The peer closed the session.
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodeResult {
    pub input_consumed: usize,
    pub output_produced: usize,
    pub state: DecodeState,
}

/// Per-connection encryption state.
pub trait CryptoCodec: Send {
    /// Smallest ciphertext buffer `encode` and `handshake` may be given.
    fn min_encode_buffer_size(&self) -> usize;

    /// Smallest plaintext buffer `decode` may be given.
    fn min_decode_buffer_size(&self) -> usize;

    /// Advances the handshake with peer bytes from `input`, writing bytes
    /// for the peer into `output`.
    fn handshake(&mut self, input: &[u8], output: &mut [u8]) -> HandshakeResult;

    /// Performs deferred handshake computation, if the codec has any.
    fn do_handshake_work(&mut self);

    /// Encrypts application bytes.
    fn encode(&mut self, plaintext: &[u8], ciphertext: &mut [u8]) -> EncodeResult;

    /// Decrypts peer bytes.
    fn decode(&mut self, ciphertext: &[u8], plaintext: &mut [u8]) -> DecodeResult;
}

/// How accepted connections are treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcceptMode {
    Plaintext,
    Tls,

    /// Peek at the first bytes and pick TLS or plaintext.
    Sniff,
}

/// How outgoing connections are treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectMode {
    Plaintext,
    Tls,
}

/// Shared cryptographic configuration.
pub trait CryptoEngine: Send + Sync {
    fn accept_mode(&self) -> AcceptMode;

    fn connect_mode(&self) -> ConnectMode;

    fn create_server_codec(&self) -> crate::Result<Box<dyn CryptoCodec>>;

    fn create_client_codec(&self) -> crate::Result<Box<dyn CryptoCodec>>;
}

/// An engine without cryptography: every socket is plaintext.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullCryptoEngine;

impl CryptoEngine for NullCryptoEngine {
    fn accept_mode(&self) -> AcceptMode {
        AcceptMode::Plaintext
    }

    fn connect_mode(&self) -> ConnectMode {
        ConnectMode::Plaintext
    }

    fn create_server_codec(&self) -> crate::Result<Box<dyn CryptoCodec>> {
        Err(crate::Error::Config(
            "the null engine has no server codec".to_owned(),
        ))
    }

    fn create_client_codec(&self) -> crate::Result<Box<dyn CryptoCodec>> {
        Err(crate::Error::Config(
            "the null engine has no client codec".to_owned(),
        ))
    }
}
