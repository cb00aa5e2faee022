//! rustls-backed engine and codec.

use super::{
    AcceptMode, ConnectMode, CryptoCodec, CryptoEngine, DecodeResult, DecodeState, EncodeResult,
    HandshakeResult, HandshakeState,
};
use crate::error::{Error, Result};

use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, Connection, RootCertStore, ServerConfig, ServerConnection};
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

/// Largest plaintext fragment in one TLS record.
const MAX_FRAGMENT: usize = 16384;

/// Room for a full record: fragment plus header, padding and tag.
const MAX_RECORD: usize = MAX_FRAGMENT + 2048;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Outcome of pulling decrypted bytes out of rustls.
enum Plain {
    Data(usize),
    Pending,
    Closed,
}

/// A [`CryptoCodec`] over a `rustls::Connection`.
pub struct TlsCodec {
    conn: Connection,
}

impl TlsCodec {
    pub fn new(conn: impl Into<Connection>) -> Self {
        Self { conn: conn.into() }
    }

    /// Copies as many pending TLS bytes as fit into `out`.
    fn flush_tls(&mut self, out: &mut [u8]) -> usize {
        let mut produced = 0;

        while self.conn.wants_write() && produced < out.len() {
            let mut cursor = &mut out[produced..];
            match self.conn.write_tls(&mut cursor) {
                Ok(0) | Err(_) => break,
                Ok(n) => produced += n,
            }
        }

        produced
    }

    /// Feeds `input` to rustls until it stops accepting bytes or a
    /// record fails to process.
    fn feed(&mut self, input: &[u8]) -> (usize, Option<rustls::Error>) {
        let mut consumed = 0;

        while consumed < input.len() {
            let mut rest = &input[consumed..];
            match self.conn.read_tls(&mut rest) {
                Ok(0) | Err(_) => break,
                Ok(n) => consumed += n,
            }

            if let Err(err) = self.conn.process_new_packets() {
                return (consumed, Some(err));
            }
        }

        (consumed, None)
    }

    fn read_plain(&mut self, plaintext: &mut [u8]) -> Plain {
        match self.conn.reader().read(plaintext) {
            Ok(0) if plaintext.is_empty() => Plain::Pending,
            Ok(0) => Plain::Closed,
            Ok(n) => Plain::Data(n),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Plain::Pending,
            Err(_) => Plain::Closed,
        }
    }
}

impl CryptoCodec for TlsCodec {
    fn min_encode_buffer_size(&self) -> usize {
        MAX_RECORD
    }

    fn min_decode_buffer_size(&self) -> usize {
        MAX_FRAGMENT
    }

    fn handshake(&mut self, input: &[u8], output: &mut [u8]) -> HandshakeResult {
        let (input_consumed, failure) = self.feed(input);

        // An alert describing the failure may be waiting to go out.
        let output_produced = self.flush_tls(output);

        let state = if let Some(err) = failure {
            tracing::warn!(error = %err, "TLS handshake failed");
            HandshakeState::Failed
        } else if self.conn.is_handshaking() {
            if self.conn.wants_write() || input_consumed < input.len() {
                HandshakeState::NeedsWork
            } else {
                HandshakeState::NeedsMorePeerData
            }
        } else if self.conn.wants_write() {
            HandshakeState::NeedsWork
        } else {
            HandshakeState::Done
        };

        HandshakeResult {
            input_consumed,
            output_produced,
            state,
        }
    }

    fn do_handshake_work(&mut self) {}

    fn encode(&mut self, plaintext: &[u8], ciphertext: &mut [u8]) -> EncodeResult {
        let chunk = &plaintext[..plaintext.len().min(MAX_FRAGMENT)];

        let input_consumed = if chunk.is_empty() {
            0
        } else {
            match self.conn.writer().write(chunk) {
                Ok(n) => n,
                Err(err) => {
                    tracing::warn!(error = %err, "TLS encode failed");
                    return EncodeResult {
                        input_consumed: 0,
                        output_produced: 0,
                        failed: true,
                    };
                }
            }
        };

        EncodeResult {
            input_consumed,
            output_produced: self.flush_tls(ciphertext),
            failed: false,
        }
    }

    fn decode(&mut self, ciphertext: &[u8], plaintext: &mut [u8]) -> DecodeResult {
        let result = |input_consumed, output_produced, state| DecodeResult {
            input_consumed,
            output_produced,
            state,
        };

        // Records decrypted by an earlier call come first.
        match self.read_plain(plaintext) {
            Plain::Data(n) => return result(0, n, DecodeState::Ok),
            Plain::Closed => return result(0, 0, DecodeState::Closed),
            Plain::Pending => {}
        }

        let mut consumed = 0;
        while consumed < ciphertext.len() {
            let mut rest = &ciphertext[consumed..];
            match self.conn.read_tls(&mut rest) {
                Ok(0) | Err(_) => break,
                Ok(n) => consumed += n,
            }

            if let Err(err) = self.conn.process_new_packets() {
                tracing::warn!(error = %err, "TLS decode failed");
                return result(consumed, 0, DecodeState::Failed);
            }

            match self.read_plain(plaintext) {
                Plain::Data(n) => return result(consumed, n, DecodeState::Ok),
                Plain::Closed => return result(consumed, 0, DecodeState::Closed),
                Plain::Pending => {}
            }
        }

        result(consumed, 0, DecodeState::NeedsMorePeerData)
    }
}

impl fmt::Debug for TlsCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsCodec")
            .field("handshaking", &self.conn.is_handshaking())
            .finish()
    }
}

/// A [`CryptoEngine`] backed by rustls.
///
/// Certificate validation and cipher-suite policy come entirely from the
/// `rustls` configs the engine is built with.
pub struct TlsCryptoEngine {
    server: Option<Arc<ServerConfig>>,
    client: Option<Arc<ClientConfig>>,
    server_name: ServerName<'static>,
    accept_mode: AcceptMode,
    connect_mode: ConnectMode,
}

impl TlsCryptoEngine {
    pub fn builder() -> TlsEngineBuilder {
        TlsEngineBuilder::new()
    }
}

impl CryptoEngine for TlsCryptoEngine {
    fn accept_mode(&self) -> AcceptMode {
        self.accept_mode
    }

    fn connect_mode(&self) -> ConnectMode {
        self.connect_mode
    }

    fn create_server_codec(&self) -> Result<Box<dyn CryptoCodec>> {
        let config = self
            .server
            .clone()
            .ok_or_else(|| Error::Config("no server config".to_owned()))?;

        Ok(Box::new(TlsCodec::new(ServerConnection::new(config)?)))
    }

    fn create_client_codec(&self) -> Result<Box<dyn CryptoCodec>> {
        let config = self
            .client
            .clone()
            .ok_or_else(|| Error::Config("no client config".to_owned()))?;

        let conn = ClientConnection::new(config, self.server_name.clone())?;
        Ok(Box::new(TlsCodec::new(conn)))
    }
}

impl fmt::Debug for TlsCryptoEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsCryptoEngine")
            .field("server", &self.server.is_some())
            .field("client", &self.client.is_some())
            .field("server_name", &self.server_name)
            .field("accept_mode", &self.accept_mode)
            .field("connect_mode", &self.connect_mode)
            .finish()
    }
}

/// Builder for [`TlsCryptoEngine`].
///
/// Defaults to TLS on both sides and a server name of `localhost`.
///
/// # Examples
///
/// ```rust,ignore
/// let engine = TlsCryptoEngine::builder()
///     .server_pem(CERT_PEM, KEY_PEM)?
///     .client_ca_pem(CA_PEM)?
///     .accept_mode(AcceptMode::Sniff)
///     .build()?;
/// ```
pub struct TlsEngineBuilder {
    server: Option<Arc<ServerConfig>>,
    client: Option<Arc<ClientConfig>>,
    server_name: String,
    accept_mode: AcceptMode,
    connect_mode: ConnectMode,
}

impl TlsEngineBuilder {
    pub fn new() -> Self {
        Self {
            server: None,
            client: None,
            server_name: "localhost".to_owned(),
            accept_mode: AcceptMode::Tls,
            connect_mode: ConnectMode::Tls,
        }
    }

    /// Serves the certificate chain and private key in the given PEM text.
    pub fn server_pem(mut self, cert_pem: &str, key_pem: &str) -> Result<Self> {
        let certs = rustls_pemfile::certs(&mut io::Cursor::new(cert_pem.as_bytes()))
            .collect::<io::Result<Vec<_>>>()?;
        if certs.is_empty() {
            return Err(Error::Config("no certificate found in PEM".to_owned()));
        }

        let key = rustls_pemfile::private_key(&mut io::Cursor::new(key_pem.as_bytes()))?
            .ok_or_else(|| Error::Config("no private key found in PEM".to_owned()))?;

        let config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        self.server = Some(Arc::new(config));
        Ok(self)
    }

    /// Trusts the CA certificates in the given PEM text for connections.
    pub fn client_ca_pem(mut self, ca_pem: &str) -> Result<Self> {
        let mut roots = RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut io::Cursor::new(ca_pem.as_bytes())) {
            roots.add(cert?)?;
        }

        if roots.is_empty() {
            return Err(Error::Config("no CA certificate found in PEM".to_owned()));
        }

        let config = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();

        self.client = Some(Arc::new(config));
        Ok(self)
    }

    /// Uses a ready-made server config.
    pub fn server_config(mut self, config: Arc<ServerConfig>) -> Self {
        self.server = Some(config);
        self
    }

    /// Uses a ready-made client config.
    pub fn client_config(mut self, config: Arc<ClientConfig>) -> Self {
        self.client = Some(config);
        self
    }

    /// The name client connections verify the server certificate against.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn accept_mode(mut self, mode: AcceptMode) -> Self {
        self.accept_mode = mode;
        self
    }

    pub fn connect_mode(mut self, mode: ConnectMode) -> Self {
        self.connect_mode = mode;
        self
    }

    /// Validates the configuration.
    ///
    /// Accepting TLS needs a server config; connecting with TLS needs a
    /// client config and a valid server name.
    pub fn build(self) -> Result<TlsCryptoEngine> {
        if self.accept_mode != AcceptMode::Plaintext && self.server.is_none() {
            return Err(Error::Config(
                "TLS accept mode requires a server certificate".to_owned(),
            ));
        }
        if self.connect_mode == ConnectMode::Tls && self.client.is_none() {
            return Err(Error::Config(
                "TLS connect mode requires a client config".to_owned(),
            ));
        }

        let server_name = ServerName::try_from(self.server_name.clone())
            .map_err(|err| Error::Config(format!("invalid server name `{}`: {err}", self.server_name)))?;

        Ok(TlsCryptoEngine {
            server: self.server,
            client: self.client,
            server_name,
            accept_mode: self.accept_mode,
            connect_mode: self.connect_mode,
        })
    }
}

impl Default for TlsEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
