use std::any::Any;
use std::fmt;
use std::io;

/// Errors produced by the task machinery and the crypto layer.
///
/// Socket operations never return this type: failures at the
/// read/write/accept/connect boundary are reported as negative
/// `errno` values, matching the raw syscall convention.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The computation was abandoned before producing a result.
    ///
    /// This is what a waiter observes when the resolving side is dropped
    /// without setting anything, e.g. when a reactor shuts down.
    #[error("operation cancelled")]
    Cancelled,

    /// The task panicked.
    #[error("task panicked: {0}")]
    Panicked(PanicPayload),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The payload of a captured panic.
///
/// The original payload is kept so it can be re-raised on the thread
/// that consumes the result, see [`PanicPayload::resume`].
pub struct PanicPayload(Box<dyn Any + Send + 'static>);

impl PanicPayload {
    pub(crate) fn new(payload: Box<dyn Any + Send + 'static>) -> Self {
        Self(payload)
    }

    /// Returns the panic message when the payload is a string.
    pub fn message(&self) -> &str {
        if let Some(msg) = self.0.downcast_ref::<&'static str>() {
            msg
        } else if let Some(msg) = self.0.downcast_ref::<String>() {
            msg.as_str()
        } else {
            "non-string panic payload"
        }
    }

    /// Re-raises the panic on the current thread.
    pub fn resume(self) -> ! {
        std::panic::resume_unwind(self.0)
    }

    /// Returns the raw payload.
    pub fn into_inner(self) -> Box<dyn Any + Send + 'static> {
        self.0
    }

    /// Logs a panic that has nowhere to be delivered and aborts.
    pub(crate) fn abort(self, origin: &str) -> ! {
        tracing::error!(panic = self.message(), "{origin} panicked, aborting");
        std::process::abort();
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl fmt::Debug for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PanicPayload").field(&self.message()).finish()
    }
}
