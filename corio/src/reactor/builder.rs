use super::backend::{EpollIo, UringIo, io_uring_supported};
use super::{AsyncIo, Backend};

use std::env;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable read by [`AsyncIoBuilder::from_env`].
pub const BACKEND_ENV: &str = "CORIO_BACKEND";

/// Settings handed to a reactor when it starts.
#[derive(Clone, Debug)]
pub(crate) struct Config {
    pub(crate) poll_timeout: Duration,
    pub(crate) max_events: usize,
    pub(crate) ring_entries: u32,
    pub(crate) thread_name: String,
}

/// Builder for configuring and starting a reactor.
///
/// The `io_uring` backend is only used when it is preferred *and* the
/// kernel supports every opcode the reactor needs; otherwise the builder
/// silently falls back to `epoll`.
///
/// # Examples
///
/// ```rust,no_run
/// use corio::{AsyncIoBuilder, Backend};
/// use std::time::Duration;
///
/// let io = AsyncIoBuilder::new()
///     .prefer(Backend::IoUring)
///     .poll_timeout(Duration::from_millis(50))
///     .build()
///     .expect("reactor");
///
/// io.shutdown();
/// ```
pub struct AsyncIoBuilder {
    /// Preferred backend.
    backend: Backend,

    config: Config,
}

impl AsyncIoBuilder {
    /// Creates a builder with default settings: `epoll`, a 100 ms poll
    /// timeout, 256 events per wait and 256 ring entries.
    pub fn new() -> Self {
        Self {
            backend: Backend::Epoll,
            config: Config {
                poll_timeout: Duration::from_millis(100),
                max_events: 256,
                ring_entries: 256,
                thread_name: "corio-reactor".to_owned(),
            },
        }
    }

    /// Creates a builder whose preferred backend comes from
    /// `CORIO_BACKEND` (`epoll` or `io_uring`).
    ///
    /// An unset variable keeps the default. An unknown value is logged
    /// and ignored.
    pub fn from_env() -> Self {
        let builder = Self::new();

        match env::var(BACKEND_ENV) {
            Ok(value) => match value.parse() {
                Ok(backend) => builder.prefer(backend),
                Err(err) => {
                    tracing::warn!(error = %err, "ignoring {BACKEND_ENV}");
                    builder
                }
            },
            Err(_) => builder,
        }
    }

    /// Sets the preferred backend.
    pub fn prefer(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Bounds how long the `epoll` loop blocks in a single wait.
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    /// Sets how many events a single `epoll_wait` may return.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn max_events(mut self, n: usize) -> Self {
        assert!(n > 0, "max_events must be > 0");

        self.config.max_events = n;
        self
    }

    /// Sets the `io_uring` submission queue size.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn ring_entries(mut self, n: u32) -> Self {
        assert!(n > 0, "ring_entries must be > 0");

        self.config.ring_entries = n;
        self
    }

    /// Names the reactor thread.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Returns the backend [`build`](Self::build) would start.
    pub fn resolved_backend(&self) -> Backend {
        match self.backend {
            Backend::IoUring if io_uring_supported() => Backend::IoUring,
            _ => Backend::Epoll,
        }
    }

    /// Starts the reactor thread.
    pub fn build(self) -> io::Result<Arc<dyn AsyncIo>> {
        let backend = self.resolved_backend();
        if backend != self.backend {
            tracing::debug!(preferred = %self.backend, "io_uring unsupported, using epoll");
        }

        let io: Arc<dyn AsyncIo> = match backend {
            Backend::IoUring => Arc::new(UringIo::start(&self.config)?),
            Backend::Epoll => Arc::new(EpollIo::start(&self.config)?),
        };

        tracing::debug!(backend = %backend, thread = %self.config.thread_name, "reactor built");
        Ok(io)
    }
}

impl Default for AsyncIoBuilder {
    fn default() -> Self {
        Self::new()
    }
}
