#![allow(dead_code)]

use corio::net::{ServerSocket, SocketHandle};
use corio::{AsyncIo, AsyncIoBuilder, Backend};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub const CA_PEM: &str = include_str!("../certs/ca.pem");
pub const SERVER_CERT_PEM: &str = include_str!("../certs/server.pem");
pub const SERVER_KEY_PEM: &str = include_str!("../certs/server.key");

/// Routes `tracing` output to the test harness, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Every backend the running kernel supports.
pub fn backends() -> Vec<Backend> {
    let mut backends = vec![Backend::Epoll];
    if corio::io_uring_supported() {
        backends.push(Backend::IoUring);
    }
    backends
}

pub fn reactor(backend: Backend) -> Arc<dyn AsyncIo> {
    let io = AsyncIoBuilder::new()
        .prefer(backend)
        .thread_name(format!("corio-test-{backend}"))
        .build()
        .expect("Failed to start reactor");

    assert_eq!(io.backend(), backend);
    io
}

/// Connects to `server` and accepts the connection, concurrently.
pub async fn connected_pair(io: &dyn AsyncIo, server: &ServerSocket) -> (SocketHandle, SocketHandle) {
    let addr = server.local_addr().expect("Failed to get local address");
    let (client, accepted) = corio::join!(io.connect(addr), io.accept(server));

    assert!(client.valid(), "connect failed: {}", client.error());
    assert!(accepted.valid(), "accept failed: {}", accepted.error());

    (client, accepted)
}
