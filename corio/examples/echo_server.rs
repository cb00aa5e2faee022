//! Example: echo server that answers plaintext and TLS on the same port.
//!
//! Run with `cargo run --example echo_server`, then talk to it with
//! `nc 127.0.0.1 9000` or
//! `openssl s_client -connect 127.0.0.1:9000 -CAfile corio/tests/certs/ca.pem`.

use corio::crypto::{AcceptMode, ConnectMode, TlsCryptoEngine};
use corio::net::ServerSocket;
use std::sync::Arc;

const CERT_PEM: &str = include_str!("../tests/certs/server.pem");
const KEY_PEM: &str = include_str!("../tests/certs/server.key");

#[corio::main(io)]
async fn main() {
    let engine = TlsCryptoEngine::builder()
        .server_pem(CERT_PEM, KEY_PEM)
        .expect("invalid certificate")
        .accept_mode(AcceptMode::Sniff)
        .connect_mode(ConnectMode::Plaintext)
        .build()
        .expect("invalid engine configuration");
    let engine = Arc::new(engine);

    let listener = ServerSocket::bind("127.0.0.1:9000").expect("failed to bind");
    println!("Echo server listening on 127.0.0.1:9000");

    loop {
        let handle = io.accept(&listener).await;
        if !handle.valid() {
            eprintln!("accept failed: {}", handle.error());
            break;
        }

        let io = io.clone();
        let engine = engine.clone();

        // Each client runs on its own detached task.
        corio::detach(async move {
            let mut socket = corio::socket::accept(io, handle, engine.as_ref()).await;
            println!("client connected ({:?})", socket.kind());

            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await;
                if n <= 0 {
                    break;
                }
                if socket.write(&buf[..n as usize]).await < 0 {
                    break;
                }
            }
        });
    }
}
