mod common;

use common::{CA_PEM, SERVER_CERT_PEM, SERVER_KEY_PEM, backends, connected_pair, init_tracing, reactor};
use corio::crypto::{AcceptMode, ConnectMode, NullCryptoEngine, TlsCryptoEngine};
use corio::net::ServerSocket;
use corio::socket::{self, AsyncCryptoSocket, SocketKind};
use corio::{Error, sync_wait};

fn server_engine(mode: AcceptMode) -> TlsCryptoEngine {
    TlsCryptoEngine::builder()
        .server_pem(SERVER_CERT_PEM, SERVER_KEY_PEM)
        .expect("Failed to load server certificate")
        .accept_mode(mode)
        .connect_mode(ConnectMode::Plaintext)
        .build()
        .expect("Failed to build server engine")
}

fn client_engine(server_name: &str) -> TlsCryptoEngine {
    TlsCryptoEngine::builder()
        .client_ca_pem(CA_PEM)
        .expect("Failed to load CA")
        .server_name(server_name)
        .accept_mode(AcceptMode::Plaintext)
        .build()
        .expect("Failed to build client engine")
}

/// Reads until `len` bytes arrived or the stream ended.
async fn read_exactly(socket: &mut dyn AsyncCryptoSocket, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut buf = [0u8; 512];

    while out.len() < len {
        let n = socket.read(&mut buf).await;
        assert!(n > 0, "read returned {n}");
        out.extend_from_slice(&buf[..n as usize]);
    }

    out
}

#[test]
fn test_plaintext_sockets() {
    for backend in backends() {
        let io = reactor(backend);
        let server = ServerSocket::bind("127.0.0.1:0").expect("Failed to bind listener");

        sync_wait(async {
            let (client, accepted) = connected_pair(io.as_ref(), &server).await;
            let mut client = socket::connect(io.clone(), client, &NullCryptoEngine).await;
            let mut accepted = socket::accept(io.clone(), accepted, &NullCryptoEngine).await;

            assert_eq!(client.kind(), SocketKind::Raw);
            assert_eq!(accepted.kind(), SocketKind::Raw);

            assert_eq!(client.write(b"plain").await, 5);
            assert_eq!(read_exactly(accepted.as_mut(), 5).await, b"plain");
        });

        io.shutdown();
    }
}

#[test]
fn test_tls_round_trip() {
    init_tracing();

    let server_engine = server_engine(AcceptMode::Tls);
    let client_engine = client_engine("localhost");

    for backend in backends() {
        let io = reactor(backend);
        let server = ServerSocket::bind("127.0.0.1:0").expect("Failed to bind listener");

        sync_wait(async {
            let (client, accepted) = connected_pair(io.as_ref(), &server).await;
            let (mut client, mut accepted) = corio::join!(
                socket::connect(io.clone(), client, &client_engine),
                socket::accept(io.clone(), accepted, &server_engine)
            );

            assert_eq!(client.kind(), SocketKind::Tls, "{backend}");
            assert_eq!(accepted.kind(), SocketKind::Tls, "{backend}");

            let request: Vec<u8> = (0..1000).map(|i| (i % 256) as u8).collect();
            assert_eq!(client.write(&request).await, 1000);
            assert_eq!(read_exactly(accepted.as_mut(), 1000).await, request);

            assert_eq!(accepted.write(b"ack").await, 3);
            assert_eq!(read_exactly(client.as_mut(), 3).await, b"ack");
        });

        io.shutdown();
    }
}

#[test]
fn test_sniff_detects_tls() {
    let server_engine = server_engine(AcceptMode::Sniff);
    let client_engine = client_engine("localhost");

    for backend in backends() {
        let io = reactor(backend);
        let server = ServerSocket::bind("127.0.0.1:0").expect("Failed to bind listener");

        sync_wait(async {
            let (client, accepted) = connected_pair(io.as_ref(), &server).await;
            let (mut client, mut accepted) = corio::join!(
                socket::connect(io.clone(), client, &client_engine),
                socket::accept(io.clone(), accepted, &server_engine)
            );

            assert_eq!(accepted.kind(), SocketKind::Tls, "{backend}");
            assert_eq!(client.write(b"sniffed").await, 7);
            assert_eq!(read_exactly(accepted.as_mut(), 7).await, b"sniffed");
        });

        io.shutdown();
    }
}

#[test]
fn test_sniff_keeps_plaintext_prefix() {
    const REQUEST: &[u8] = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";

    let server_engine = server_engine(AcceptMode::Sniff);

    for backend in backends() {
        let io = reactor(backend);
        let server = ServerSocket::bind("127.0.0.1:0").expect("Failed to bind listener");

        sync_wait(async {
            let (client, accepted) = connected_pair(io.as_ref(), &server).await;
            assert_eq!(io.write(&client, REQUEST).await, REQUEST.len() as isize);

            let mut accepted = socket::accept(io.clone(), accepted, &server_engine).await;
            assert_eq!(accepted.kind(), SocketKind::Raw, "{backend}");
            assert_eq!(read_exactly(accepted.as_mut(), REQUEST.len()).await, REQUEST);
        });

        io.shutdown();
    }
}

#[test]
fn test_sniff_short_plaintext_then_close() {
    let server_engine = server_engine(AcceptMode::Sniff);
    let io = reactor(corio::Backend::Epoll);
    let server = ServerSocket::bind("127.0.0.1:0").expect("Failed to bind listener");

    sync_wait(async {
        let (client, accepted) = connected_pair(io.as_ref(), &server).await;
        assert_eq!(io.write(&client, &[22, 3]).await, 2);
        drop(client);

        // Two bytes that could start a ClientHello, then EOF: plaintext.
        let mut accepted = socket::accept(io.clone(), accepted, &server_engine).await;
        assert_eq!(accepted.kind(), SocketKind::Raw);
        assert_eq!(read_exactly(accepted.as_mut(), 2).await, [22, 3]);

        let mut buf = [0u8; 4];
        assert_eq!(accepted.read(&mut buf).await, 0);
    });

    io.shutdown();
}

#[test]
fn test_garbage_handshake_yields_invalid_socket() {
    init_tracing();

    let server_engine = server_engine(AcceptMode::Tls);

    for backend in backends() {
        let io = reactor(backend);
        let server = ServerSocket::bind("127.0.0.1:0").expect("Failed to bind listener");

        sync_wait(async {
            let (client, accepted) = connected_pair(io.as_ref(), &server).await;
            let garbage = [0x16u8, 0x03, 0x01, 0x00, 0x05, 0xff, 0xff, 0xff, 0xff, 0xff];
            assert_eq!(io.write(&client, &garbage).await, garbage.len() as isize);

            let mut accepted = socket::accept(io.clone(), accepted, &server_engine).await;
            assert_eq!(accepted.kind(), SocketKind::Invalid, "{backend}");
            assert!(accepted.handle().is_none());

            let mut buf = [0u8; 4];
            assert_eq!(accepted.read(&mut buf).await, -(libc::EINVAL as isize));
            assert_eq!(accepted.write(b"x").await, -(libc::EINVAL as isize));
        });

        io.shutdown();
    }
}

#[test]
fn test_wrong_server_name_fails_both_sides() {
    let server_engine = server_engine(AcceptMode::Tls);
    let client_engine = client_engine("example.com");
    let io = reactor(corio::Backend::Epoll);
    let server = ServerSocket::bind("127.0.0.1:0").expect("Failed to bind listener");

    sync_wait(async {
        let (client, accepted) = connected_pair(io.as_ref(), &server).await;
        let (client, accepted) = corio::join!(
            socket::connect(io.clone(), client, &client_engine),
            socket::accept(io.clone(), accepted, &server_engine)
        );

        assert_eq!(client.kind(), SocketKind::Invalid);
        assert_eq!(accepted.kind(), SocketKind::Invalid);
    });

    io.shutdown();
}

#[test]
fn test_invalid_handle_is_invalid_socket() {
    let io = reactor(corio::Backend::Epoll);
    let handle = corio::net::SocketHandle::invalid(-libc::ECONNREFUSED);

    let socket = sync_wait(socket::connect(io.clone(), handle, &NullCryptoEngine));
    assert_eq!(socket.kind(), SocketKind::Invalid);

    io.shutdown();
}

#[test]
fn test_engine_builder_validation() {
    let missing_server = TlsCryptoEngine::builder().build();
    assert!(matches!(missing_server, Err(Error::Config(_))));

    let missing_client = TlsCryptoEngine::builder()
        .server_pem(SERVER_CERT_PEM, SERVER_KEY_PEM)
        .expect("Failed to load server certificate")
        .build();
    assert!(matches!(missing_client, Err(Error::Config(_))));

    let no_key = TlsCryptoEngine::builder().server_pem(SERVER_CERT_PEM, "");
    assert!(matches!(no_key, Err(Error::Config(_))));

    let no_ca = TlsCryptoEngine::builder().client_ca_pem("not a certificate");
    assert!(matches!(no_ca, Err(Error::Config(_))));
}
