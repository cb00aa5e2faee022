mod common;

use common::{backends, connected_pair, init_tracing, reactor};
use corio::net::ServerSocket;
use corio::{AsyncIoBuilder, Backend, IoStats, detach, sync_wait};
use std::future::Future;
use std::net::Shutdown;
use std::os::unix::process::ExitStatusExt;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::process::Command;
use std::sync::{Arc, mpsc};
use std::task::{Context, Wake, Waker};
use std::thread;
use std::time::Duration;

#[test]
fn test_hello_over_every_backend() {
    init_tracing();

    for backend in backends() {
        let io = reactor(backend);
        let server = ServerSocket::bind("127.0.0.1:0").expect("Failed to bind listener");

        sync_wait(async {
            let (client, accepted) = connected_pair(io.as_ref(), &server).await;

            assert_eq!(io.write(&client, b"hello").await, 5, "{backend}");

            let mut buf = [0u8; 5];
            let mut filled = 0;
            while filled < buf.len() {
                let n = io.read(&accepted, &mut buf[filled..]).await;
                assert!(n > 0, "{backend}: read returned {n}");
                filled += n as usize;
            }
            assert_eq!(&buf, b"hello");

            assert_eq!(io.write(&accepted, b"world").await, 5);
            let mut reply = [0u8; 16];
            let n = io.read(&client, &mut reply).await;
            assert!(n > 0);
            assert!(b"world".starts_with(&reply[..n as usize]));
        });

        io.shutdown();
        assert_eq!(io.stats(), IoStats::default(), "{backend}");
    }
}

#[test]
fn test_read_returns_zero_on_peer_close() {
    for backend in backends() {
        let io = reactor(backend);
        let server = ServerSocket::bind("127.0.0.1:0").expect("Failed to bind listener");

        sync_wait(async {
            let (client, accepted) = connected_pair(io.as_ref(), &server).await;
            client.shutdown(Shutdown::Write).expect("Failed to shut down");

            let mut buf = [0u8; 8];
            assert_eq!(io.read(&accepted, &mut buf).await, 0, "{backend}");
        });

        io.shutdown();
    }
}

#[test]
fn test_large_transfer() {
    const LEN: usize = 1 << 20;

    for backend in backends() {
        let io = reactor(backend);
        let server = ServerSocket::bind("127.0.0.1:0").expect("Failed to bind listener");

        let received = sync_wait(async {
            let (client, accepted) = connected_pair(io.as_ref(), &server).await;
            let payload: Vec<u8> = (0..LEN).map(|i| (i % 251) as u8).collect();

            let writer = async {
                let mut sent = 0;
                while sent < payload.len() {
                    let n = io.write(&client, &payload[sent..]).await;
                    assert!(n > 0, "write returned {n}");
                    sent += n as usize;
                }
            };

            let reader = async {
                let mut out = Vec::with_capacity(LEN);
                let mut buf = vec![0u8; 64 * 1024];
                while out.len() < LEN {
                    let n = io.read(&accepted, &mut buf).await;
                    assert!(n > 0, "read returned {n}");
                    out.extend_from_slice(&buf[..n as usize]);
                }
                out
            };

            let ((), out) = corio::join!(writer, reader);
            (payload, out)
        });

        assert_eq!(received.0, received.1, "{backend}");
        io.shutdown();
    }
}

#[test]
fn test_connect_refused() {
    for backend in backends() {
        let io = reactor(backend);

        // Grab a free port, then close the listener so nobody answers.
        let addr = {
            let server = ServerSocket::bind("127.0.0.1:0").expect("Failed to bind listener");
            server.local_addr().expect("Failed to get local address")
        };

        let handle = sync_wait(io.connect(addr));
        assert!(!handle.valid(), "{backend}");
        assert_eq!(handle.error(), -libc::ECONNREFUSED, "{backend}");

        io.shutdown();
    }
}

#[test]
fn test_schedule_moves_to_reactor_thread() {
    for backend in backends() {
        let io = reactor(backend);
        assert!(!io.in_thread());

        let (tx, rx) = mpsc::channel();
        let task_io = io.clone();
        detach(async move {
            let scheduled = task_io.schedule().await;
            tx.send((scheduled, task_io.in_thread())).expect("Failed to send");
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok((true, true)), "{backend}");
        io.shutdown();
    }
}

#[test]
fn test_shutdown_cancels_pending_read() {
    init_tracing();

    for backend in backends() {
        let io = reactor(backend);
        let server = ServerSocket::bind("127.0.0.1:0").expect("Failed to bind listener");
        let (_client, accepted) = sync_wait(connected_pair(io.as_ref(), &server));

        let result = thread::scope(|scope| {
            let reader = scope.spawn(|| {
                let mut buf = [0u8; 8];
                sync_wait(io.read(&accepted, &mut buf))
            });

            thread::sleep(Duration::from_millis(100));
            io.shutdown();

            reader.join().expect("Reader thread panicked")
        });

        assert_eq!(result, -(libc::ECANCELED as isize), "{backend}");
        assert!(!sync_wait(io.schedule()), "{backend}");
        assert_eq!(io.stats(), IoStats::default());
    }
}

#[test]
fn test_abandoned_read_does_not_block_the_next_one() {
    init_tracing();

    for backend in backends() {
        let io = reactor(backend);
        let server = ServerSocket::bind("127.0.0.1:0").expect("Failed to bind listener");
        let (client, accepted) = sync_wait(connected_pair(io.as_ref(), &server));

        let mut buf = [0u8; 4];
        {
            let mut abandoned = io.read(&accepted, &mut buf);
            let mut cx = Context::from_waker(Waker::noop());
            assert!(Pin::new(&mut abandoned).poll(&mut cx).is_pending(), "{backend}");
        }

        let (n, written) = sync_wait(async {
            corio::join!(io.read(&accepted, &mut buf), io.write(&client, b"ping"))
        });
        assert_eq!(written, 4, "{backend}");
        assert!(n > 0, "{backend}: read returned {n}");
        assert!(b"ping".starts_with(&buf[..n as usize]), "{backend}");

        io.shutdown();
        assert_eq!(io.stats(), IoStats::default(), "{backend}");
    }
}

#[test]
fn test_second_pending_read_on_one_handle_is_rejected() {
    for backend in backends() {
        let io = reactor(backend);
        let server = ServerSocket::bind("127.0.0.1:0").expect("Failed to bind listener");
        let (client, accepted) = sync_wait(connected_pair(io.as_ref(), &server));

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut first = [0u8; 4];
            let mut second = [0u8; 4];
            sync_wait(async {
                corio::join!(io.read(&accepted, &mut first), io.read(&accepted, &mut second))
            })
        }));

        let payload = outcome.expect_err("Second concurrent read was accepted");
        let message = payload
            .downcast_ref::<String>()
            .map(String::as_str)
            .unwrap_or_default();
        assert!(message.contains("already pending"), "{backend}: {message}");

        // The first read went away with the panic; the handle is usable again.
        let mut buf = [0u8; 4];
        let (n, written) = sync_wait(async {
            corio::join!(io.read(&accepted, &mut buf), io.write(&client, b"pong"))
        });
        assert_eq!(written, 4, "{backend}");
        assert!(n > 0, "{backend}: read returned {n}");

        io.shutdown();
    }
}

#[test]
fn test_read_and_write_may_overlap_on_one_handle() {
    for backend in backends() {
        let io = reactor(backend);
        let server = ServerSocket::bind("127.0.0.1:0").expect("Failed to bind listener");
        let (client, accepted) = sync_wait(connected_pair(io.as_ref(), &server));

        let mut buf = [0u8; 2];
        let (n, written, _) = sync_wait(async {
            corio::join!(
                io.read(&accepted, &mut buf),
                io.write(&accepted, b"up"),
                io.write(&client, b"hi")
            )
        });
        assert_eq!(written, 2, "{backend}");
        assert!(n > 0, "{backend}");

        io.shutdown();
    }
}

const ABORT_CHILD_ENV: &str = "CORIO_REACTOR_ABORT_CHILD";

struct PanickingWaker;

impl Wake for PanickingWaker {
    fn wake(self: Arc<Self>) {
        panic!("waker failed");
    }
}

#[test]
fn test_panic_on_reactor_thread_aborts_the_process() {
    if std::env::var_os(ABORT_CHILD_ENV).is_some() {
        // The reactor resumes the task through a waker that panics.
        let io = reactor(Backend::Epoll);
        let waker = Waker::from(Arc::new(PanickingWaker));
        let mut cx = Context::from_waker(&waker);
        let mut scheduled = io.schedule();
        let _ = Pin::new(&mut scheduled).poll(&mut cx);

        thread::sleep(Duration::from_secs(10));
        return;
    }

    let exe = std::env::current_exe().expect("Failed to locate test binary");
    let output = Command::new(exe)
        .args([
            "--exact",
            "test_panic_on_reactor_thread_aborts_the_process",
            "--nocapture",
            "--test-threads=1",
        ])
        .env(ABORT_CHILD_ENV, "1")
        .output()
        .expect("Failed to run child test");

    assert_eq!(
        output.status.signal(),
        Some(libc::SIGABRT),
        "child exited with {:?}",
        output.status
    );
}

#[test]
fn test_operations_after_shutdown_fail() {
    for backend in backends() {
        let io = reactor(backend);
        io.shutdown();
        io.shutdown();

        let server = ServerSocket::bind("127.0.0.1:0").expect("Failed to bind listener");
        let handle = sync_wait(io.accept(&server));
        assert!(!handle.valid(), "{backend}");
        assert_eq!(handle.error(), -libc::ECANCELED);
    }
}

#[test]
fn test_invalid_handle_reports_its_error() {
    let io = reactor(Backend::Epoll);
    let handle = corio::net::SocketHandle::invalid(-libc::ENOTCONN);

    let mut buf = [0u8; 4];
    assert_eq!(sync_wait(io.read(&handle, &mut buf)), -(libc::ENOTCONN as isize));
    assert_eq!(sync_wait(io.write(&handle, b"x")), -(libc::ENOTCONN as isize));

    io.shutdown();
}

#[test]
fn test_stats_track_pending_operations() {
    let io = AsyncIoBuilder::new()
        .poll_timeout(Duration::from_millis(10))
        .build()
        .expect("Failed to start reactor");
    let server = ServerSocket::bind("127.0.0.1:0").expect("Failed to bind listener");

    thread::scope(|scope| {
        let acceptor = scope.spawn(|| sync_wait(io.accept(&server)));

        let mut waited = Duration::ZERO;
        while io.stats().pending_ops == 0 && waited < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(10));
            waited += Duration::from_millis(10);
        }
        assert_eq!(io.stats().pending_ops, 1);
        assert_eq!(io.stats().registered_fds, 1);

        let addr = server.local_addr().expect("Failed to get local address");
        let client = std::net::TcpStream::connect(addr).expect("Failed to connect");

        let accepted = acceptor.join().expect("Acceptor thread panicked");
        assert!(accepted.valid());
        drop(client);
    });

    io.shutdown();
    assert_eq!(io.stats(), IoStats::default());
}

#[corio::test(io)]
async fn test_entry_macro_binds_reactor() {
    let server = ServerSocket::bind("127.0.0.1:0").expect("Failed to bind listener");
    let (client, accepted) = connected_pair(io.as_ref(), &server).await;

    assert_eq!(io.write(&client, b"ping").await, 4);
    let mut buf = [0u8; 4];
    assert_eq!(io.read(&accepted, &mut buf).await, 4);
    assert_eq!(&buf, b"ping");
}

#[corio::test]
async fn test_entry_macro_without_reactor() {
    let value = corio::Lazy::ready(3).await;
    assert_eq!(value, 3);
}
