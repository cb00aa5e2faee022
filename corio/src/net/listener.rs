use super::SocketHandle;
use crate::reactor::platform::{
    domain_of, socketaddr_to_storage, sys_bind, sys_ipv6_is_necessary, sys_listen,
    sys_parse_sockaddr, sys_set_reuseaddr, sys_socket,
};

use std::io;
use std::net::SocketAddr;

/// A non-blocking listening TCP socket.
///
/// Connections are accepted through a reactor with
/// [`AsyncIo::accept`](crate::AsyncIo::accept).
#[derive(Debug)]
pub struct ServerSocket {
    handle: SocketHandle,
}

impl ServerSocket {
    /// Binds a listening socket to `address`.
    ///
    /// The address must be a socket address string such as
    /// `"127.0.0.1:8080"` or `"[::1]:0"`. The socket is non-blocking, has
    /// `SO_REUSEADDR` set, and accepts IPv4-mapped peers when bound to an
    /// IPv6 address.
    pub fn bind(address: &str) -> io::Result<Self> {
        let addr = sys_parse_sockaddr(address)?;
        let domain = domain_of(&addr);
        let (storage, len) = socketaddr_to_storage(&addr);

        let handle = SocketHandle::new(sys_socket(domain)?);

        sys_set_reuseaddr(handle.fd())?;
        sys_ipv6_is_necessary(handle.fd(), domain)?;
        sys_bind(handle.fd(), &storage, len)?;
        sys_listen(handle.fd())?;

        tracing::debug!(fd = handle.fd(), %addr, "listening");

        Ok(Self { handle })
    }

    /// The bound address; resolves the port chosen for `:0`.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.handle.local_addr()
    }

    pub fn handle(&self) -> &SocketHandle {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::ServerSocket;

    #[test]
    fn binds_an_ephemeral_port() {
        let server = ServerSocket::bind("127.0.0.1:0").expect("bind");
        let addr = server.local_addr().expect("local addr");

        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn rejects_malformed_addresses() {
        let err = ServerSocket::bind("not an address").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }
}
