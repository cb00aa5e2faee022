use crate::reactor::Direction;
use crate::reactor::platform::{sys_close, sys_peername, sys_set_nodelay, sys_shutdown, sys_sockname};

use libc::EBADF;
use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

/// An owned socket file descriptor, or the error that prevented one.
///
/// A valid handle closes its descriptor on drop. An invalid handle
/// carries a negative `errno` describing why accept or connect failed;
/// every reactor operation on it returns that same error.
///
/// At most one read-direction operation (read or accept) and one
/// write-direction operation (write or connect) may be pending on a
/// handle at a time; starting a second one in the same direction panics.
pub struct SocketHandle {
    fd: RawFd,
    error: i32,
    reading: AtomicBool,
    writing: AtomicBool,
}

impl SocketHandle {
    /// Takes ownership of `fd`.
    pub fn new(fd: RawFd) -> Self {
        debug_assert!(fd >= 0);
        Self {
            fd,
            error: 0,
            reading: AtomicBool::new(false),
            writing: AtomicBool::new(false),
        }
    }

    /// An invalid handle carrying `error` (a negative `errno`).
    pub fn invalid(error: i32) -> Self {
        Self {
            fd: -1,
            error: if error < 0 { error } else { -EBADF },
            reading: AtomicBool::new(false),
            writing: AtomicBool::new(false),
        }
    }

    pub fn valid(&self) -> bool {
        self.fd >= 0
    }

    /// The raw descriptor, `-1` when invalid.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// The negative `errno` of an invalid handle, `0` otherwise.
    pub fn error(&self) -> i32 {
        self.error
    }

    /// Gives up ownership of the descriptor without closing it.
    pub fn release(mut self) -> RawFd {
        std::mem::replace(&mut self.fd, -1)
    }

    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        sys_set_nodelay(self.checked()?, nodelay)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sys_sockname(self.checked()?)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        sys_peername(self.checked()?)
    }

    /// Shuts down the read half, the write half, or both.
    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        sys_shutdown(self.checked()?, how)
    }

    /// Marks an operation in `direction` as pending until the returned
    /// guard is dropped.
    ///
    /// # Panics
    ///
    /// Panics if an operation in the same direction is already pending.
    pub(crate) fn begin(&self, direction: Direction) -> InFlight<'_> {
        let flag = match direction {
            Direction::Read => &self.reading,
            Direction::Write => &self.writing,
        };

        assert!(
            !flag.swap(true, Ordering::AcqRel),
            "concurrent {direction:?} on fd {} while one is already pending",
            self.fd
        );
        InFlight { flag }
    }

    fn checked(&self) -> io::Result<RawFd> {
        if self.valid() {
            Ok(self.fd)
        } else {
            Err(io::Error::from_raw_os_error(-self.error))
        }
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        if self.valid() {
            sys_close(self.fd);
        }
    }
}

/// A pending operation on a [`SocketHandle`]; see [`SocketHandle::begin`].
pub(crate) struct InFlight<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.valid() {
            f.debug_tuple("SocketHandle").field(&self.fd).finish()
        } else {
            f.debug_struct("SocketHandle")
                .field("error", &io::Error::from_raw_os_error(-self.error))
                .finish()
        }
    }
}
