use std::io;
use std::os::fd::RawFd;

/// Readiness directions an fd is registered for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    pub(crate) fn is_empty(self) -> bool {
        !self.read && !self.write
    }
}

/// Cross-thread wake-up signal backed by an `eventfd`.
///
/// Writing bumps the kernel counter and makes the fd readable; the
/// reactor polls it alongside the sockets and drains it when it fires.
pub(crate) struct Notifier(RawFd);

impl Notifier {
    pub(crate) fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self(fd))
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.0
    }

    /// Signals the reactor.
    pub(crate) fn notify(&self) {
        let buf: u64 = 1;
        unsafe {
            libc::write(self.0, &buf as *const u64 as *const _, 8);
        }
    }

    /// Resets the counter so the fd stops reporting readable.
    pub(crate) fn drain(&self) {
        let mut buf = 0u64;
        unsafe {
            libc::read(self.0, &mut buf as *mut u64 as *mut _, 8);
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        unsafe { libc::close(self.0) };
    }
}
