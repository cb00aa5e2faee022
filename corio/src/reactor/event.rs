use std::os::fd::RawFd;

/// Readiness reported by the poller for one file descriptor.
///
/// Error and hang-up conditions are folded into both directions so the
/// pending syscall observes the real error.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Event {
    pub(crate) fd: RawFd,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
}
