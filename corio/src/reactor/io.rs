use super::poller::Interest;
use crate::task::WaitingFor;

use std::os::fd::RawFd;

/// Readiness direction an operation waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Direction {
    Read,
    Write,
}

/// Per-fd bookkeeping owned by the poll-based reactor thread.
///
/// Holds at most one pending reader and one pending writer; `registered`
/// mirrors what the kernel currently has for this fd.
pub(crate) struct FdContext {
    pub(crate) fd: RawFd,
    pub(crate) registered: Interest,

    /// Set when a waiter replaced an abandoned one. The fd may have been
    /// closed and its number reused since `registered` was recorded.
    pub(crate) stale: bool,

    reader: Option<WaitingFor<bool>>,
    writer: Option<WaitingFor<bool>>,
}

impl FdContext {
    pub(crate) fn new(fd: RawFd) -> Self {
        Self {
            fd,
            registered: Interest::default(),
            stale: false,
            reader: None,
            writer: None,
        }
    }

    /// Parks a waiter for `direction`.
    ///
    /// # Panics
    ///
    /// Panics if a waiter for the same direction is already pending:
    /// operations on one fd direction are strictly serialized. A waiter
    /// whose task was dropped does not count and is replaced.
    pub(crate) fn set_waiter(&mut self, direction: Direction, waiter: WaitingFor<bool>) {
        let slot = match direction {
            Direction::Read => &mut self.reader,
            Direction::Write => &mut self.writer,
        };

        if let Some(current) = slot {
            assert!(
                current.is_abandoned(),
                "concurrent {direction:?} on fd {} while one is already pending",
                self.fd
            );
            tracing::trace!(fd = self.fd, ?direction, "replacing abandoned waiter");
            self.stale = true;
        }
        *slot = Some(waiter);
    }

    /// Drops waiters whose tasks went away.
    pub(crate) fn prune(&mut self) {
        for slot in [&mut self.reader, &mut self.writer] {
            if slot.as_ref().is_some_and(WaitingFor::is_abandoned) {
                *slot = None;
            }
        }
    }

    /// The interest the kernel should have for the current waiters.
    pub(crate) fn wanted(&self) -> Interest {
        Interest {
            read: self.reader.is_some(),
            write: self.writer.is_some(),
        }
    }

    pub(crate) fn pending(&self) -> usize {
        usize::from(self.reader.is_some()) + usize::from(self.writer.is_some())
    }

    /// Moves the waiters matching the reported readiness into `ready`.
    pub(crate) fn take_ready(
        &mut self,
        readable: bool,
        writable: bool,
        ready: &mut Vec<WaitingFor<bool>>,
    ) {
        if readable {
            ready.extend(self.reader.take());
        }
        if writable {
            ready.extend(self.writer.take());
        }
    }

    /// Moves every waiter into `out`.
    pub(crate) fn take_all(&mut self, out: &mut Vec<WaitingFor<bool>>) {
        out.extend(self.reader.take());
        out.extend(self.writer.take());
    }
}

#[cfg(test)]
mod tests {
    use super::{Direction, FdContext};
    use crate::task::{PromiseState, Received, WaitingFor};

    use std::sync::Arc;

    fn waiter() -> (Arc<PromiseState<bool>>, WaitingFor<bool>) {
        let state = PromiseState::new();
        (state.clone(), WaitingFor::new(state))
    }

    #[test]
    fn wanted_tracks_pending_waiters() {
        let mut ctx = FdContext::new(3);
        assert!(ctx.wanted().is_empty());

        let (_, reader) = waiter();
        ctx.set_waiter(Direction::Read, reader);
        assert!(ctx.wanted().read);
        assert!(!ctx.wanted().write);

        let (_, writer) = waiter();
        ctx.set_waiter(Direction::Write, writer);
        assert_eq!(ctx.pending(), 2);
    }

    #[test]
    fn take_ready_only_takes_the_ready_direction() {
        let mut ctx = FdContext::new(3);
        let (read_state, reader) = waiter();
        let (write_state, writer) = waiter();
        ctx.set_waiter(Direction::Read, reader);
        ctx.set_waiter(Direction::Write, writer);

        let mut ready = Vec::new();
        ctx.take_ready(true, false, &mut ready);
        assert_eq!(ready.len(), 1);
        assert_eq!(ctx.pending(), 1);

        for mut waiter in ready {
            waiter.set_value(true);
        }
        assert!(read_state.is_resolved());
        assert!(!write_state.is_resolved());
    }

    #[test]
    fn dropped_waiters_resolve_as_cancelled() {
        let mut ctx = FdContext::new(3);
        let (state, reader) = waiter();
        ctx.set_waiter(Direction::Read, reader);

        let mut all = Vec::new();
        ctx.take_all(&mut all);
        drop(all);

        let received = crate::sync_wait(std::future::poll_fn(|cx| state.poll_take(cx)));
        assert!(matches!(received, Received::Cancelled));
    }

    #[test]
    fn abandoned_waiter_is_replaced() {
        let mut ctx = FdContext::new(3);
        let (first_state, first) = waiter();
        ctx.set_waiter(Direction::Read, first);
        ctx.registered = ctx.wanted();
        first_state.abandon();

        let (second_state, second) = waiter();
        ctx.set_waiter(Direction::Read, second);
        assert!(ctx.stale);
        assert_eq!(ctx.pending(), 1);

        let mut ready = Vec::new();
        ctx.take_ready(true, false, &mut ready);
        for mut waiter in ready {
            waiter.set_value(true);
        }
        assert!(second_state.is_resolved());
    }

    #[test]
    fn prune_drops_only_abandoned_waiters() {
        let mut ctx = FdContext::new(3);
        let (read_state, reader) = waiter();
        let (_write_state, writer) = waiter();
        ctx.set_waiter(Direction::Read, reader);
        ctx.set_waiter(Direction::Write, writer);

        read_state.abandon();
        ctx.prune();

        assert!(read_state.is_resolved());
        assert!(!ctx.wanted().read);
        assert!(ctx.wanted().write);
    }

    #[test]
    #[should_panic(expected = "already pending")]
    fn second_reader_is_a_contract_violation() {
        let mut ctx = FdContext::new(3);
        let (_, first) = waiter();
        let (_, second) = waiter();

        ctx.set_waiter(Direction::Read, first);
        ctx.set_waiter(Direction::Read, second);
    }
}
