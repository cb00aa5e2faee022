use super::context;
use super::poller::Notifier;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

struct Queue<C> {
    items: VecDeque<C>,
    closed: bool,
}

/// FIFO of commands handed to a reactor thread.
///
/// Any thread may push. Only the reactor loop drains. A push from a
/// foreign thread that makes the queue non-empty signals the notifier;
/// pushes from the loop thread itself never do, because the loop checks
/// [`has_pending`](Handoff::has_pending) before it blocks.
pub(crate) struct Handoff<C> {
    queue: Mutex<Queue<C>>,
    notifier: Arc<Notifier>,

    /// Id of the reactor that drains this queue.
    owner: usize,
}

impl<C> Handoff<C> {
    pub(crate) fn new(owner: usize, notifier: Arc<Notifier>) -> Self {
        Self {
            queue: Mutex::new(Queue {
                items: VecDeque::new(),
                closed: false,
            }),
            notifier,
            owner,
        }
    }

    /// Queues a command.
    ///
    /// Once the queue is closed the command is handed back.
    pub(crate) fn push(&self, command: C) -> Result<(), C> {
        let was_empty = {
            let mut queue = self.queue.lock();
            if queue.closed {
                return Err(command);
            }

            let was_empty = queue.items.is_empty();
            queue.items.push_back(command);
            was_empty
        };

        if was_empty && !context::in_reactor(self.owner) {
            self.notifier.notify();
        }

        Ok(())
    }

    /// Takes every queued command, in push order.
    pub(crate) fn drain(&self) -> VecDeque<C> {
        std::mem::take(&mut self.queue.lock().items)
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.queue.lock().items.is_empty()
    }

    /// Rejects further pushes and returns whatever was still queued.
    pub(crate) fn close(&self) -> VecDeque<C> {
        let mut queue = self.queue.lock();
        queue.closed = true;
        std::mem::take(&mut queue.items)
    }

    /// Wakes the loop without queueing anything.
    pub(crate) fn wake(&self) {
        self.notifier.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::Handoff;
    use crate::reactor::poller::Notifier;

    use std::sync::Arc;

    fn handoff() -> Handoff<u32> {
        let notifier = Arc::new(Notifier::new().expect("eventfd"));
        Handoff::new(usize::MAX, notifier)
    }

    #[test]
    fn drains_in_push_order() {
        let handoff = handoff();
        for i in 0..4 {
            handoff.push(i).expect("open queue");
        }

        assert!(handoff.has_pending());
        assert_eq!(handoff.drain().into_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert!(!handoff.has_pending());
    }

    #[test]
    fn close_returns_leftovers_and_rejects_pushes() {
        let handoff = handoff();
        handoff.push(7).expect("open queue");

        let leftovers = handoff.close();
        assert_eq!(leftovers.into_iter().collect::<Vec<_>>(), vec![7]);
        assert_eq!(handoff.push(8), Err(8));
        assert!(handoff.close().is_empty());
    }
}
