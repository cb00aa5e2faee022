use super::context;
use super::handoff::Handoff;
use super::poller::Notifier;
use super::IoStats;

use crate::error::PanicPayload;

use parking_lot::Mutex;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

/// State shared between a reactor's loop thread and its handles.
pub(crate) struct Shared<C> {
    pub(crate) id: usize,
    pub(crate) handoff: Handoff<C>,

    stopping: AtomicBool,
    registered_fds: AtomicUsize,
    pending_ops: AtomicUsize,
}

impl<C> Shared<C> {
    pub(crate) fn stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Publishes the loop's bookkeeping for [`ReactorThread::stats`].
    pub(crate) fn publish(&self, stats: IoStats) {
        self.registered_fds
            .store(stats.registered_fds, Ordering::Release);
        self.pending_ops.store(stats.pending_ops, Ordering::Release);
    }
}

/// A dedicated OS thread running one reactor loop.
///
/// The loop body is backend specific; this type owns the pieces every
/// backend shares: the command hand-off, the stop flag, published stats,
/// and the two-phase shutdown.
pub(crate) struct ReactorThread<C> {
    shared: Arc<Shared<C>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Send + 'static> ReactorThread<C> {
    /// Starts the loop thread.
    ///
    /// `run` receives the shared state and must return once
    /// [`Shared::stopping`] is observed.
    pub(crate) fn spawn<F>(name: &str, notifier: Arc<Notifier>, run: F) -> io::Result<Self>
    where
        F: FnOnce(Arc<Shared<C>>) + Send + 'static,
    {
        let id = context::next_id();
        let shared = Arc::new(Shared {
            id,
            handoff: Handoff::new(id, notifier),
            stopping: AtomicBool::new(false),
            registered_fds: AtomicUsize::new(0),
            pending_ops: AtomicUsize::new(0),
        });

        // The loop must never unwind: nothing else would resume its waiters.
        let thread_shared = shared.clone();
        let handle = thread::Builder::new().name(name.to_owned()).spawn(move || {
            context::enter(id, || {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| run(thread_shared))) {
                    PanicPayload::new(payload).abort("reactor loop");
                }
            })
        })?;

        tracing::debug!(reactor = id, thread = name, "reactor started");

        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Hands a command to the loop.
    ///
    /// A command rejected because the reactor is stopping is dropped,
    /// which resolves its waiter as cancelled.
    pub(crate) fn post(&self, command: C) {
        if let Err(rejected) = self.shared.handoff.push(command) {
            tracing::trace!(reactor = self.shared.id, "command rejected, reactor stopped");
            drop(rejected);
        }
    }

    pub(crate) fn in_thread(&self) -> bool {
        context::in_reactor(self.shared.id)
    }

    pub(crate) fn stats(&self) -> IoStats {
        IoStats {
            registered_fds: self.shared.registered_fds.load(Ordering::Acquire),
            pending_ops: self.shared.pending_ops.load(Ordering::Acquire),
        }
    }

    /// Stops the loop and joins its thread.
    ///
    /// Idempotent. Phase one sets the stop flag, closes the hand-off
    /// queue (cancelling whatever was still queued) and wakes the loop.
    /// Phase two joins the thread, unless called from the loop thread
    /// itself, where joining would deadlock.
    pub(crate) fn shutdown(&self) {
        if !self.shared.stopping.swap(true, Ordering::AcqRel) {
            tracing::debug!(reactor = self.shared.id, "reactor stopping");
        }

        let leftovers = self.shared.handoff.close();
        self.shared.handoff.wake();
        drop(leftovers);

        if self.in_thread() {
            return;
        }

        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if let Err(payload) = handle.join() {
                if !thread::panicking() {
                    std::panic::resume_unwind(payload);
                }
            }

            tracing::debug!(reactor = self.shared.id, "reactor joined");
        }
    }
}
