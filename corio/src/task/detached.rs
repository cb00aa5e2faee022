use crate::error::PanicPayload;

use super::state::{COMPLETED, IDLE, NOTIFIED, RUNNING};
use super::waker::make_waker;

use parking_lot::Mutex;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A self-owned task with no executor behind it.
///
/// A detached task is polled inline by whichever thread wakes it. In
/// practice that is the reactor thread resolving an I/O wait, so the
/// continuation runs right where the result became available.
///
/// The only strong references are held by outstanding wakers: once the
/// future completes, or once every waker is gone, the task is freed.
pub(crate) struct Detached {
    /// The future, `None` once completed.
    future: Mutex<Option<BoxFuture>>,

    /// Lifecycle state (IDLE, RUNNING, NOTIFIED, COMPLETED).
    state: AtomicUsize,
}

impl Detached {
    /// Polls the task until it is either pending with no wake-up
    /// recorded, or complete.
    ///
    /// The caller must have moved the state to `RUNNING`.
    fn run(self: &Arc<Self>) {
        let waker = make_waker(self.clone());
        let mut cx = Context::from_waker(&waker);

        loop {
            let poll = {
                let mut slot = self.future.lock();
                let Some(future) = slot.as_mut() else {
                    return;
                };

                match panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
                    Ok(poll) => poll,
                    Err(payload) => PanicPayload::new(payload).abort("detached task"),
                }
            };

            match poll {
                Poll::Pending => {
                    if self
                        .state
                        .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }

                    // Woken during the poll.
                    self.state.store(RUNNING, Ordering::Release);
                }
                Poll::Ready(()) => {
                    let finished = self.future.lock().take();
                    self.state.store(COMPLETED, Ordering::Release);
                    drop(finished);
                    return;
                }
            }
        }
    }

    /// Resumes the task on the current thread.
    ///
    /// If the task is idle it is polled right away. If it is being polled
    /// on some thread, it is flagged so that thread polls it again.
    pub(crate) fn wake(self: Arc<Self>) {
        loop {
            match self.state.load(Ordering::Acquire) {
                IDLE => {
                    if self
                        .state
                        .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.run();
                        return;
                    }
                }
                RUNNING => {
                    if self
                        .state
                        .compare_exchange(RUNNING, NOTIFIED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                }
                _ => return,
            }
        }
    }
}

/// Starts `future` as a fire-and-forget task.
///
/// The first step runs immediately on the calling thread. Every later
/// step runs on the thread that wakes the task. Nobody awaits the task,
/// so there is nowhere to deliver a failure: a panic escaping it is
/// logged and aborts the process.
///
/// # Examples
///
/// ```rust,ignore
/// corio::detach(async move {
///     let n = io.write(&handle, b"bye").await;
///     tracing::debug!(n, "farewell sent");
/// });
/// ```
pub fn detach<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let task = Arc::new(Detached {
        future: Mutex::new(Some(Box::pin(future))),
        state: AtomicUsize::new(RUNNING),
    });

    task.run();
}
