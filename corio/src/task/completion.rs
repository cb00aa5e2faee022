//! Adapters from a task to a blocking wait, a standalone future, or a
//! callback.

use super::detached::detach;
use super::lazy::Lazy;
use super::received::{PromiseState, Received, WaitingFor};
use crate::error::{Error, PanicPayload};

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, Thread};

/// Parks a thread until its waker fires.
struct ThreadNotify {
    thread: Thread,
    notified: AtomicBool,
}

impl ThreadNotify {
    fn current() -> Arc<Self> {
        Arc::new(Self {
            thread: thread::current(),
            notified: AtomicBool::new(false),
        })
    }

    fn park(&self) {
        while !self.notified.swap(false, Ordering::Acquire) {
            thread::park();
        }
    }
}

impl Wake for ThreadNotify {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.notified.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

/// Blocks the current thread until `future` completes.
///
/// The future is polled on the calling thread; it does not need to be
/// `'static` or `Send`. A panic inside the future unwinds out of
/// `sync_wait`.
///
/// Calling this from a reactor thread deadlocks that reactor.
///
/// # Examples
///
/// ```rust
/// let value = corio::sync_wait(async { 40 + 2 });
/// assert_eq!(value, 42);
/// ```
pub fn sync_wait<F: Future>(future: F) -> F::Output {
    debug_assert!(
        !crate::reactor::context::on_reactor_thread(),
        "sync_wait called on a reactor thread"
    );

    let notify = ThreadNotify::current();
    let waker = Waker::from(notify.clone());
    let mut cx = Context::from_waker(&waker);
    let mut future = pin!(future);

    loop {
        if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
            return output;
        }

        notify.park();
    }
}

/// Catches a panic raised while polling the inner future.
struct CatchUnwind<F> {
    inner: F,
}

impl<F: Future + Unpin> Future for CatchUnwind<F> {
    type Output = Result<F::Output, PanicPayload>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = &mut self.inner;
        match panic::catch_unwind(AssertUnwindSafe(|| Pin::new(inner).poll(cx))) {
            Ok(Poll::Ready(value)) => Poll::Ready(Ok(value)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(PanicPayload::new(payload))),
        }
    }
}

/// Drives `lazy` on a detached task and resolves `waiting` with its outcome.
fn spawn_into<T>(lazy: Lazy<'static, T>, mut waiting: WaitingFor<T>)
where
    T: Send + 'static,
{
    detach(async move {
        match (CatchUnwind { inner: lazy }).await {
            Ok(value) => waiting.set_value(value),
            Err(payload) => waiting.set_error(Error::Panicked(payload)),
        }
    });
}

/// Starts `lazy` right away and returns a handle to its outcome.
///
/// The returned [`CompletionFuture`] can be awaited from any executor or
/// blocked on with [`CompletionFuture::wait`]. A panic inside the task is
/// delivered as [`Error::Panicked`].
pub fn make_future<T>(lazy: Lazy<'static, T>) -> CompletionFuture<T>
where
    T: Send + 'static,
{
    let state = PromiseState::new();
    spawn_into(lazy, WaitingFor::new(state.clone()));

    CompletionFuture { state }
}

/// Starts `lazy` right away and calls `callback` exactly once with its
/// outcome, on whichever thread finishes the task.
pub fn completion_callback<T, C>(lazy: Lazy<'static, T>, callback: C)
where
    T: Send + 'static,
    C: FnOnce(Received<T>) + Send + 'static,
{
    detach(async move {
        let received = match (CatchUnwind { inner: lazy }).await {
            Ok(value) => Received::Value(value),
            Err(payload) => Received::Error(Error::Panicked(payload)),
        };

        callback(received);
    });
}

/// The outcome of a task started with [`make_future`].
pub struct CompletionFuture<T> {
    state: Arc<PromiseState<T>>,
}

impl<T> CompletionFuture<T> {
    /// Returns `true` once the task has finished.
    pub fn is_ready(&self) -> bool {
        self.state.is_resolved()
    }

    /// Blocks the calling thread until the task finishes.
    pub fn wait(self) -> Received<T> {
        sync_wait(self)
    }
}

impl<T> Future for CompletionFuture<T> {
    type Output = Received<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Received<T>> {
        self.state.poll_take(cx)
    }
}
