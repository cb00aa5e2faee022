//! Bridge between callback-style resolution and awaiting tasks.
//!
//! Any asynchronous primitive that is not itself a future (a readiness
//! notification from the reactor, an `io_uring` completion, a callback
//! from another thread) can resume a waiting task through this module:
//! the waiter awaits [`awaiter_for`], and the primitive receives a
//! [`WaitingFor`] that publishes exactly one outcome when dropped.

use crate::error::Error;

use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// The outcome delivered to a waiter.
///
/// Exactly one of a value, an error, or a cancellation. Cancellation is
/// the "no result, no error" outcome used when the resolving side goes
/// away, typically because a reactor shut down.
pub enum Received<T> {
    Value(T),
    Error(Error),
    Cancelled,
}

impl<T> Received<T> {
    pub fn has_value(&self) -> bool {
        matches!(self, Received::Value(_))
    }

    pub fn has_error(&self) -> bool {
        matches!(self, Received::Error(_))
    }

    pub fn was_cancelled(&self) -> bool {
        matches!(self, Received::Cancelled)
    }

    /// Returns the value, if any.
    pub fn value(self) -> Option<T> {
        match self {
            Received::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Converts the outcome into a `Result`, mapping cancellation to
    /// [`Error::Cancelled`].
    pub fn into_result(self) -> crate::Result<T> {
        match self {
            Received::Value(value) => Ok(value),
            Received::Error(err) => Err(err),
            Received::Cancelled => Err(Error::Cancelled),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Received<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Received::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Received::Error(err) => f.debug_tuple("Error").field(err).finish(),
            Received::Cancelled => f.write_str("Cancelled"),
        }
    }
}

/// Shared slot between one waiter and one resolver.
pub struct PromiseState<T> {
    slot: Mutex<Slot<T>>,
}

struct Slot<T> {
    /// The published outcome, taken by the waiter.
    received: Option<Received<T>>,

    /// Waker of the waiting task, taken by the resolver.
    waker: Option<Waker>,

    /// Set once an outcome was published.
    resolved: bool,

    /// Set when the waiter went away before an outcome was published.
    abandoned: bool,
}

impl<T> PromiseState<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot {
                received: None,
                waker: None,
                resolved: false,
                abandoned: false,
            }),
        })
    }

    /// Returns `true` once an outcome has been published.
    pub fn is_resolved(&self) -> bool {
        self.slot.lock().resolved
    }

    /// Returns `true` if the waiter was dropped before an outcome was
    /// published. Nobody will ever observe the outcome of such a receiver.
    pub fn is_abandoned(&self) -> bool {
        self.slot.lock().abandoned
    }

    /// Marks the waiter as gone and forgets its waker.
    pub(crate) fn abandon(&self) {
        let waker = {
            let mut slot = self.slot.lock();
            if slot.resolved {
                return;
            }
            slot.abandoned = true;
            slot.waker.take()
        };
        drop(waker);
    }

    /// Publishes the outcome and wakes the waiter, if any.
    ///
    /// The waker is invoked after the lock is released: waking may run
    /// the waiting task inline on this thread.
    pub(crate) fn complete(&self, received: Received<T>) {
        let waker = {
            let mut slot = self.slot.lock();
            assert!(!slot.resolved, "receiver resolved twice");
            slot.resolved = true;
            slot.received = Some(received);
            slot.waker.take()
        };

        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Stores the waker to notify on resolution.
    pub(crate) fn register(&self, waker: &Waker) {
        let mut slot = self.slot.lock();
        if !slot.resolved {
            match &mut slot.waker {
                Some(current) if current.will_wake(waker) => {}
                current => *current = Some(waker.clone()),
            }
        }
    }

    /// Takes the outcome if published, registering `cx` otherwise.
    pub(crate) fn poll_take(&self, cx: &mut Context<'_>) -> Poll<Received<T>> {
        let mut slot = self.slot.lock();

        if slot.resolved {
            let received = slot
                .received
                .take()
                .expect("received value already consumed");
            return Poll::Ready(received);
        }

        match &mut slot.waker {
            Some(current) if current.will_wake(cx.waker()) => {}
            current => *current = Some(cx.waker().clone()),
        }

        Poll::Pending
    }
}

/// The resolving half of a [`PromiseState`].
///
/// Whoever holds a `WaitingFor` may set one outcome on it. The outcome is
/// published, and the waiter resumed, when the `WaitingFor` is dropped,
/// from whichever thread drops it. Dropping without setting anything
/// publishes [`Received::Cancelled`].
///
/// Setting a second outcome is a contract violation and panics.
pub struct WaitingFor<T> {
    state: Arc<PromiseState<T>>,
    outcome: Option<Received<T>>,
}

impl<T> WaitingFor<T> {
    pub(crate) fn new(state: Arc<PromiseState<T>>) -> Self {
        Self {
            state,
            outcome: None,
        }
    }

    pub fn set_value(&mut self, value: T) {
        self.set(Received::Value(value));
    }

    pub fn set_error(&mut self, error: Error) {
        self.set(Received::Error(error));
    }

    pub fn set_cancelled(&mut self) {
        self.set(Received::Cancelled);
    }

    /// Returns `true` if an outcome is already set but not yet published.
    pub fn is_set(&self) -> bool {
        self.outcome.is_some()
    }

    /// Returns `true` if the awaiting side was dropped before this
    /// receiver was resolved.
    pub fn is_abandoned(&self) -> bool {
        self.state.is_abandoned()
    }

    fn set(&mut self, received: Received<T>) {
        assert!(self.outcome.is_none(), "receiver resolved twice");
        self.outcome = Some(received);
    }
}

impl<T> Drop for WaitingFor<T> {
    fn drop(&mut self) {
        let received = self.outcome.take().unwrap_or(Received::Cancelled);
        self.state.complete(received);
    }
}

impl<T> fmt::Debug for WaitingFor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitingFor")
            .field("set", &self.is_set())
            .finish()
    }
}

/// Suspends the caller until the [`WaitingFor`] handed to `f` is released.
///
/// On first poll the waiter's waker is registered, fresh state is
/// allocated, and `f` is invoked with the resolving half. `f` may set a
/// value and drop the `WaitingFor` right away (the await then completes
/// without suspending), or move it somewhere that resolves it later.
///
/// # Examples
///
/// ```rust,ignore
/// let received = awaiter_for(|mut waiting: WaitingFor<u32>| {
///     std::thread::spawn(move || waiting.set_value(7));
/// })
/// .await;
/// assert_eq!(received.value(), Some(7));
/// ```
pub fn awaiter_for<T, F>(f: F) -> AwaiterFor<T, F>
where
    F: FnOnce(WaitingFor<T>),
{
    AwaiterFor {
        start: Some(f),
        state: PromiseState::new(),
    }
}

/// Future returned by [`awaiter_for`].
pub struct AwaiterFor<T, F> {
    start: Option<F>,
    state: Arc<PromiseState<T>>,
}

// `F` is moved out by value and never pinned.
impl<T, F> Unpin for AwaiterFor<T, F> {}

impl<T, F> Future for AwaiterFor<T, F>
where
    F: FnOnce(WaitingFor<T>),
{
    type Output = Received<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Received<T>> {
        if let Some(start) = self.start.take() {
            // Register first: `start` may hand the receiver to another
            // thread that resolves it before we get to poll again.
            self.state.register(cx.waker());
            start(WaitingFor::new(self.state.clone()));
        }

        self.state.poll_take(cx)
    }
}

impl<T, F> Drop for AwaiterFor<T, F> {
    fn drop(&mut self) {
        // Started but never resolved: let the resolving side know.
        if self.start.is_none() {
            self.state.abandon();
        }
    }
}
