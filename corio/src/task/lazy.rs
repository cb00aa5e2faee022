use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A lazy, single-owner, one-shot asynchronous computation.
///
/// Creating a `Lazy` never starts any work: the wrapped body only runs
/// when the `Lazy` is awaited (polled). The body then executes directly
/// on the awaiting executor, and its output is handed straight back to
/// the awaiter once it completes.
///
/// A task's own failure travels either as an `Err` inside `T` or as a
/// panic, which unwinds into the awaiter exactly once. Dropping a `Lazy`
/// before it completes silently tears down whatever nested state the
/// body had built; nobody is resumed.
///
/// The lifetime parameter lets a task borrow from its caller (buffers,
/// socket handles), which is what the reactor operations rely on.
///
/// # Examples
///
/// ```rust,ignore
/// let task = Lazy::new(async { 40 + 2 });
/// assert_eq!(corio::sync_wait(task), 42);
/// ```
pub struct Lazy<'a, T> {
    /// The task body, `None` once the value has been handed out.
    body: Option<Pin<Box<dyn Future<Output = T> + Send + 'a>>>,
}

impl<'a, T> Lazy<'a, T> {
    /// Wraps a future into a lazy task.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'a,
    {
        Self {
            body: Some(Box::pin(future)),
        }
    }

    /// Creates a task that completes immediately with `value`.
    pub fn ready(value: T) -> Self
    where
        T: Send + 'a,
    {
        Self::new(std::future::ready(value))
    }

    /// Returns `true` once the task has produced its value.
    pub fn is_done(&self) -> bool {
        self.body.is_none()
    }
}

impl<T> Future for Lazy<'_, T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let body = self
            .body
            .as_mut()
            .expect("Lazy polled after completion");

        match body.as_mut().poll(cx) {
            Poll::Ready(value) => {
                // The frame is torn down as soon as the value is out.
                self.body = None;
                Poll::Ready(value)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for Lazy<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("done", &self.is_done())
            .finish()
    }
}
