use super::detached::detach;
use super::received::{WaitingFor, awaiter_for};

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Shared {
    /// Started tasks still running, plus one until `join` is called.
    pending: AtomicUsize,

    /// The suspended joiner, resolved by the last decrement.
    joiner: Mutex<Option<WaitingFor<()>>>,
}

impl Shared {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Released outside the lock: dropping it resumes the joiner.
            let joiner = self.joiner.lock().take();
            if let Some(mut joiner) = joiner {
                joiner.set_value(());
            }
        }
    }
}

/// Fan-out/fan-in over concurrently running tasks.
///
/// Each [`start`](ActiveWork::start) launches a detached task and bumps a
/// counter; each task decrements it when it finishes.
/// [`join`](ActiveWork::join) completes once every started task has
/// finished, whatever order they finished in.
///
/// An `ActiveWork` must be joined before it is dropped.
///
/// # Examples
///
/// ```rust,ignore
/// let mut work = ActiveWork::new();
/// for handle in &clients {
///     let io = io.clone();
///     work.start(async move { io.write(handle, b"ping").await; });
/// }
/// work.join().await;
/// ```
pub struct ActiveWork {
    shared: Arc<Shared>,
    joined: bool,
}

impl ActiveWork {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: AtomicUsize::new(1),
                joiner: Mutex::new(None),
            }),
            joined: false,
        }
    }

    /// Launches `future` and tracks it until completion.
    ///
    /// The future starts running immediately on the calling thread.
    pub fn start<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        assert!(!self.joined, "ActiveWork::start called after join");

        self.shared.pending.fetch_add(1, Ordering::AcqRel);

        let shared = self.shared.clone();
        detach(async move {
            future.await;
            shared.finish_one();
        });
    }

    /// Number of outstanding tasks, plus one until joined.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Waits for every started task to complete.
    ///
    /// Completes immediately when nothing is running. Joining twice is a
    /// contract violation.
    pub async fn join(&mut self) {
        assert!(!self.joined, "ActiveWork joined twice");
        self.joined = true;

        let shared = self.shared.clone();
        let _ = awaiter_for(move |waiting: WaitingFor<()>| {
            *shared.joiner.lock() = Some(waiting);
            shared.finish_one();
        })
        .await;
    }
}

impl Default for ActiveWork {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ActiveWork {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert!(
            self.joined && self.pending() == 0,
            "ActiveWork dropped with outstanding work"
        );
    }
}
