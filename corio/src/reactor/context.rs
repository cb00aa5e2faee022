use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

thread_local! {
    /// Id of the reactor whose loop runs on this thread, if any.
    static CURRENT_REACTOR: Cell<Option<usize>> = const { Cell::new(None) };
}

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

/// Allocates a process-unique reactor id.
pub(crate) fn next_id() -> usize {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Runs `f` with the current thread marked as the loop of reactor `id`.
pub(crate) fn enter<R>(id: usize, f: impl FnOnce() -> R) -> R {
    let prev = CURRENT_REACTOR.with(|current| current.replace(Some(id)));
    let out = f();
    CURRENT_REACTOR.with(|current| current.set(prev));

    out
}

/// Returns `true` on the loop thread of reactor `id`.
pub(crate) fn in_reactor(id: usize) -> bool {
    CURRENT_REACTOR.with(|current| current.get() == Some(id))
}

/// Returns `true` on any reactor's loop thread.
pub(crate) fn on_reactor_thread() -> bool {
    CURRENT_REACTOR.with(|current| current.get().is_some())
}
