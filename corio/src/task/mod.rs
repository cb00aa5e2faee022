//! Task primitives.
//!
//! - [`Lazy`]: a one-shot computation that runs when awaited.
//! - [`awaiter_for`] / [`WaitingFor`]: resume a task from any callback.
//! - [`detach`]: fire-and-forget launch.
//! - [`ActiveWork`]: join a dynamic set of tasks.
//! - [`sync_wait`], [`make_future`], [`completion_callback`]: consume a
//!   task from outside the runtime.

mod active_work;
mod completion;
mod detached;
mod lazy;
mod received;
mod state;
mod waker;

pub use active_work::ActiveWork;
pub use completion::{CompletionFuture, completion_callback, make_future, sync_wait};
pub use detached::detach;
pub use lazy::Lazy;
pub use received::{AwaiterFor, PromiseState, Received, WaitingFor, awaiter_for};
