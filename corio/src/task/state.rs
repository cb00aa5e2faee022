/// Task is suspended and waiting for a wake-up.
pub(crate) const IDLE: usize = 0;

/// Task is being polled.
///
/// At most one thread may observe this state at a time.
pub(crate) const RUNNING: usize = 1;

/// Task was woken while being polled.
///
/// The polling thread re-polls once the current poll returns.
pub(crate) const NOTIFIED: usize = 2;

/// Task has completed and its future has been dropped.
pub(crate) const COMPLETED: usize = 3;
