//! Filesystem-event pipeline: callbacks enqueue, workers apply.

pub mod callbacks;
pub mod queue;
pub mod task;
pub mod worker;

pub use callbacks::{FileSystemCallbacks, HeartbeatSnapshot};
pub use queue::{BackgroundQueue, BackgroundReceiver, QueueError, QueuedTask};
pub use task::BackgroundTask;
pub use worker::{ApplyError, BackgroundWorkers, NoStatusCache, StatusCache, TaskApplier};
