//! Ordered queue feeding the background workers
//!
//! Producers append each task to the durable log first and then send it on a
//! flume channel. A single worker drains tasks strictly in FIFO order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::database::background_tasks::LoggedTask;
use crate::database::{Database, DatabaseError};

use super::task::BackgroundTask;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("failed to log background task: {0}")]
    Database(#[from] DatabaseError),
    #[error("background queue receiver has been dropped")]
    Closed,
}

/// A task on its way to a worker, with its durable log id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    pub id: i64,
    pub task: BackgroundTask,
}

impl From<LoggedTask> for QueuedTask {
    fn from(logged: LoggedTask) -> Self {
        Self {
            id: logged.id,
            task: logged.task,
        }
    }
}

/// Producer handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BackgroundQueue {
    tx: flume::Sender<QueuedTask>,
    db: Database,
    /// Enqueued but not yet finished
    pending: Arc<AtomicUsize>,
}

/// Consumer side, given to the workers.
#[derive(Debug, Clone)]
pub struct BackgroundReceiver {
    rx: flume::Receiver<QueuedTask>,
    pending: Arc<AtomicUsize>,
}

impl BackgroundQueue {
    pub fn new(db: Database) -> (Self, BackgroundReceiver) {
        let (tx, rx) = flume::unbounded();
        let pending = Arc::new(AtomicUsize::new(0));
        (
            Self {
                tx,
                db,
                pending: pending.clone(),
            },
            BackgroundReceiver { rx, pending },
        )
    }

    /// Log a task durably, then hand it to the workers.
    pub async fn enqueue(&self, task: BackgroundTask) -> Result<(), QueueError> {
        let id = self.db.append_background_task(&task).await?;
        tracing::trace!(id, task = %task, "queued background task");
        self.send(QueuedTask { id, task })
    }

    /// Re-queue tasks left in the durable log by a previous run, oldest first.
    pub async fn replay_logged(&self) -> Result<usize, QueueError> {
        let logged = self.db.load_background_tasks().await?;
        let count = logged.len();
        for entry in logged {
            self.send(entry.into())?;
        }
        if count > 0 {
            tracing::info!(count, "replaying background tasks from a previous run");
        }
        Ok(count)
    }

    fn send(&self, queued: QueuedTask) -> Result<(), QueueError> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(queued).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            QueueError::Closed
        })
    }

    /// Tasks enqueued and not yet finished by a worker.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BackgroundReceiver {
    pub async fn recv(&self) -> Option<QueuedTask> {
        self.rx.recv_async().await.ok()
    }

    pub fn try_recv(&self) -> Option<QueuedTask> {
        self.rx.try_recv().ok()
    }

    /// Mark one received task as finished, applied or not.
    pub fn task_done(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}
