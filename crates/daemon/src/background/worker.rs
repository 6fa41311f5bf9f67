//! Workers that apply queued tasks to the stores

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::database::modified_paths::ModifiedPathsStore;
use crate::database::placeholders::PlaceholderStore;
use crate::database::{Database, DatabaseError};
use crate::lock::SessionContext;

use super::queue::{BackgroundReceiver, QueuedTask};
use super::task::BackgroundTask;

/// Externally exposed status cache that must not outlive a filesystem change.
pub trait StatusCache: Send + Sync {
    fn invalidate(&self);
}

/// Used when nothing caches status.
#[derive(Debug, Default)]
pub struct NoStatusCache;

impl StatusCache for NoStatusCache {
    fn invalidate(&self) {}
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("modified path {entry} was not recorded (retryable: {retryable})")]
    ModifiedPathRejected { entry: String, retryable: bool },
}

/// Applies one task's side effects to the placeholder and modified-paths stores.
pub struct TaskApplier {
    placeholders: PlaceholderStore,
    modified_paths: Arc<ModifiedPathsStore>,
    status_cache: Arc<dyn StatusCache>,
}

impl TaskApplier {
    pub fn new(
        placeholders: PlaceholderStore,
        modified_paths: Arc<ModifiedPathsStore>,
        status_cache: Arc<dyn StatusCache>,
    ) -> Self {
        Self {
            placeholders,
            modified_paths,
            status_cache,
        }
    }

    pub async fn apply(&self, task: &BackgroundTask) -> Result<(), ApplyError> {
        match task {
            BackgroundTask::FileCreated { path }
            | BackgroundTask::FileOverwritten { path }
            | BackgroundTask::FileSuperseded { path }
            | BackgroundTask::FileHardLinkCreated { path } => {
                self.add_modified(path, false).await?;
            }
            BackgroundTask::FileConvertedToFull { path } => {
                self.add_modified(path, false).await?;
                self.placeholders.remove(path).await?;
            }
            BackgroundTask::FileDeleted { path } => {
                self.placeholders.remove(path).await?;
                self.add_modified(path, false).await?;
            }
            BackgroundTask::FileRenamed { old_path, path } => {
                self.placeholders.remove(old_path).await?;
                self.add_modified(old_path, false).await?;
                self.add_modified(path, false).await?;
            }
            BackgroundTask::FolderCreated { path } => {
                self.add_modified(path, true).await?;
            }
            BackgroundTask::FolderDeleted { path } => {
                self.placeholders.remove(path).await?;
                self.add_modified(path, true).await?;
            }
            BackgroundTask::FolderRenamed { old_path, path } => {
                self.placeholders.remove(old_path).await?;
                self.add_modified(old_path, true).await?;
                self.add_modified(path, true).await?;
            }
            BackgroundTask::PlaceholderCreated { record } => {
                self.placeholders.add_placeholder_data(record).await?;
            }
        }

        self.status_cache.invalidate();
        Ok(())
    }

    async fn add_modified(&self, path: &str, is_folder: bool) -> Result<(), ApplyError> {
        let outcome = self.modified_paths.try_add(path, is_folder).await;
        if outcome.accepted {
            Ok(())
        } else {
            Err(ApplyError::ModifiedPathRejected {
                entry: path.to_string(),
                retryable: outcome.retryable,
            })
        }
    }
}

/// Running worker tasks and the signal that stops them.
pub struct BackgroundWorkers {
    stop_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundWorkers {
    /// Spawn `count` workers draining `receiver`. Only a single worker keeps FIFO order.
    pub fn start(
        count: usize,
        receiver: BackgroundReceiver,
        applier: Arc<TaskApplier>,
        db: Database,
        session: SessionContext,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handles = (0..count.max(1))
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    receiver.clone(),
                    applier.clone(),
                    db.clone(),
                    session.clone(),
                    stop_rx.clone(),
                ))
            })
            .collect();

        tracing::info!(workers = count.max(1), "background workers started");
        Self { stop_tx, handles }
    }

    /// Stop taking new tasks and wait for in-flight ones to finish.
    ///
    /// Tasks still queued stay in the durable log.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("background worker panicked: {}", e);
            }
        }
        tracing::info!("background workers stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: BackgroundReceiver,
    applier: Arc<TaskApplier>,
    db: Database,
    session: SessionContext,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let queued = tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            queued = receiver.recv() => match queued {
                Some(queued) => queued,
                None => break,
            },
        };

        let span = tracing::info_span!(
            "background_task",
            worker = worker_id,
            task_id = queued.id,
            operation = %queued.task.operation(),
            git_session = session.git_command_session_id().as_deref().unwrap_or(""),
        );
        process_task(&applier, &db, &queued).instrument(span).await;
        receiver.task_done();
    }
}

async fn process_task(applier: &TaskApplier, db: &Database, queued: &QueuedTask) {
    match applier.apply(&queued.task).await {
        Ok(()) => {
            if let Err(e) = db.delete_background_task(queued.id).await {
                tracing::warn!("applied task could not be removed from the log: {}", e);
            }
            tracing::debug!(task = %queued.task, "applied background task");
        }
        Err(e) => {
            // left in the durable log for the next start
            tracing::error!(task = %queued.task, "failed to apply background task: {}", e);
        }
    }
}
