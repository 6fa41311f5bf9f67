//! Services started once the stores are open and stopped at unmount

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::background::{
    BackgroundQueue, BackgroundWorkers, FileSystemCallbacks, StatusCache, TaskApplier,
};
use crate::database::modified_paths::ModifiedPathsStore;
use crate::database::placeholders::PlaceholderStore;
use crate::database::Database;
use crate::lock::LockArbiter;
use crate::maintenance::{GitMaintenance, MaintenanceHandle, MaintenanceScheduler};
use crate::objects::ObjectDownloader;

use super::MountError;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub background_workers: usize,
    pub heartbeat_interval: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            background_workers: 1,
            heartbeat_interval: Duration::from_secs(60),
        }
    }
}

/// External collaborators the pipeline hands work to.
pub struct Collaborators {
    pub downloader: Arc<dyn ObjectDownloader>,
    pub maintenance: Arc<dyn GitMaintenance>,
    pub status_cache: Arc<dyn StatusCache>,
}

struct Running {
    workers: BackgroundWorkers,
    scheduler: MaintenanceScheduler,
    heartbeat: JoinHandle<()>,
}

pub struct Pipeline {
    db: Database,
    placeholders: PlaceholderStore,
    modified_paths: Arc<ModifiedPathsStore>,
    callbacks: Arc<FileSystemCallbacks>,
    maintenance: MaintenanceHandle,
    downloader: Arc<dyn ObjectDownloader>,
    running: Mutex<Option<Running>>,
}

impl Pipeline {
    /// Load the stores, replay the task log and start every worker.
    pub async fn start(
        db: Database,
        lock: &Arc<LockArbiter>,
        collaborators: Collaborators,
        options: PipelineOptions,
    ) -> Result<Arc<Self>, MountError> {
        let modified_paths = Arc::new(ModifiedPathsStore::load(db.clone()).await?);
        let placeholders = PlaceholderStore::new(db.clone());
        let placeholder_count = placeholders.count().await?;
        tracing::info!(
            placeholder_count = placeholder_count,
            modified_paths_count = modified_paths.count(),
            "stores loaded"
        );

        let (queue, receiver) = BackgroundQueue::new(db.clone());
        queue.replay_logged().await?;

        let callbacks = Arc::new(FileSystemCallbacks::new(
            queue,
            placeholders.clone(),
            modified_paths.clone(),
        ));
        lock.set_readiness(callbacks.clone());

        let applier = Arc::new(TaskApplier::new(
            placeholders.clone(),
            modified_paths.clone(),
            collaborators.status_cache,
        ));
        let workers = BackgroundWorkers::start(
            options.background_workers,
            receiver,
            applier,
            db.clone(),
            lock.session().clone(),
        );
        let scheduler = MaintenanceScheduler::start(collaborators.maintenance);
        let heartbeat = spawn_heartbeat(callbacks.clone(), options.heartbeat_interval);

        Ok(Arc::new(Self {
            db,
            placeholders,
            modified_paths,
            callbacks,
            maintenance: scheduler.handle(),
            downloader: collaborators.downloader,
            running: Mutex::new(Some(Running {
                workers,
                scheduler,
                heartbeat,
            })),
        }))
    }

    pub fn placeholders(&self) -> &PlaceholderStore {
        &self.placeholders
    }

    pub fn modified_paths(&self) -> &Arc<ModifiedPathsStore> {
        &self.modified_paths
    }

    pub fn callbacks(&self) -> &Arc<FileSystemCallbacks> {
        &self.callbacks
    }

    pub fn maintenance(&self) -> &MaintenanceHandle {
        &self.maintenance
    }

    pub fn downloader(&self) -> &Arc<dyn ObjectDownloader> {
        &self.downloader
    }

    /// Stop workers after their in-flight task, then close the pool.
    ///
    /// Only the first call does anything.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        running.heartbeat.abort();
        running.workers.stop().await;
        running.scheduler.stop().await;
        self.db.shutdown().await;
        tracing::info!(
            pending_tasks = self.callbacks.background_operation_count(),
            "background pipeline stopped"
        );
    }
}

fn spawn_heartbeat(callbacks: Arc<FileSystemCallbacks>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            callbacks.heartbeat().await;
        }
    })
}
