//! One-time maintenance steps run outside the request path
//!
//! Steps are pushed onto a flume queue and drained by a single worker. Steps
//! only touch the object store, so they run without the enlistment lock and
//! never block git or get skipped while git holds it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

/// Maintenance steps that can be scheduled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaintenanceStep {
    /// Refresh commit-graph and multi-pack-index after a fetch
    PostFetch(PostFetchStep),
}

impl MaintenanceStep {
    pub fn name(&self) -> &'static str {
        match self {
            MaintenanceStep::PostFetch(_) => "post_fetch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostFetchStep {
    pub pack_indexes: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum MaintenanceError {
    #[error("maintenance scheduler has been stopped")]
    Stopped,
    #[error("{step} failed: {reason}")]
    StepFailed { step: &'static str, reason: String },
}

/// The git side of a maintenance step.
#[async_trait]
pub trait GitMaintenance: Send + Sync {
    async fn post_fetch(&self, step: &PostFetchStep) -> Result<(), MaintenanceError>;
}

/// Records the step and does nothing else.
#[derive(Debug, Default)]
pub struct LoggingMaintenance;

#[async_trait]
impl GitMaintenance for LoggingMaintenance {
    async fn post_fetch(&self, step: &PostFetchStep) -> Result<(), MaintenanceError> {
        tracing::info!(
            pack_indexes = step.pack_indexes.len(),
            "post-fetch maintenance requested"
        );
        Ok(())
    }
}

pub struct MaintenanceScheduler {
    tx: flume::Sender<MaintenanceStep>,
    handle: JoinHandle<()>,
}

impl MaintenanceScheduler {
    pub fn start(git: Arc<dyn GitMaintenance>) -> Self {
        let (tx, rx) = flume::unbounded();
        let handle = tokio::spawn(run_scheduler(rx, git));
        Self { tx, handle }
    }

    /// Handle for queueing steps from request handlers.
    pub fn handle(&self) -> MaintenanceHandle {
        MaintenanceHandle {
            tx: self.tx.clone(),
        }
    }

    /// Cancel the worker. Steps still queued are dropped.
    pub async fn stop(self) {
        drop(self.tx);
        self.handle.abort();
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                tracing::error!("maintenance worker panicked: {}", e);
            }
        }
        tracing::info!("maintenance scheduler stopped");
    }
}

/// Cheap to clone.
#[derive(Debug, Clone)]
pub struct MaintenanceHandle {
    tx: flume::Sender<MaintenanceStep>,
}

impl MaintenanceHandle {
    pub fn enqueue_one_time_step(&self, step: MaintenanceStep) -> Result<(), MaintenanceError> {
        tracing::debug!(step = step.name(), "queueing maintenance step");
        self.tx.send(step).map_err(|_| MaintenanceError::Stopped)
    }
}

async fn run_scheduler(rx: flume::Receiver<MaintenanceStep>, git: Arc<dyn GitMaintenance>) {
    while let Ok(step) = rx.recv_async().await {
        run_step(&*git, &step).await;
    }
}

async fn run_step(git: &dyn GitMaintenance, step: &MaintenanceStep) {
    let result = match step {
        MaintenanceStep::PostFetch(post_fetch) => git.post_fetch(post_fetch).await,
    };

    match result {
        Ok(()) => tracing::info!(step = step.name(), "maintenance step finished"),
        Err(e) => tracing::error!(step = step.name(), "maintenance step failed: {}", e),
    }
}
