//! Front door for filesystem events raised by the virtualization provider
//!
//! Every callback turns into exactly one queued task; nothing here mutates
//! the stores directly. The same object answers whether an external git
//! process may take the lock and produces the periodic heartbeat.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use common::paths;
use common::protocol::LockData;

use crate::database::modified_paths::ModifiedPathsStore;
use crate::database::placeholders::{PlaceholderRecord, PlaceholderStore};
use crate::lock::ExternalLockReadiness;

use super::queue::{BackgroundQueue, QueueError};
use super::task::BackgroundTask;

pub const PARSING_PROJECTION_MESSAGE: &str =
    "Waiting for the mount to parse index and update placeholder files";
pub const QUEUE_NOT_DRAINED_MESSAGE: &str = "Waiting for the mount to release the lock";

/// Counters reported by one heartbeat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatSnapshot {
    pub placeholder_count: Option<u64>,
    pub modified_paths_count: usize,
    pub background_operation_count: usize,
    /// Placeholders created per process name since the previous heartbeat
    pub placeholders_created: BTreeMap<String, u64>,
}

pub struct FileSystemCallbacks {
    queue: BackgroundQueue,
    placeholders: PlaceholderStore,
    modified_paths: Arc<ModifiedPathsStore>,
    projection_parsed: AtomicBool,
    placeholder_creations: Mutex<HashMap<String, u64>>,
}

impl FileSystemCallbacks {
    pub fn new(
        queue: BackgroundQueue,
        placeholders: PlaceholderStore,
        modified_paths: Arc<ModifiedPathsStore>,
    ) -> Self {
        Self {
            queue,
            placeholders,
            modified_paths,
            projection_parsed: AtomicBool::new(false),
            placeholder_creations: Mutex::new(HashMap::new()),
        }
    }

    pub fn background_operation_count(&self) -> usize {
        self.queue.len()
    }

    pub fn is_projection_parsed(&self) -> bool {
        self.projection_parsed.load(Ordering::Acquire)
    }

    /// The index projection is up to date and placeholders reflect it.
    pub fn on_projection_parsed(&self) {
        self.projection_parsed.store(true, Ordering::Release);
    }

    /// The index changed; placeholders may be stale until it is parsed again.
    pub fn invalidate_projection(&self) {
        self.projection_parsed.store(false, Ordering::Release);
    }

    async fn enqueue(&self, task: BackgroundTask) -> Result<(), QueueError> {
        if task.touches_dot_git() {
            tracing::trace!(task = %task, "ignoring event inside .git");
            return Ok(());
        }
        self.queue.enqueue(task).await
    }

    pub async fn on_file_created(&self, path: &str) -> Result<(), QueueError> {
        self.enqueue(BackgroundTask::FileCreated {
            path: path.to_string(),
        })
        .await
    }

    pub async fn on_file_deleted(&self, path: &str) -> Result<(), QueueError> {
        self.enqueue(BackgroundTask::FileDeleted {
            path: path.to_string(),
        })
        .await
    }

    pub async fn on_file_overwritten(&self, path: &str) -> Result<(), QueueError> {
        self.enqueue(BackgroundTask::FileOverwritten {
            path: path.to_string(),
        })
        .await
    }

    pub async fn on_file_converted_to_full(&self, path: &str) -> Result<(), QueueError> {
        self.enqueue(BackgroundTask::FileConvertedToFull {
            path: path.to_string(),
        })
        .await
    }

    pub async fn on_file_renamed(&self, old_path: &str, path: &str) -> Result<(), QueueError> {
        self.enqueue_rename(old_path, path, false).await
    }

    pub async fn on_file_hard_link_created(&self, path: &str) -> Result<(), QueueError> {
        self.enqueue(BackgroundTask::FileHardLinkCreated {
            path: path.to_string(),
        })
        .await
    }

    pub async fn on_file_superseded(&self, path: &str) -> Result<(), QueueError> {
        self.enqueue(BackgroundTask::FileSuperseded {
            path: path.to_string(),
        })
        .await
    }

    pub async fn on_folder_created(&self, path: &str) -> Result<(), QueueError> {
        self.enqueue(BackgroundTask::FolderCreated {
            path: path.to_string(),
        })
        .await
    }

    pub async fn on_folder_deleted(&self, path: &str) -> Result<(), QueueError> {
        self.enqueue(BackgroundTask::FolderDeleted {
            path: path.to_string(),
        })
        .await
    }

    pub async fn on_folder_renamed(&self, old_path: &str, path: &str) -> Result<(), QueueError> {
        self.enqueue_rename(old_path, path, true).await
    }

    /// A rename across the `.git` boundary is a delete or a create of the
    /// side that lies outside it.
    async fn enqueue_rename(
        &self,
        old_path: &str,
        path: &str,
        is_folder: bool,
    ) -> Result<(), QueueError> {
        let old_path = old_path.to_string();
        let path = path.to_string();
        let task = match (
            paths::is_path_inside_dot_git(&old_path),
            paths::is_path_inside_dot_git(&path),
        ) {
            (false, false) if is_folder => BackgroundTask::FolderRenamed { old_path, path },
            (false, false) => BackgroundTask::FileRenamed { old_path, path },
            (false, true) if is_folder => BackgroundTask::FolderDeleted { path: old_path },
            (false, true) => BackgroundTask::FileDeleted { path: old_path },
            (true, false) if is_folder => BackgroundTask::FolderCreated { path },
            (true, false) => BackgroundTask::FileCreated { path },
            (true, true) => {
                tracing::trace!(%old_path, %path, "ignoring rename inside .git");
                return Ok(());
            }
        };
        self.enqueue(task).await
    }

    /// A placeholder was materialized while serving `process_name`.
    pub async fn on_placeholder_created(
        &self,
        record: PlaceholderRecord,
        process_name: &str,
    ) -> Result<(), QueueError> {
        if paths::is_path_inside_dot_git(&record.path) {
            return Ok(());
        }

        *self
            .placeholder_creations
            .lock()
            .entry(process_name.to_string())
            .or_insert(0) += 1;
        self.queue
            .enqueue(BackgroundTask::PlaceholderCreated { record })
            .await
    }

    /// Gather counters and log them.
    ///
    /// Logged at info when placeholders were created since the last heartbeat,
    /// debug otherwise.
    pub async fn heartbeat(&self) -> HeartbeatSnapshot {
        let placeholder_count = match self.placeholders.count().await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!("heartbeat could not count placeholders: {}", e);
                None
            }
        };

        let placeholders_created: BTreeMap<String, u64> =
            std::mem::take(&mut *self.placeholder_creations.lock())
                .into_iter()
                .collect();

        let snapshot = HeartbeatSnapshot {
            placeholder_count,
            modified_paths_count: self.modified_paths.count(),
            background_operation_count: self.queue.len(),
            placeholders_created,
        };

        let processes = snapshot
            .placeholders_created
            .iter()
            .map(|(name, count)| format!("{}={}", name, count))
            .collect::<Vec<_>>()
            .join(",");

        if snapshot.placeholders_created.is_empty() {
            tracing::debug!(
                placeholder_count = ?snapshot.placeholder_count,
                modified_paths_count = snapshot.modified_paths_count,
                background_operation_count = snapshot.background_operation_count,
                "heartbeat"
            );
        } else {
            tracing::info!(
                placeholder_count = ?snapshot.placeholder_count,
                modified_paths_count = snapshot.modified_paths_count,
                background_operation_count = snapshot.background_operation_count,
                placeholders_created = %processes,
                "heartbeat"
            );
        }

        snapshot
    }
}

impl ExternalLockReadiness for FileSystemCallbacks {
    fn is_ready_for_external_acquire_lock_requests(
        &self,
        requester: &LockData,
    ) -> Result<(), String> {
        if !self.is_projection_parsed() {
            tracing::debug!(requester = %requester, "lock denied, projection not parsed");
            return Err(PARSING_PROJECTION_MESSAGE.to_string());
        }

        let pending = self.queue.len();
        if pending > 0 {
            tracing::debug!(requester = %requester, pending, "lock denied, background queue not drained");
            return Err(QUEUE_NOT_DRAINED_MESSAGE.to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::queue::BackgroundReceiver;
    use crate::database::tests::setup_test_db;
    use crate::database::Database;

    async fn setup() -> (FileSystemCallbacks, BackgroundReceiver, Database, tempfile::TempDir) {
        let (db, temp_dir) = setup_test_db().await;
        let (queue, receiver) = BackgroundQueue::new(db.clone());
        let callbacks = FileSystemCallbacks::new(
            queue,
            PlaceholderStore::new(db.clone()),
            Arc::new(ModifiedPathsStore::load(db.clone()).await.unwrap()),
        );
        (callbacks, receiver, db, temp_dir)
    }

    fn drain(receiver: &BackgroundReceiver) -> Vec<BackgroundTask> {
        let mut tasks = Vec::new();
        while let Some(queued) = receiver.try_recv() {
            tasks.push(queued.task);
            receiver.task_done();
        }
        tasks
    }

    #[tokio::test]
    async fn test_each_callback_enqueues_one_task() {
        let (callbacks, receiver, _db, _temp_dir) = setup().await;

        callbacks.on_file_created("a").await.unwrap();
        callbacks.on_file_deleted("a").await.unwrap();
        callbacks.on_file_overwritten("a").await.unwrap();
        callbacks.on_file_converted_to_full("a").await.unwrap();
        callbacks.on_file_renamed("a", "b").await.unwrap();
        callbacks.on_file_hard_link_created("a").await.unwrap();
        callbacks.on_file_superseded("a").await.unwrap();
        callbacks.on_folder_created("d").await.unwrap();
        callbacks.on_folder_deleted("d").await.unwrap();
        callbacks.on_folder_renamed("d", "e").await.unwrap();
        callbacks
            .on_placeholder_created(PlaceholderRecord::partial_folder("p"), "git.exe")
            .await
            .unwrap();

        let operations: Vec<_> = drain(&receiver).iter().map(|t| t.operation()).collect();
        use crate::database::types::OperationType::*;
        assert_eq!(
            operations,
            vec![
                FileCreated,
                FileDeleted,
                FileOverwritten,
                FileConvertedToFull,
                FileRenamed,
                FileHardLinkCreated,
                FileSuperseded,
                FolderCreated,
                FolderDeleted,
                FolderRenamed,
                PlaceholderCreated,
            ]
        );
    }

    #[tokio::test]
    async fn test_dot_git_events_are_ignored() {
        let (callbacks, receiver, db, _temp_dir) = setup().await;

        callbacks.on_file_created(".git/index.lock").await.unwrap();
        callbacks.on_folder_created(".git/refs/heads").await.unwrap();
        callbacks.on_file_created(".gitattributes").await.unwrap();

        assert_eq!(drain(&receiver).len(), 1);
        assert_eq!(db.background_task_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rename_across_dot_git_keeps_outside_side() {
        let (callbacks, receiver, _db, _temp_dir) = setup().await;

        callbacks.on_file_renamed("foo.txt", ".git/foo.txt").await.unwrap();
        callbacks.on_folder_renamed(".git/tmpdir", "src").await.unwrap();
        callbacks.on_file_renamed(".git/a", ".git/b").await.unwrap();

        assert_eq!(
            drain(&receiver),
            vec![
                BackgroundTask::FileDeleted {
                    path: "foo.txt".to_string()
                },
                BackgroundTask::FolderCreated {
                    path: "src".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_readiness_messages() {
        let (callbacks, receiver, _db, _temp_dir) = setup().await;
        let requester = LockData::new(1, "git status");

        assert_eq!(
            callbacks.is_ready_for_external_acquire_lock_requests(&requester),
            Err(PARSING_PROJECTION_MESSAGE.to_string())
        );

        callbacks.on_projection_parsed();
        assert_eq!(
            callbacks.is_ready_for_external_acquire_lock_requests(&requester),
            Ok(())
        );

        callbacks.on_file_created("a.txt").await.unwrap();
        assert_eq!(
            callbacks.is_ready_for_external_acquire_lock_requests(&requester),
            Err(QUEUE_NOT_DRAINED_MESSAGE.to_string())
        );

        drain(&receiver);
        assert_eq!(
            callbacks.is_ready_for_external_acquire_lock_requests(&requester),
            Ok(())
        );
    }

    #[tokio::test]
    async fn test_heartbeat_reports_and_resets_process_counts() {
        let (callbacks, receiver, _db, _temp_dir) = setup().await;

        callbacks
            .on_placeholder_created(PlaceholderRecord::partial_folder("a"), "git")
            .await
            .unwrap();
        callbacks
            .on_placeholder_created(PlaceholderRecord::partial_folder("b"), "git")
            .await
            .unwrap();
        callbacks
            .on_placeholder_created(PlaceholderRecord::partial_folder("c"), "code")
            .await
            .unwrap();

        let snapshot = callbacks.heartbeat().await;
        assert_eq!(snapshot.placeholder_count, Some(0));
        assert_eq!(snapshot.modified_paths_count, 1);
        assert_eq!(snapshot.background_operation_count, 3);
        assert_eq!(
            snapshot.placeholders_created,
            BTreeMap::from([("code".to_string(), 1), ("git".to_string(), 2)])
        );

        drain(&receiver);
        let next = callbacks.heartbeat().await;
        assert!(next.placeholders_created.is_empty());
        assert_eq!(next.background_operation_count, 0);
    }
}
