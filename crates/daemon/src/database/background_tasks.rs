//! Durable log of queued background tasks
//!
//! Every task is appended here before it reaches the in-memory queue and is
//! deleted once applied. Whatever is left after a crash is replayed on the
//! next start, in insertion order.

use sqlx::Row;

use crate::background::task::BackgroundTask;

use super::types::{OperationType, PathType};
use super::{Database, DatabaseError};

/// A task read back from the log, with the row id needed to delete it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedTask {
    pub id: i64,
    pub task: BackgroundTask,
}

impl Database {
    /// Append a task and return its log id.
    pub async fn append_background_task(&self, task: &BackgroundTask) -> Result<i64, DatabaseError> {
        let placeholder = task.placeholder();
        let path_type = placeholder.map(|record| record.kind.path_type());
        let sha = placeholder
            .and_then(|record| record.kind.content_id())
            .map(|id| id.as_str());

        let mut conn = self.acquire().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO BackgroundTasks (operation, virtualPath, oldVirtualPath, pathType, sha)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(task.operation())
        .bind(task.virtual_path())
        .bind(task.old_virtual_path())
        .bind(path_type)
        .bind(sha)
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Remove an applied task from the log.
    pub async fn delete_background_task(&self, id: i64) -> Result<(), DatabaseError> {
        let mut conn = self.acquire().await?;
        sqlx::query("DELETE FROM BackgroundTasks WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// All logged tasks, oldest first.
    pub async fn load_background_tasks(&self) -> Result<Vec<LoggedTask>, DatabaseError> {
        let mut conn = self.acquire().await?;
        let rows = sqlx::query(
            r#"
            SELECT id, operation, virtualPath, oldVirtualPath, pathType, sha
            FROM BackgroundTasks
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(row_to_logged_task).collect()
    }

    pub async fn background_task_count(&self) -> Result<u64, DatabaseError> {
        let mut conn = self.acquire().await?;
        let count: i64 = sqlx::query_scalar("SELECT count(id) FROM BackgroundTasks")
            .fetch_one(&mut *conn)
            .await?;
        Ok(count as u64)
    }
}

fn row_to_logged_task(row: &sqlx::sqlite::SqliteRow) -> Result<LoggedTask, DatabaseError> {
    let id: i64 = row.get("id");
    let operation: OperationType = row.try_get("operation")?;
    let virtual_path: String = row.get("virtualPath");
    let old_virtual_path: Option<String> = row.get("oldVirtualPath");
    let path_type: Option<PathType> = row.try_get("pathType")?;
    let sha: Option<String> = row.get("sha");

    let task = BackgroundTask::from_columns(operation, virtual_path, old_virtual_path, path_type, sha)
        .map_err(|reason| DatabaseError::CorruptRow {
            table: "BackgroundTasks",
            reason: format!("task {}: {}", id, reason),
        })?;
    Ok(LoggedTask { id, task })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::placeholders::PlaceholderRecord;
    use crate::database::tests::setup_test_db;

    #[tokio::test]
    async fn test_tasks_come_back_in_order() {
        let (db, _temp_dir) = setup_test_db().await;
        let tasks = vec![
            BackgroundTask::FileCreated {
                path: "a.txt".to_string(),
            },
            BackgroundTask::FolderRenamed {
                old_path: "old".to_string(),
                path: "new".to_string(),
            },
            BackgroundTask::PlaceholderCreated {
                record: PlaceholderRecord::file(
                    "b.txt",
                    "0123456789abcdef0123456789abcdef01234567".parse().unwrap(),
                ),
            },
            BackgroundTask::PlaceholderCreated {
                record: PlaceholderRecord::partial_folder("dir"),
            },
        ];

        for task in &tasks {
            db.append_background_task(task).await.unwrap();
        }

        let logged = db.load_background_tasks().await.unwrap();
        let replayed: Vec<_> = logged.iter().map(|entry| entry.task.clone()).collect();
        assert_eq!(replayed, tasks);
        assert!(logged.windows(2).all(|pair| pair[0].id < pair[1].id));
    }

    #[tokio::test]
    async fn test_delete_applied_task() {
        let (db, _temp_dir) = setup_test_db().await;
        let first = db
            .append_background_task(&BackgroundTask::FileDeleted {
                path: "gone.txt".to_string(),
            })
            .await
            .unwrap();
        db.append_background_task(&BackgroundTask::FolderCreated {
            path: "dir".to_string(),
        })
        .await
        .unwrap();

        db.delete_background_task(first).await.unwrap();
        assert_eq!(db.background_task_count().await.unwrap(), 1);

        let remaining = db.load_background_tasks().await.unwrap();
        assert_eq!(
            remaining[0].task,
            BackgroundTask::FolderCreated {
                path: "dir".to_string()
            }
        );
    }
}
