//! Paths git must treat as locally authoritative
//!
//! The whole set lives in memory (case-insensitive) and mirrors the
//! `ModifiedPaths` table. The set is kept subsumption-compacted: a path under a
//! folder entry is already covered and is never stored alongside it.
//!
//! Mutations and compaction are serialized by a write gate, so compaction
//! always works from a snapshot no `try_add`/`try_remove` is halfway through.
//! Reads only take the in-memory read lock.

use std::collections::HashMap;

use parking_lot::RwLock;
use sqlx::Connection;

use common::paths::{self, GIT_ATTRIBUTES};

use super::{Database, DatabaseError};

/// Result of a modified-paths mutation.
///
/// A redundant add or an absent remove still reports `accepted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub accepted: bool,
    pub retryable: bool,
}

impl UpdateOutcome {
    const ACCEPTED: Self = Self {
        accepted: true,
        retryable: false,
    };

    fn failed(error: &DatabaseError) -> Self {
        Self {
            accepted: false,
            retryable: !matches!(error, DatabaseError::PoolShutDown),
        }
    }
}

/// Counts before and after a compaction pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionSummary {
    pub starting_count: usize,
    pub end_count: usize,
}

pub struct ModifiedPathsStore {
    db: Database,
    /// case key -> entry as stored
    entries: RwLock<HashMap<String, String>>,
    write_gate: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ModifiedPathsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModifiedPathsStore")
            .field("count", &self.count())
            .finish()
    }
}

impl ModifiedPathsStore {
    /// Load every persisted entry, seeding the attributes file into an empty table.
    pub async fn load(db: Database) -> Result<Self, DatabaseError> {
        let mut conn = db.acquire().await?;
        let mut stored: Vec<String> = sqlx::query_scalar("SELECT path FROM ModifiedPaths")
            .fetch_all(&mut *conn)
            .await?;

        if stored.is_empty() {
            sqlx::query("INSERT OR IGNORE INTO ModifiedPaths (path) VALUES (?1)")
                .bind(GIT_ATTRIBUTES)
                .execute(&mut *conn)
                .await?;
            stored.push(GIT_ATTRIBUTES.to_string());
            tracing::info!("seeded modified paths with {}", GIT_ATTRIBUTES);
        }
        drop(conn);

        let entries = stored
            .into_iter()
            .map(|entry| (paths::case_key(&entry), entry))
            .collect::<HashMap<_, _>>();
        tracing::debug!(count = entries.len(), "loaded modified paths");

        Ok(Self {
            db,
            entries: RwLock::new(entries),
            write_gate: tokio::sync::Mutex::new(()),
        })
    }

    pub fn count(&self) -> usize {
        self.entries.read().len()
    }

    pub fn contains(&self, path: &str, is_folder: bool) -> bool {
        let entry = paths::normalize_entry(path, is_folder);
        self.entries.read().contains_key(&paths::case_key(&entry))
    }

    /// Snapshot of every entry, in no particular order.
    pub fn get_all(&self) -> Vec<String> {
        self.entries.read().values().cloned().collect()
    }

    /// Record a path as modified unless it, or a folder above it, is already tracked.
    pub async fn try_add(&self, path: &str, is_folder: bool) -> UpdateOutcome {
        let entry = paths::normalize_entry(path, is_folder);
        let key = paths::case_key(&entry);
        let _gate = self.write_gate.lock().await;

        {
            let entries = self.entries.read();
            if entries.contains_key(&key) || has_ancestor_entry(&entries, &entry) {
                return UpdateOutcome::ACCEPTED;
            }
        }

        match self.insert_row(&entry).await {
            Ok(()) => {
                self.entries.write().insert(key, entry);
                UpdateOutcome::ACCEPTED
            }
            Err(e) => {
                tracing::warn!(entry = %entry, "failed to add modified path: {}", e);
                UpdateOutcome::failed(&e)
            }
        }
    }

    /// Stop tracking a path. Absent paths are a no-op.
    pub async fn try_remove(&self, path: &str, is_folder: bool) -> UpdateOutcome {
        let entry = paths::normalize_entry(path, is_folder);
        let key = paths::case_key(&entry);
        let _gate = self.write_gate.lock().await;

        let Some(stored) = self.entries.read().get(&key).cloned() else {
            return UpdateOutcome::ACCEPTED;
        };

        match self.delete_rows(std::slice::from_ref(&stored)).await {
            Ok(()) => {
                self.entries.write().remove(&key);
                UpdateOutcome::ACCEPTED
            }
            Err(e) => {
                tracing::warn!(entry = %stored, "failed to remove modified path: {}", e);
                UpdateOutcome::failed(&e)
            }
        }
    }

    /// Drop every entry that a folder entry above it already covers.
    pub async fn remove_entries_with_parent_folder_entry(
        &self,
    ) -> Result<CompactionSummary, DatabaseError> {
        let _gate = self.write_gate.lock().await;

        let (starting_count, redundant) = {
            let entries = self.entries.read();
            let redundant: Vec<(String, String)> = entries
                .iter()
                .filter(|(_, entry)| has_ancestor_entry(&entries, entry))
                .map(|(key, entry)| (key.clone(), entry.clone()))
                .collect();
            (entries.len(), redundant)
        };

        if !redundant.is_empty() {
            let stored: Vec<String> = redundant.iter().map(|(_, entry)| entry.clone()).collect();
            self.delete_rows(&stored).await?;

            let mut entries = self.entries.write();
            for (key, _) in &redundant {
                entries.remove(key);
            }
        }

        let summary = CompactionSummary {
            starting_count,
            end_count: self.count(),
        };
        tracing::info!(
            starting_count = summary.starting_count,
            end_count = summary.end_count,
            "removed modified paths covered by a parent folder"
        );
        Ok(summary)
    }

    async fn insert_row(&self, entry: &str) -> Result<(), DatabaseError> {
        let mut conn = self.db.acquire().await?;
        sqlx::query("INSERT OR IGNORE INTO ModifiedPaths (path) VALUES (?1)")
            .bind(entry)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn delete_rows(&self, entries: &[String]) -> Result<(), DatabaseError> {
        let mut conn = self.db.acquire().await?;
        let mut tx = conn.begin().await?;
        for entry in entries {
            sqlx::query("DELETE FROM ModifiedPaths WHERE path = ?1")
                .bind(entry)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn has_ancestor_entry(entries: &HashMap<String, String>, entry: &str) -> bool {
    paths::ancestor_folders(entry).any(|folder| entries.contains_key(&paths::case_key(&folder)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::setup_test_db;
    use crate::database::PoolConfig;

    async fn persisted(db: &Database) -> Vec<String> {
        let mut conn = db.acquire().await.unwrap();
        let mut rows: Vec<String> = sqlx::query_scalar("SELECT path FROM ModifiedPaths")
            .fetch_all(&mut *conn)
            .await
            .unwrap();
        rows.sort();
        rows
    }

    fn sorted(mut entries: Vec<String>) -> Vec<String> {
        entries.sort();
        entries
    }

    #[tokio::test]
    async fn test_empty_store_is_seeded() {
        let (db, _temp_dir) = setup_test_db().await;
        let store = ModifiedPathsStore::load(db.clone()).await.unwrap();

        assert_eq!(store.get_all(), vec![GIT_ATTRIBUTES.to_string()]);
        assert_eq!(persisted(&db).await, vec![GIT_ATTRIBUTES.to_string()]);
    }

    #[tokio::test]
    async fn test_seed_entry_add_is_noop() {
        let (db, _temp_dir) = setup_test_db().await;
        let store = ModifiedPathsStore::load(db).await.unwrap();

        let outcome = store.try_add(GIT_ATTRIBUTES, false).await;
        assert!(outcome.accepted);
        assert_eq!(store.count(), 1);
    }

    #[tokio::test]
    async fn test_add_under_tracked_folder_is_skipped() {
        let (db, _temp_dir) = setup_test_db().await;
        let store = ModifiedPathsStore::load(db.clone()).await.unwrap();

        store.try_add("a", true).await;
        let outcome = store.try_add("a/b.txt", false).await;

        assert_eq!(outcome, UpdateOutcome::ACCEPTED);
        assert!(store.contains("a/", true));
        assert!(!store.contains("a/b.txt", false));
        assert_eq!(persisted(&db).await, vec![".gitattributes", "a/"]);
    }

    #[tokio::test]
    async fn test_folder_entry_does_not_cover_itself() {
        let (db, _temp_dir) = setup_test_db().await;
        let store = ModifiedPathsStore::load(db).await.unwrap();

        store.try_add("a/b", true).await;
        assert!(store.contains("a/b", true));
        assert!(!store.contains("a/b", false));
    }

    #[tokio::test]
    async fn test_case_insensitive_membership() {
        let (db, _temp_dir) = setup_test_db().await;
        let store = ModifiedPathsStore::load(db.clone()).await.unwrap();

        store.try_add("Src/Main.cs", false).await;
        store.try_add("src/main.CS", false).await;
        assert_eq!(store.count(), 2);
        assert!(store.contains("SRC/MAIN.CS", false));

        store.try_remove("src/MAIN.cs", false).await;
        assert!(!store.contains("Src/Main.cs", false));
        assert_eq!(persisted(&db).await, vec![".gitattributes"]);
    }

    #[tokio::test]
    async fn test_remove_absent_is_accepted() {
        let (db, _temp_dir) = setup_test_db().await;
        let store = ModifiedPathsStore::load(db).await.unwrap();

        assert_eq!(store.try_remove("nope.txt", false).await, UpdateOutcome::ACCEPTED);
        assert_eq!(store.count(), 1);
    }

    #[tokio::test]
    async fn test_compaction_keeps_only_top_folder() {
        let (db, _temp_dir) = setup_test_db().await;
        {
            let mut conn = db.acquire().await.unwrap();
            for entry in ["a/", "a/b/", "a/b/c.txt"] {
                sqlx::query("INSERT INTO ModifiedPaths (path) VALUES (?1)")
                    .bind(entry)
                    .execute(&mut *conn)
                    .await
                    .unwrap();
            }
        }

        let store = ModifiedPathsStore::load(db.clone()).await.unwrap();
        assert_eq!(store.count(), 3);

        let summary = store.remove_entries_with_parent_folder_entry().await.unwrap();
        assert_eq!(
            summary,
            CompactionSummary {
                starting_count: 3,
                end_count: 1
            }
        );
        assert_eq!(store.get_all(), vec!["a/".to_string()]);
        assert_eq!(persisted(&db).await, vec!["a/"]);
    }

    #[tokio::test]
    async fn test_compaction_leaves_siblings() {
        let (db, _temp_dir) = setup_test_db().await;
        let store = ModifiedPathsStore::load(db).await.unwrap();

        store.try_add("a/b.txt", false).await;
        store.try_add("ab/c.txt", false).await;
        store.try_add("a/", true).await;

        store.remove_entries_with_parent_folder_entry().await.unwrap();
        assert_eq!(
            sorted(store.get_all()),
            vec![".gitattributes", "a/", "ab/c.txt"]
        );
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let (db, _temp_dir) = setup_test_db().await;
        let path = db.path().to_path_buf();
        let store = ModifiedPathsStore::load(db.clone()).await.unwrap();
        store.try_add("docs", true).await;
        store.try_add("src/lib.rs", false).await;
        db.shutdown().await;
        drop(store);

        let reopened = Database::open(&path, PoolConfig::default()).await.unwrap();
        let store = ModifiedPathsStore::load(reopened).await.unwrap();
        assert_eq!(
            sorted(store.get_all()),
            vec![".gitattributes", "docs/", "src/lib.rs"]
        );
    }

    #[tokio::test]
    async fn test_write_after_shutdown_is_rejected() {
        let (db, _temp_dir) = setup_test_db().await;
        let store = ModifiedPathsStore::load(db.clone()).await.unwrap();

        db.shutdown().await;
        let outcome = store.try_add("late.txt", false).await;
        assert!(!outcome.accepted);
        assert!(!outcome.retryable);
        assert!(!store.contains("late.txt", false));
    }

    #[tokio::test]
    async fn test_concurrent_adds_keep_set_compacted() {
        let (db, _temp_dir) = setup_test_db().await;
        let store = std::sync::Arc::new(ModifiedPathsStore::load(db).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.try_add(&format!("dir/file{}.txt", i), false).await;
            }));
        }
        let folder = {
            let store = store.clone();
            tokio::spawn(async move { store.try_add("dir", true).await })
        };
        let compaction = {
            let store = store.clone();
            tokio::spawn(async move { store.remove_entries_with_parent_folder_entry().await })
        };
        for handle in handles {
            handle.await.unwrap();
        }
        folder.await.unwrap();
        compaction.await.unwrap().unwrap();

        store.remove_entries_with_parent_folder_entry().await.unwrap();
        assert_eq!(sorted(store.get_all()), vec![".gitattributes", "dir/"]);
    }
}
