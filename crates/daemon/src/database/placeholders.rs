//! Registry of paths that have been materialized as placeholders
//!
//! The `Placeholders` table is the only source of truth. A moka cache mirrors
//! point lookups (read-through) and is updated on every write (write-through),
//! so repeated `contains` checks from the filesystem hot path skip SQLite.

use std::collections::HashSet;

use moka::sync::Cache;
use sqlx::Row;

use common::content_id::ContentId;

use super::types::PathType;
use super::{Database, DatabaseError};

/// Membership entries kept in memory
const CACHE_CAPACITY: u64 = 100_000;

/// What a placeholder path is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderKind {
    File { content_id: ContentId },
    PartialFolder,
    ExpandedFolder,
    PossibleTombstoneFolder,
}

impl PlaceholderKind {
    pub fn path_type(&self) -> PathType {
        match self {
            PlaceholderKind::File { .. } => PathType::File,
            PlaceholderKind::PartialFolder => PathType::PartialFolder,
            PlaceholderKind::ExpandedFolder => PathType::ExpandedFolder,
            PlaceholderKind::PossibleTombstoneFolder => PathType::PossibleTombstoneFolder,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.path_type().is_folder()
    }

    pub fn content_id(&self) -> Option<&ContentId> {
        match self {
            PlaceholderKind::File { content_id } => Some(content_id),
            _ => None,
        }
    }

    /// Rebuild a kind from its stored columns.
    pub fn from_columns(
        path_type: PathType,
        sha: Option<String>,
    ) -> Result<Self, String> {
        match path_type {
            PathType::File => {
                let sha = sha.ok_or_else(|| "file placeholder without a content id".to_string())?;
                let content_id = sha.parse().map_err(|e| format!("{}", e))?;
                Ok(PlaceholderKind::File { content_id })
            }
            PathType::PartialFolder => Ok(PlaceholderKind::PartialFolder),
            PathType::ExpandedFolder => Ok(PlaceholderKind::ExpandedFolder),
            PathType::PossibleTombstoneFolder => Ok(PlaceholderKind::PossibleTombstoneFolder),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderRecord {
    pub path: String,
    pub kind: PlaceholderKind,
}

impl PlaceholderRecord {
    pub fn file(path: impl Into<String>, content_id: ContentId) -> Self {
        Self {
            path: path.into(),
            kind: PlaceholderKind::File { content_id },
        }
    }

    pub fn partial_folder(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: PlaceholderKind::PartialFolder,
        }
    }

    pub fn expanded_folder(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: PlaceholderKind::ExpandedFolder,
        }
    }

    pub fn possible_tombstone_folder(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: PlaceholderKind::PossibleTombstoneFolder,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind.is_folder()
    }
}

/// All placeholders, split by kind
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PlaceholderEntries {
    pub files: Vec<PlaceholderRecord>,
    pub folders: Vec<PlaceholderRecord>,
}

#[derive(Clone)]
pub struct PlaceholderStore {
    db: Database,
    /// ASCII-folded path -> present
    cache: Cache<String, bool>,
}

fn cache_key(path: &str) -> String {
    // matches COLLATE NOCASE, which only folds ASCII
    path.to_ascii_lowercase()
}

impl PlaceholderStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            cache: Cache::builder().max_capacity(CACHE_CAPACITY).build(),
        }
    }

    pub async fn count(&self) -> Result<u64, DatabaseError> {
        let mut conn = self.db.acquire().await?;
        let count: i64 = sqlx::query_scalar("SELECT count(path) FROM Placeholders")
            .fetch_one(&mut *conn)
            .await?;
        Ok(count as u64)
    }

    pub async fn get_all_entries(&self) -> Result<PlaceholderEntries, DatabaseError> {
        let mut conn = self.db.acquire().await?;
        let rows = sqlx::query("SELECT path, pathType, sha FROM Placeholders")
            .fetch_all(&mut *conn)
            .await?;

        let mut entries = PlaceholderEntries::default();
        for row in rows {
            let record = row_to_record(&row)?;
            if record.is_folder() {
                entries.folders.push(record);
            } else {
                entries.files.push(record);
            }
        }
        Ok(entries)
    }

    pub async fn get_all_file_paths(&self) -> Result<HashSet<String>, DatabaseError> {
        let mut conn = self.db.acquire().await?;
        let paths: Vec<String> = sqlx::query_scalar("SELECT path FROM Placeholders WHERE pathType = ?1")
            .bind(PathType::File)
            .fetch_all(&mut *conn)
            .await?;
        Ok(paths.into_iter().collect())
    }

    /// Point lookup. The statement is prepared once per connection and reused.
    pub async fn contains(&self, path: &str) -> Result<bool, DatabaseError> {
        let key = cache_key(path);
        if let Some(present) = self.cache.get(&key) {
            return Ok(present);
        }

        let mut conn = self.db.acquire().await?;
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM Placeholders WHERE path = ?1")
            .bind(path)
            .persistent(true)
            .fetch_optional(&mut *conn)
            .await?;

        let present = found.is_some();
        self.cache.insert(key, present);
        Ok(present)
    }

    pub async fn add_file(&self, path: &str, content_id: &ContentId) -> Result<(), DatabaseError> {
        self.upsert(path, PathType::File, Some(content_id.as_str()))
            .await
    }

    pub async fn add_partial_folder(&self, path: &str) -> Result<(), DatabaseError> {
        self.upsert(path, PathType::PartialFolder, None).await
    }

    pub async fn add_expanded_folder(&self, path: &str) -> Result<(), DatabaseError> {
        self.upsert(path, PathType::ExpandedFolder, None).await
    }

    pub async fn add_possible_tombstone_folder(&self, path: &str) -> Result<(), DatabaseError> {
        self.upsert(path, PathType::PossibleTombstoneFolder, None)
            .await
    }

    /// Store a record using the add operation matching its kind.
    pub async fn add_placeholder_data(&self, record: &PlaceholderRecord) -> Result<(), DatabaseError> {
        match &record.kind {
            PlaceholderKind::File { content_id } => self.add_file(&record.path, content_id).await,
            PlaceholderKind::PartialFolder => self.add_partial_folder(&record.path).await,
            PlaceholderKind::ExpandedFolder => self.add_expanded_folder(&record.path).await,
            PlaceholderKind::PossibleTombstoneFolder => {
                self.add_possible_tombstone_folder(&record.path).await
            }
        }
    }

    /// Delete a placeholder. Absent paths are ignored.
    pub async fn remove(&self, path: &str) -> Result<(), DatabaseError> {
        let mut conn = self.db.acquire().await?;
        sqlx::query("DELETE FROM Placeholders WHERE path = ?1")
            .bind(path)
            .execute(&mut *conn)
            .await?;

        self.cache.insert(cache_key(path), false);
        Ok(())
    }

    async fn upsert(
        &self,
        path: &str,
        path_type: PathType,
        sha: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let mut conn = self.db.acquire().await?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO Placeholders (path, pathType, sha)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(path)
        .bind(path_type)
        .bind(sha)
        .execute(&mut *conn)
        .await?;

        self.cache.insert(cache_key(path), true);
        Ok(())
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<PlaceholderRecord, DatabaseError> {
    let path: String = row.get("path");
    let path_type: PathType = row.try_get("pathType")?;
    let sha: Option<String> = row.get("sha");

    let kind = PlaceholderKind::from_columns(path_type, sha).map_err(|reason| {
        DatabaseError::CorruptRow {
            table: "Placeholders",
            reason: format!("{}: {}", path, reason),
        }
    })?;
    Ok(PlaceholderRecord { path, kind })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::setup_test_db;
    use crate::database::PoolConfig;

    const SHA_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const SHA_B: &str = "BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB";

    fn sha(value: &str) -> ContentId {
        value.parse().unwrap()
    }

    #[tokio::test]
    async fn test_add_file_upserts() {
        let (db, _temp_dir) = setup_test_db().await;
        let store = PlaceholderStore::new(db);

        store.add_file("a/b.txt", &sha(SHA_A)).await.unwrap();
        store.add_file("a/b.txt", &sha(SHA_B)).await.unwrap();

        let entries = store.get_all_entries().await.unwrap();
        assert_eq!(entries.files, vec![PlaceholderRecord::file("a/b.txt", sha(SHA_B))]);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_later_add_replaces_kind() {
        let (db, _temp_dir) = setup_test_db().await;
        let store = PlaceholderStore::new(db);

        store.add_partial_folder("src").await.unwrap();
        store.add_expanded_folder("src").await.unwrap();

        let entries = store.get_all_entries().await.unwrap();
        assert_eq!(entries.folders, vec![PlaceholderRecord::expanded_folder("src")]);
        assert!(entries.files.is_empty());
    }

    #[tokio::test]
    async fn test_paths_are_case_insensitive() {
        let (db, _temp_dir) = setup_test_db().await;
        let store = PlaceholderStore::new(db);

        store.add_file("Src/Main.txt", &sha(SHA_A)).await.unwrap();
        assert!(store.contains("src/main.TXT").await.unwrap());

        store.add_file("SRC/MAIN.TXT", &sha(SHA_B)).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        store.remove("src/main.txt").await.unwrap();
        assert!(!store.contains("Src/Main.txt").await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_absent_path_is_noop() {
        let (db, _temp_dir) = setup_test_db().await;
        let store = PlaceholderStore::new(db);

        store.remove("never/added").await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_contains_reads_through_to_database() {
        let (db, _temp_dir) = setup_test_db().await;
        let writer = PlaceholderStore::new(db.clone());
        let reader = PlaceholderStore::new(db);

        assert!(!reader.contains("docs").await.unwrap());
        writer.add_expanded_folder("docs").await.unwrap();

        // a fresh store has nothing cached, so the answer must come from sqlite
        let fresh = PlaceholderStore::new(writer.db.clone());
        assert!(fresh.contains("docs").await.unwrap());
    }

    #[tokio::test]
    async fn test_mixed_scenario() {
        let (db, _temp_dir) = setup_test_db().await;
        let store = PlaceholderStore::new(db);

        store.add_partial_folder("src/").await.unwrap();
        store.add_file("src/main.txt", &sha(SHA_A)).await.unwrap();
        store.add_expanded_folder("docs/").await.unwrap();

        assert_eq!(store.count().await.unwrap(), 3);
        assert_eq!(
            store.get_all_file_paths().await.unwrap(),
            HashSet::from(["src/main.txt".to_string()])
        );

        let entries = store.get_all_entries().await.unwrap();
        assert_eq!(entries.files.len(), 1);
        assert_eq!(entries.folders.len(), 2);
    }

    #[tokio::test]
    async fn test_add_placeholder_data_dispatches_on_kind() {
        let (db, _temp_dir) = setup_test_db().await;
        let store = PlaceholderStore::new(db);

        let records = vec![
            PlaceholderRecord::file("f.txt", sha(SHA_A)),
            PlaceholderRecord::partial_folder("p"),
            PlaceholderRecord::expanded_folder("e"),
            PlaceholderRecord::possible_tombstone_folder("t"),
        ];
        for record in &records {
            store.add_placeholder_data(record).await.unwrap();
        }

        let mut entries = store.get_all_entries().await.unwrap();
        entries.folders.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(entries.files, vec![records[0].clone()]);
        assert_eq!(
            entries.folders,
            vec![records[2].clone(), records[1].clone(), records[3].clone()]
        );
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let (db, _temp_dir) = setup_test_db().await;
        let path = db.path().to_path_buf();
        let store = PlaceholderStore::new(db.clone());

        let mut expected = Vec::new();
        for i in 0..10 {
            let record = match i % 4 {
                0 => PlaceholderRecord::file(format!("dir{}/file.txt", i), sha(SHA_A)),
                1 => PlaceholderRecord::partial_folder(format!("dir{}", i)),
                2 => PlaceholderRecord::expanded_folder(format!("dir{}", i)),
                _ => PlaceholderRecord::possible_tombstone_folder(format!("dir{}", i)),
            };
            store.add_placeholder_data(&record).await.unwrap();
            expected.push(record);
        }
        db.shutdown().await;
        drop(store);

        let reopened = PlaceholderStore::new(Database::open(&path, PoolConfig::default()).await.unwrap());
        let entries = reopened.get_all_entries().await.unwrap();

        let mut actual: Vec<_> = entries.files.iter().chain(entries.folders.iter()).cloned().collect();
        actual.sort_by(|a, b| a.path.cmp(&b.path));
        expected.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(actual, expected);
        assert!(entries.files.iter().all(|r| !r.is_folder()));
        assert!(entries.folders.iter().all(|r| r.is_folder()));
    }

    #[tokio::test]
    async fn test_file_row_without_sha_is_corrupt() {
        let (db, _temp_dir) = setup_test_db().await;
        {
            let mut conn = db.acquire().await.unwrap();
            sqlx::query("INSERT INTO Placeholders (path, pathType, sha) VALUES ('x', 0, NULL)")
                .execute(&mut *conn)
                .await
                .unwrap();
        }

        let store = PlaceholderStore::new(db);
        let result = store.get_all_entries().await;
        assert!(matches!(result, Err(DatabaseError::CorruptRow { table: "Placeholders", .. })));
    }
}
