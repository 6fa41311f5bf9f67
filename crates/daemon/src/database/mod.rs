//! Pooled access to the enlistment's SQLite store
//!
//! A small, fixed set of connections is opened up front. `acquire` waits a
//! bounded time for an idle one and opens an overflow connection when none
//! frees up, so callers never block indefinitely. Dropping the returned
//! [`PooledConnection`] hands the connection back, or closes it once the pool
//! has been shut down.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{ConnectOptions, Connection, SqliteConnection};

pub mod background_tasks;
pub mod modified_paths;
pub mod placeholders;
pub mod types;

/// Schema version stamped into `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Page cache budget in KiB (negative means KiB rather than pages).
const CACHE_SIZE_KIB: &str = "-40000";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS Placeholders (
        path TEXT PRIMARY KEY COLLATE NOCASE,
        pathType TINYINT NOT NULL,
        sha CHAR(40) NULL
    ) WITHOUT ROWID
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ModifiedPaths (
        path TEXT PRIMARY KEY
    ) WITHOUT ROWID
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS BackgroundTasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        operation TINYINT NOT NULL,
        virtualPath TEXT NOT NULL,
        oldVirtualPath TEXT NULL,
        pathType TINYINT NULL,
        sha CHAR(40) NULL
    )
    "#,
];

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("connection pool has been shut down")]
    PoolShutDown,
    #[error("database schema version {0} is newer than supported version {SCHEMA_VERSION}")]
    UnsupportedSchemaVersion(i64),
    #[error("corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

/// Sizing and timing for the connection pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections opened when the pool is created
    pub initial_connections: usize,
    /// How long `acquire` waits for an idle connection before opening a new one
    pub acquire_timeout: Duration,
    /// Idle connections kept around; extras are closed on release
    pub max_idle_connections: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_connections: 5,
            acquire_timeout: Duration::from_millis(50),
            max_idle_connections: 16,
        }
    }
}

#[derive(Clone)]
pub struct Database {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    path: PathBuf,
    options: SqliteConnectOptions,
    config: PoolConfig,
    idle_tx: flume::Sender<SqliteConnection>,
    idle_rx: flume::Receiver<SqliteConnection>,
    disposed: AtomicBool,
}

impl PoolInner {
    fn drain_idle(&self) -> usize {
        let mut drained = 0;
        while let Ok(conn) = self.idle_rx.try_recv() {
            drop(conn);
            drained += 1;
        }
        drained
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.inner.path)
            .field("idle", &self.inner.idle_rx.len())
            .field("disposed", &self.inner.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Database {
    /// Open (creating if needed) the database file and fill the pool.
    ///
    /// The first connection initializes the schema before any other is opened.
    pub async fn open(path: impl AsRef<Path>, config: PoolConfig) -> Result<Self, DatabaseError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| DatabaseError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .shared_cache(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("cache_size", CACHE_SIZE_KIB)
            .busy_timeout(Duration::from_secs(5));

        let capacity = config.max_idle_connections.max(config.initial_connections).max(1);
        let (idle_tx, idle_rx) = flume::bounded(capacity);

        let db = Self {
            inner: Arc::new(PoolInner {
                path,
                options,
                config,
                idle_tx,
                idle_rx,
                disposed: AtomicBool::new(false),
            }),
        };

        let mut first = db.open_connection().await?;
        initialize(&mut first).await?;
        db.return_idle(first);

        for _ in 1..db.inner.config.initial_connections {
            let conn = db.open_connection().await?;
            db.return_idle(conn);
        }

        tracing::info!(
            path = %db.inner.path.display(),
            initial_connections = db.inner.config.initial_connections,
            "database opened"
        );
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Number of connections currently parked in the pool.
    pub fn idle_connections(&self) -> usize {
        self.inner.idle_rx.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    async fn open_connection(&self) -> Result<SqliteConnection, DatabaseError> {
        Ok(self.inner.options.connect().await?)
    }

    fn return_idle(&self, conn: SqliteConnection) {
        // a full idle queue just means this connection is surplus
        let _ = self.inner.idle_tx.try_send(conn);
    }

    /// Check out a connection.
    ///
    /// Waits up to the configured timeout for an idle connection, then opens a
    /// new one. Fails immediately once the pool has been shut down.
    pub async fn acquire(&self) -> Result<PooledConnection, DatabaseError> {
        if self.is_shut_down() {
            return Err(DatabaseError::PoolShutDown);
        }

        let wait = tokio::time::timeout(
            self.inner.config.acquire_timeout,
            self.inner.idle_rx.recv_async(),
        )
        .await;

        let conn = match wait {
            Ok(Ok(conn)) => conn,
            _ => {
                tracing::debug!(path = %self.inner.path.display(), "pool exhausted, opening overflow connection");
                self.open_connection().await?
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: self.inner.clone(),
        })
    }

    /// Close every idle connection and refuse further checkouts.
    ///
    /// Connections still checked out are closed when their guard drops.
    pub async fn shutdown(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut closed = 0usize;
        while let Ok(conn) = self.inner.idle_rx.try_recv() {
            if let Err(e) = conn.close().await {
                tracing::warn!("error closing pooled connection: {}", e);
            }
            closed += 1;
        }

        tracing::info!(closed, path = %self.inner.path.display(), "connection pool shut down");
    }
}

/// A checked-out connection. Returned to the pool on drop.
pub struct PooledConnection {
    conn: Option<SqliteConnection>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledConnection {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .unwrap_or_else(|| unreachable!("connection is only taken on drop"))
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .unwrap_or_else(|| unreachable!("connection is only taken on drop"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        if self.pool.disposed.load(Ordering::Acquire) {
            drop(conn);
            return;
        }

        if self.pool.idle_tx.try_send(conn).is_err() {
            return;
        }

        // shutdown may have drained the queue between the check and the send
        if self.pool.disposed.load(Ordering::Acquire) {
            self.pool.drain_idle();
        }
    }
}

async fn initialize(conn: &mut SqliteConnection) -> Result<(), DatabaseError> {
    let version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(&mut *conn)
        .await?;

    if version > SCHEMA_VERSION {
        return Err(DatabaseError::UnsupportedSchemaVersion(version));
    }

    if version < SCHEMA_VERSION {
        let stamp = format!("PRAGMA user_version = {}", SCHEMA_VERSION);
        sqlx::query(&stamp).execute(&mut *conn).await?;
        tracing::info!(previous = version, current = SCHEMA_VERSION, "stamped schema version");
    }

    let mut tx = conn.begin().await?;
    for statement in SCHEMA {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    Ok(())
}
