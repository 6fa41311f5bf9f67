//! Virtualization state store and mount coordination for vgit enlistments.
//!
//! A mount process owns three durable stores in one SQLite file (placeholders,
//! modified paths and a background task log), arbitrates a single
//! enlistment-wide lock between git and the mount itself, and answers control
//! requests from git tooling over a Unix socket.

pub mod background;
pub mod config;
pub mod database;
pub mod lock;
pub mod logging;
pub mod maintenance;
pub mod mount;
pub mod objects;

// Enlistment paths
pub mod state;

pub use background::{BackgroundTask, FileSystemCallbacks};
pub use config::{ConfigError, MountConfig};
pub use database::modified_paths::ModifiedPathsStore;
pub use database::placeholders::{PlaceholderRecord, PlaceholderStore};
pub use database::{Database, DatabaseError, PoolConfig};
pub use lock::{LockArbiter, LockHolder};
pub use mount::{Mount, MountError, RunningMount};
pub use state::EnlistmentLayout;
