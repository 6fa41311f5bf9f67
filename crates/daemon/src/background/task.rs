//! Filesystem-event side effects waiting to be applied to the stores

use common::paths;

use crate::database::placeholders::{PlaceholderKind, PlaceholderRecord};
use crate::database::types::{OperationType, PathType};

/// One unit of work for the background queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundTask {
    FileCreated { path: String },
    FileDeleted { path: String },
    FileOverwritten { path: String },
    FileConvertedToFull { path: String },
    FileRenamed { old_path: String, path: String },
    FileHardLinkCreated { path: String },
    FileSuperseded { path: String },
    FolderCreated { path: String },
    FolderDeleted { path: String },
    FolderRenamed { old_path: String, path: String },
    PlaceholderCreated { record: PlaceholderRecord },
}

impl BackgroundTask {
    pub fn operation(&self) -> OperationType {
        match self {
            BackgroundTask::FileCreated { .. } => OperationType::FileCreated,
            BackgroundTask::FileDeleted { .. } => OperationType::FileDeleted,
            BackgroundTask::FileOverwritten { .. } => OperationType::FileOverwritten,
            BackgroundTask::FileConvertedToFull { .. } => OperationType::FileConvertedToFull,
            BackgroundTask::FileRenamed { .. } => OperationType::FileRenamed,
            BackgroundTask::FileHardLinkCreated { .. } => OperationType::FileHardLinkCreated,
            BackgroundTask::FileSuperseded { .. } => OperationType::FileSuperseded,
            BackgroundTask::FolderCreated { .. } => OperationType::FolderCreated,
            BackgroundTask::FolderDeleted { .. } => OperationType::FolderDeleted,
            BackgroundTask::FolderRenamed { .. } => OperationType::FolderRenamed,
            BackgroundTask::PlaceholderCreated { .. } => OperationType::PlaceholderCreated,
        }
    }

    pub fn virtual_path(&self) -> &str {
        match self {
            BackgroundTask::FileCreated { path }
            | BackgroundTask::FileDeleted { path }
            | BackgroundTask::FileOverwritten { path }
            | BackgroundTask::FileConvertedToFull { path }
            | BackgroundTask::FileRenamed { path, .. }
            | BackgroundTask::FileHardLinkCreated { path }
            | BackgroundTask::FileSuperseded { path }
            | BackgroundTask::FolderCreated { path }
            | BackgroundTask::FolderDeleted { path }
            | BackgroundTask::FolderRenamed { path, .. } => path,
            BackgroundTask::PlaceholderCreated { record } => &record.path,
        }
    }

    pub fn old_virtual_path(&self) -> Option<&str> {
        match self {
            BackgroundTask::FileRenamed { old_path, .. }
            | BackgroundTask::FolderRenamed { old_path, .. } => Some(old_path),
            _ => None,
        }
    }

    pub fn placeholder(&self) -> Option<&PlaceholderRecord> {
        match self {
            BackgroundTask::PlaceholderCreated { record } => Some(record),
            _ => None,
        }
    }

    /// Whether any path the task touches is inside `.git`.
    pub fn touches_dot_git(&self) -> bool {
        paths::is_path_inside_dot_git(self.virtual_path())
            || self.old_virtual_path().is_some_and(paths::is_path_inside_dot_git)
    }

    /// Rebuild a task from the columns of the durable log.
    pub fn from_columns(
        operation: OperationType,
        virtual_path: String,
        old_virtual_path: Option<String>,
        path_type: Option<PathType>,
        sha: Option<String>,
    ) -> Result<Self, String> {
        let old_path = || {
            old_virtual_path
                .clone()
                .ok_or_else(|| format!("{} without an old path", operation))
        };

        let path = virtual_path;
        Ok(match operation {
            OperationType::FileCreated => BackgroundTask::FileCreated { path },
            OperationType::FileDeleted => BackgroundTask::FileDeleted { path },
            OperationType::FileOverwritten => BackgroundTask::FileOverwritten { path },
            OperationType::FileConvertedToFull => BackgroundTask::FileConvertedToFull { path },
            OperationType::FileRenamed => BackgroundTask::FileRenamed {
                old_path: old_path()?,
                path,
            },
            OperationType::FileHardLinkCreated => BackgroundTask::FileHardLinkCreated { path },
            OperationType::FileSuperseded => BackgroundTask::FileSuperseded { path },
            OperationType::FolderCreated => BackgroundTask::FolderCreated { path },
            OperationType::FolderDeleted => BackgroundTask::FolderDeleted { path },
            OperationType::FolderRenamed => BackgroundTask::FolderRenamed {
                old_path: old_path()?,
                path,
            },
            OperationType::PlaceholderCreated => {
                let path_type =
                    path_type.ok_or_else(|| "placeholder task without a path type".to_string())?;
                BackgroundTask::PlaceholderCreated {
                    record: PlaceholderRecord {
                        path,
                        kind: PlaceholderKind::from_columns(path_type, sha)?,
                    },
                }
            }
        })
    }
}

impl std::fmt::Display for BackgroundTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.old_virtual_path() {
            Some(old) => write!(f, "{} {} -> {}", self.operation(), old, self.virtual_path()),
            None => write!(f, "{} {}", self.operation(), self.virtual_path()),
        }
    }
}
