//! On-disk layout of an enlistment's mount state

use std::path::{Path, PathBuf};

/// Directory under the enlistment root holding all mount state
pub const DOT_DIR_NAME: &str = ".vgit";
pub const DATABASES_DIR_NAME: &str = "databases";
pub const DATABASE_FILE_NAME: &str = "vgit.sqlite";
pub const LOGS_DIR_NAME: &str = "logs";
pub const CONFIG_FILE_NAME: &str = "mount.toml";
pub const SOCKET_FILE_NAME: &str = "mount.sock";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnlistmentLayout {
    pub enlistment_root: PathBuf,
    pub dot_dir: PathBuf,
    pub database_path: PathBuf,
    pub logs_dir: PathBuf,
    pub config_path: PathBuf,
    pub default_socket_path: PathBuf,
    pub default_git_objects_root: PathBuf,
}

impl EnlistmentLayout {
    pub fn new(enlistment_root: impl AsRef<Path>) -> Self {
        let enlistment_root = enlistment_root.as_ref().to_path_buf();
        let dot_dir = enlistment_root.join(DOT_DIR_NAME);
        Self {
            database_path: dot_dir.join(DATABASES_DIR_NAME).join(DATABASE_FILE_NAME),
            logs_dir: dot_dir.join(LOGS_DIR_NAME),
            config_path: dot_dir.join(CONFIG_FILE_NAME),
            default_socket_path: dot_dir.join(SOCKET_FILE_NAME),
            default_git_objects_root: enlistment_root.join(".git").join("objects"),
            dot_dir,
            enlistment_root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let layout = EnlistmentLayout::new("/src/repo");
        assert_eq!(layout.dot_dir, PathBuf::from("/src/repo/.vgit"));
        assert_eq!(
            layout.database_path,
            PathBuf::from("/src/repo/.vgit/databases/vgit.sqlite")
        );
        assert_eq!(layout.logs_dir, PathBuf::from("/src/repo/.vgit/logs"));
        assert_eq!(layout.default_socket_path, PathBuf::from("/src/repo/.vgit/mount.sock"));
        assert_eq!(
            layout.default_git_objects_root,
            PathBuf::from("/src/repo/.git/objects")
        );
    }
}
