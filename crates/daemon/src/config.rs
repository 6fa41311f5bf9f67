//! Mount configuration read from `.vgit/mount.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::database::PoolConfig;
use crate::mount::pipeline::PipelineOptions;
use crate::state::EnlistmentLayout;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("cache server url is invalid: {0}")]
    CacheServerUrl(#[from] url::ParseError),
    #[error("background_workers must be at least 1")]
    NoWorkers,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub initial_connections: usize,
    pub acquire_timeout_ms: u64,
    pub max_idle_connections: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        let defaults = PoolConfig::default();
        Self {
            initial_connections: defaults.initial_connections,
            acquire_timeout_ms: defaults.acquire_timeout.as_millis() as u64,
            max_idle_connections: defaults.max_idle_connections,
        }
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        PoolConfig {
            initial_connections: settings.initial_connections,
            acquire_timeout: Duration::from_millis(settings.acquire_timeout_ms),
            max_idle_connections: settings.max_idle_connections,
        }
    }
}

/// Contents of `mount.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub socket_path: Option<PathBuf>,
    pub repo_url: Option<String>,
    pub cache_server_url: Option<String>,
    pub local_cache_root: Option<PathBuf>,
    pub git_objects_root: Option<PathBuf>,
    pub pool: PoolSettings,
    pub heartbeat_interval_secs: Option<u64>,
    pub background_workers: Option<usize>,
}

impl ConfigFile {
    /// Read `path`, or defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully resolved mount configuration
#[derive(Debug, Clone)]
pub struct MountConfig {
    pub layout: EnlistmentLayout,
    pub socket_path: PathBuf,
    pub repo_url: String,
    pub cache_server_url: Option<Url>,
    pub local_cache_root: PathBuf,
    pub git_objects_root: PathBuf,
    pub pool: PoolConfig,
    pub heartbeat_interval: Duration,
    pub background_workers: usize,
}

impl MountConfig {
    /// Resolve `file` against the enlistment layout.
    pub fn resolve(layout: EnlistmentLayout, file: ConfigFile) -> Result<Self, ConfigError> {
        let cache_server_url = file
            .cache_server_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .map(Url::parse)
            .transpose()?;

        let background_workers = file.background_workers.unwrap_or(1);
        if background_workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        let git_objects_root = file
            .git_objects_root
            .unwrap_or_else(|| layout.default_git_objects_root.clone());

        Ok(Self {
            socket_path: file
                .socket_path
                .unwrap_or_else(|| layout.default_socket_path.clone()),
            repo_url: file.repo_url.unwrap_or_default(),
            cache_server_url,
            local_cache_root: file
                .local_cache_root
                .unwrap_or_else(|| git_objects_root.clone()),
            git_objects_root,
            pool: PoolConfig::from(&file.pool),
            heartbeat_interval: Duration::from_secs(file.heartbeat_interval_secs.unwrap_or(60)),
            background_workers,
            layout,
        })
    }

    /// Load `<enlistment>/.vgit/mount.toml` and resolve it.
    pub fn load(enlistment_root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let layout = EnlistmentLayout::new(enlistment_root);
        let file = ConfigFile::load(&layout.config_path)?;
        Self::resolve(layout, file)
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            background_workers: self.background_workers,
            heartbeat_interval: self.heartbeat_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = MountConfig::load(temp_dir.path()).unwrap();

        assert_eq!(config.socket_path, temp_dir.path().join(".vgit/mount.sock"));
        assert_eq!(config.git_objects_root, temp_dir.path().join(".git/objects"));
        assert_eq!(config.local_cache_root, config.git_objects_root);
        assert_eq!(config.cache_server_url, None);
        assert_eq!(config.pool.initial_connections, 5);
        assert_eq!(config.pool.acquire_timeout, Duration::from_millis(50));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(60));
        assert_eq!(config.background_workers, 1);
    }

    #[test]
    fn test_file_overrides() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join(".vgit")).unwrap();
        std::fs::write(
            temp_dir.path().join(".vgit/mount.toml"),
            r#"
repo_url = "https://example.com/repo.git"
cache_server_url = "https://cache.example.com"
heartbeat_interval_secs = 5

[pool]
initial_connections = 2
"#,
        )
        .unwrap();

        let config = MountConfig::load(temp_dir.path()).unwrap();
        assert_eq!(config.repo_url, "https://example.com/repo.git");
        assert_eq!(
            config.cache_server_url.as_ref().map(Url::as_str),
            Some("https://cache.example.com/")
        );
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.pool.initial_connections, 2);
        assert_eq!(config.pool.max_idle_connections, 16);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join(".vgit")).unwrap();
        std::fs::write(temp_dir.path().join(".vgit/mount.toml"), "pool = 3").unwrap();

        assert!(matches!(
            MountConfig::load(temp_dir.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let layout = EnlistmentLayout::new("/repo");
        let file = ConfigFile {
            background_workers: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            MountConfig::resolve(layout, file),
            Err(ConfigError::NoWorkers)
        ));
    }
}
