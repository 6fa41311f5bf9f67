use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;
use url::Url;

use common::exit_code::ReturnCode;
use vgit_daemon::config::{ConfigError, MountConfig};
use vgit_daemon::mount::Mount as MountProcess;

use crate::cli::op::{Op, OpContext};

/// Run the mount process for an enlistment in the foreground
#[derive(Args, Debug, Clone)]
pub struct Mount {
    /// Object cache server, overriding `cache_server_url` in mount.toml
    #[arg(long, env = "VGIT_CACHE_SERVER_URL")]
    pub cache_server_url: Option<Url>,

    /// Repository url reported by status
    #[arg(long)]
    pub repo_url: Option<String>,

    /// Directory git objects are downloaded into
    #[arg(long)]
    pub git_objects_root: Option<PathBuf>,

    /// Number of background task workers
    #[arg(long)]
    pub background_workers: Option<usize>,
}

#[derive(Debug)]
pub struct MountOutput {
    pub enlistment_root: PathBuf,
    pub code: ReturnCode,
}

impl fmt::Display for MountOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = match self.code {
            ReturnCode::Success => "unmounted".green().to_string(),
            other => format!("{} (exit code {})", "stopped".red(), other.code()),
        };
        write!(f, "{} {}", self.enlistment_root.display(), outcome)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl Mount {
    pub fn config(&self, ctx: &OpContext) -> Result<MountConfig, ConfigError> {
        let mut config = MountConfig::load(&ctx.enlistment_root)?;
        if let Some(url) = &self.cache_server_url {
            config.cache_server_url = Some(url.clone());
        }
        if let Some(repo_url) = &self.repo_url {
            config.repo_url = repo_url.clone();
        }
        if let Some(root) = &self.git_objects_root {
            config.git_objects_root = root.clone();
        }
        if let Some(workers) = self.background_workers {
            if workers == 0 {
                return Err(ConfigError::NoWorkers);
            }
            config.background_workers = workers;
        }
        if let Some(socket_path) = &ctx.socket_path {
            config.socket_path = socket_path.clone();
        }
        Ok(config)
    }
}

#[async_trait::async_trait]
impl Op for Mount {
    type Error = MountError;
    type Output = MountOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let config = self.config(ctx)?;
        let code = MountProcess::run(config).await;
        Ok(MountOutput {
            enlistment_root: ctx.enlistment_root.clone(),
            code,
        })
    }
}
