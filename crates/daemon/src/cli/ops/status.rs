use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::client::{ClientError, MountClient};
use common::protocol::{MountState, StatusResponse};

use crate::cli::op::{Op, OpContext};

/// Show the state of the mount for an enlistment
#[derive(Args, Debug, Clone)]
pub struct Status {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug)]
pub struct StatusOutput {
    pub status: StatusResponse,
    pub json: bool,
}

impl fmt::Display for StatusOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.json {
            let json = serde_json::to_string_pretty(&self.status).map_err(|_| fmt::Error)?;
            return write!(f, "{}", json);
        }

        let status = &self.status;
        let mount_status = match status.mount_status {
            MountState::Ready => status.mount_status.green().to_string(),
            MountState::Mounting | MountState::Unmounting => {
                status.mount_status.yellow().to_string()
            }
            MountState::MountFailed => status.mount_status.red().to_string(),
        };

        writeln!(f, "{} {}", "Mount status:".bold(), mount_status)?;
        writeln!(f, "  {} {}", "enlistment:".dimmed(), status.enlistment_root)?;
        writeln!(f, "  {} {}", "repo url:".dimmed(), status.repo_url)?;
        writeln!(f, "  {} {}", "cache server:".dimmed(), status.cache_server)?;
        writeln!(f, "  {} {}", "local cache:".dimmed(), status.local_cache_root)?;
        writeln!(f, "  {} {}", "lock:".dimmed(), status.lock_status)?;
        writeln!(
            f,
            "  {} {}",
            "background operations:".dimmed(),
            status.background_operation_count
        )?;
        write!(
            f,
            "  {} {}",
            "disk layout version:".dimmed(),
            status.disk_layout_version
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("mount is not running: {0}")]
    Client(#[from] ClientError),
}

#[async_trait::async_trait]
impl Op for Status {
    type Error = StatusError;
    type Output = StatusOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let mut client = MountClient::connect(ctx.socket_path()).await?;
        let status = client.get_status().await?;
        Ok(StatusOutput {
            status,
            json: self.json,
        })
    }
}
