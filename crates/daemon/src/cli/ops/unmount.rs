use clap::Args;
use owo_colors::OwoColorize;

use common::client::{ClientError, MountClient};
use common::protocol::UnmountResult;

use crate::cli::op::{Op, OpContext};

/// Ask the running mount to unmount and wait until it has
#[derive(Args, Debug, Clone)]
pub struct Unmount;

#[derive(Debug, thiserror::Error)]
pub enum UnmountError {
    #[error("mount is not running: {0}")]
    Client(#[from] ClientError),
    #[error("unmount refused: {0}")]
    Refused(UnmountResult),
}

#[async_trait::async_trait]
impl Op for Unmount {
    type Error = UnmountError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let mut client = MountClient::connect(ctx.socket_path()).await?;
        match client.unmount().await? {
            UnmountResult::Completed => Ok(format!(
                "{} {}",
                ctx.enlistment_root.display(),
                "unmounted".green()
            )),
            UnmountResult::AlreadyUnmounting => Ok(format!(
                "{} {}",
                ctx.enlistment_root.display(),
                "is already unmounting".yellow()
            )),
            other => Err(UnmountError::Refused(other)),
        }
    }
}
