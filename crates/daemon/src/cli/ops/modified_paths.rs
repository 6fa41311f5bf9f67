use clap::Args;

use common::client::{ClientError, MountClient};

use crate::cli::op::{Op, OpContext};

/// Print the paths git treats as locally modified
#[derive(Args, Debug, Clone)]
pub struct ModifiedPaths {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ModifiedPathsError {
    #[error("mount is not running: {0}")]
    Client(#[from] ClientError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait::async_trait]
impl Op for ModifiedPaths {
    type Error = ModifiedPathsError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let mut client = MountClient::connect(ctx.socket_path()).await?;
        let mut entries = client.modified_paths().await?;
        entries.sort();

        if self.json {
            return Ok(serde_json::to_string_pretty(&entries)?);
        }
        Ok(entries.join("\n"))
    }
}
