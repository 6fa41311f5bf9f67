use std::path::PathBuf;

use vgit_daemon::state::EnlistmentLayout;

/// Shared context handed to every command
#[derive(Debug, Clone)]
pub struct OpContext {
    pub enlistment_root: PathBuf,
    /// Overrides the socket path from `mount.toml`
    pub socket_path: Option<PathBuf>,
}

impl OpContext {
    pub fn layout(&self) -> EnlistmentLayout {
        EnlistmentLayout::new(&self.enlistment_root)
    }

    /// Socket the mount for this enlistment listens on.
    pub fn socket_path(&self) -> PathBuf {
        if let Some(path) = &self.socket_path {
            return path.clone();
        }
        vgit_daemon::config::MountConfig::load(&self.enlistment_root)
            .map(|config| config.socket_path)
            .unwrap_or_else(|_| self.layout().default_socket_path)
    }
}

#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;
    type Output;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

/// Build a clap `Command` enum over ops, plus `OpError` and `OpOutput` enums
/// wrapping each op's error and output.
#[macro_export]
macro_rules! command_enum {
    ($(($variant:ident, $type:ty)),* $(,)?) => {
        #[derive(clap::Subcommand, Debug, Clone)]
        pub enum Command {
            $($variant($type),)*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(
                #[error(transparent)]
                $variant(<$type as $crate::cli::op::Op>::Error),
            )*
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $($variant(<$type as $crate::cli::op::Op>::Output),)*
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(OpOutput::$variant(output) => write!(f, "{}", output),)*
                }
            }
        }

        #[async_trait::async_trait]
        impl $crate::cli::op::Op for Command {
            type Error = OpError;
            type Output = OpOutput;

            async fn execute(
                &self,
                ctx: &$crate::cli::op::OpContext,
            ) -> Result<Self::Output, Self::Error> {
                match self {
                    $(
                        Command::$variant(op) => op
                            .execute(ctx)
                            .await
                            .map(OpOutput::$variant)
                            .map_err(OpError::$variant),
                    )*
                }
            }
        }
    };
}
