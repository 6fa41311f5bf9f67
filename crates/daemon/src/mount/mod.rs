//! The mount process: lifecycle, request handling and teardown
//!
//! Startup order matters. The control socket is bound before anything else so
//! that status queries are answered while the stores load, and the mount only
//! reports `Ready` once every worker is running.

pub mod dispatcher;
pub mod pipeline;
pub mod server;
pub mod state;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;

use common::exit_code::ReturnCode;

use crate::background::{FileSystemCallbacks, NoStatusCache, QueueError};
use crate::config::MountConfig;
use crate::database::{Database, DatabaseError};
use crate::lock::{LockArbiter, SessionContext};
use crate::maintenance::LoggingMaintenance;
use crate::objects::HttpObjectDownloader;

use dispatcher::{Dispatcher, MountInfo};
use pipeline::{Collaborators, Pipeline};
use server::{ControlServer, ServerHandle};
use state::{MountState, MountStateCell, TransitionError};

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("failed to bind control socket {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("background queue error: {0}")]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Collaborators used when the caller does not supply any.
pub fn default_collaborators(config: &MountConfig) -> Collaborators {
    Collaborators {
        downloader: Arc::new(HttpObjectDownloader::new(
            config.cache_server_url.clone(),
            config.git_objects_root.clone(),
        )),
        maintenance: Arc::new(LoggingMaintenance),
        status_cache: Arc::new(NoStatusCache),
    }
}

/// A mount that has reached `Ready`.
pub struct RunningMount {
    dispatcher: Arc<Dispatcher>,
    pipeline: Arc<Pipeline>,
    server: ServerHandle,
    exit_rx: watch::Receiver<Option<ReturnCode>>,
    socket_path: PathBuf,
}

pub struct Mount;

impl Mount {
    /// Bring the mount up to `Ready`.
    ///
    /// On failure the mount is left in `MountFailed`, the socket is removed and
    /// nothing keeps running.
    pub async fn start(
        config: &MountConfig,
        collaborators: Collaborators,
    ) -> Result<RunningMount, MountError> {
        let mount_state = MountStateCell::new();
        let lock = Arc::new(LockArbiter::new(
            mount_state.clone(),
            SessionContext::default(),
        ));
        let info = MountInfo {
            enlistment_root: config.layout.enlistment_root.clone(),
            local_cache_root: config.local_cache_root.clone(),
            repo_url: config.repo_url.clone(),
            cache_server: config.cache_server_url.as_ref().map(|url| url.to_string()),
        };
        let (dispatcher, exit_rx) = Dispatcher::new(info, mount_state.clone(), lock.clone());
        let dispatcher = Arc::new(dispatcher);

        let server = ControlServer::bind(&config.socket_path)?;
        let socket_path = server.socket_path().to_path_buf();
        let server = server.spawn(dispatcher.clone());

        let pipeline = match start_pipeline(config, &lock, collaborators).await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                tracing::error!("mount failed: {}", e);
                let _ = mount_state.transition(MountState::MountFailed);
                server.shutdown();
                return Err(e);
            }
        };

        // no index projection is maintained here; a provider adapter invalidates it when needed
        pipeline.callbacks().on_projection_parsed();
        dispatcher.attach_pipeline(pipeline.clone());
        mount_state.transition(MountState::Ready)?;
        tracing::info!(
            enlistment = %config.layout.enlistment_root.display(),
            "mount is ready"
        );

        Ok(RunningMount {
            dispatcher,
            pipeline,
            server,
            exit_rx,
            socket_path,
        })
    }

    /// Run a mount until it is unmounted, `ctrl-c` is received, or a fatal
    /// request forces it down. Returns the process exit code.
    pub async fn run(config: MountConfig) -> ReturnCode {
        let collaborators = default_collaborators(&config);
        match Self::start(&config, collaborators).await {
            Ok(running) => {
                running
                    .wait(async {
                        if let Err(e) = tokio::signal::ctrl_c().await {
                            tracing::error!("failed to listen for ctrl-c: {}", e);
                            std::future::pending::<()>().await;
                        }
                    })
                    .await
            }
            Err(_) => ReturnCode::GenericError,
        }
    }
}

async fn start_pipeline(
    config: &MountConfig,
    lock: &Arc<LockArbiter>,
    collaborators: Collaborators,
) -> Result<Arc<Pipeline>, MountError> {
    let db = Database::open(&config.layout.database_path, config.pool.clone()).await?;
    Pipeline::start(db, lock, collaborators, config.pipeline_options()).await
}

impl RunningMount {
    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    pub fn state(&self) -> MountState {
        self.dispatcher.state().get()
    }

    /// Front door for filesystem events from the virtualization provider.
    pub fn callbacks(&self) -> &Arc<FileSystemCallbacks> {
        self.pipeline.callbacks()
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Wait for an exit request or `interrupt`, then tear everything down.
    ///
    /// `interrupt` completing is handled like an unmount request.
    pub async fn wait(self, interrupt: impl Future<Output = ()>) -> ReturnCode {
        let mut exit_rx = self.exit_rx.clone();
        let mut exit_after_interrupt = self.exit_rx.clone();

        let code = tokio::select! {
            code = wait_for_exit(&mut exit_rx) => code,
            _ = interrupt => {
                tracing::info!("interrupted, unmounting");
                match self.dispatcher.begin_unmount().await {
                    Ok(()) => ReturnCode::Success,
                    // an unmount is already under way; let it report its own code
                    Err(_) => wait_for_exit(&mut exit_after_interrupt).await,
                }
            }
        };

        self.pipeline.stop().await;
        self.server.shutdown();
        tracing::info!(exit_code = code.code(), "mount stopped");
        code
    }
}

async fn wait_for_exit(exit_rx: &mut watch::Receiver<Option<ReturnCode>>) -> ReturnCode {
    match exit_rx.wait_for(Option::is_some).await {
        Ok(code) => (*code).unwrap_or(ReturnCode::GenericError),
        Err(_) => ReturnCode::GenericError,
    }
}
