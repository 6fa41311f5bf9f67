//! Unix socket listener for the control protocol

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

use common::protocol;

use super::dispatcher::Dispatcher;
use super::MountError;

pub struct ControlServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl ControlServer {
    /// Bind the socket, replacing a stale one left by a previous run.
    pub fn bind(socket_path: &Path) -> Result<Self, MountError> {
        let bind_error = |source: std::io::Error| MountError::Bind {
            path: socket_path.to_path_buf(),
            source,
        };

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(bind_error)?;
        }
        if socket_path.exists() {
            std::fs::remove_file(socket_path).map_err(bind_error)?;
        }

        let listener = UnixListener::bind(socket_path).map_err(bind_error)?;
        tracing::info!("control socket listening on {}", socket_path.display());

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until the returned handle is shut down.
    pub fn spawn(self, dispatcher: Arc<Dispatcher>) -> ServerHandle {
        let socket_path = self.socket_path.clone();
        let accept_loop = tokio::spawn(accept_connections(self.listener, dispatcher));
        ServerHandle {
            accept_loop,
            socket_path,
        }
    }
}

pub struct ServerHandle {
    accept_loop: JoinHandle<()>,
    socket_path: PathBuf,
}

impl ServerHandle {
    /// Stop accepting connections and remove the socket file.
    pub fn shutdown(self) {
        self.accept_loop.abort();
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "failed to remove control socket {}: {}",
                self.socket_path.display(),
                e
            ),
        }
    }
}

async fn accept_connections(listener: UnixListener, dispatcher: Arc<Dispatcher>) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _addr)) => stream,
            Err(e) => {
                tracing::error!("failed to accept control connection: {}", e);
                continue;
            }
        };

        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, &dispatcher).await {
                tracing::debug!("control connection closed: {}", e);
            }
        });
    }
}

/// Answer requests on one connection in order until the client hangs up.
async fn serve_connection(
    stream: UnixStream,
    dispatcher: &Dispatcher,
) -> Result<(), protocol::ProtocolError> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    while let Some(message) = protocol::read_message(&mut reader).await? {
        dispatcher.handle(message, &mut write).await?;
    }
    Ok(())
}
