//! Client side of the control protocol
//!
//! Used by the `vgit` CLI and by git hooks that need the lock or the
//! modified-paths list. A connection may carry any number of sequential
//! requests.

use std::path::{Path, PathBuf};

use tokio::io::BufReader;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::protocol::{
    self, headers, AcquireLockResponse, DownloadObjectResult, LockData, Message,
    ModifiedPathsResult, PostFetchResult, ProtocolError, ReleaseLockResult, StatusResponse,
    UnmountResult, MODIFIED_PATHS_VERSION,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to mount at {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("mount closed the connection")]
    Disconnected,
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

pub struct MountClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl MountClient {
    pub async fn connect(socket_path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = socket_path.as_ref();
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| ClientError::Connect {
                path: path.to_path_buf(),
                source,
            })?;
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer: write,
        })
    }

    /// Send a message and return the first response line as a message.
    pub async fn send(&mut self, message: &Message) -> Result<Message, ClientError> {
        protocol::write_message(&mut self.writer, message).await?;
        self.next_message().await
    }

    async fn next_line(&mut self) -> Result<String, ClientError> {
        protocol::read_line(&mut self.reader)
            .await?
            .ok_or(ClientError::Disconnected)
    }

    async fn next_message(&mut self) -> Result<Message, ClientError> {
        Ok(Message::from_line(&self.next_line().await?))
    }

    pub async fn get_status(&mut self) -> Result<StatusResponse, ClientError> {
        protocol::write_message(&mut self.writer, &Message::header_only(headers::GET_STATUS))
            .await?;
        let line = self.next_line().await?;
        Ok(StatusResponse::from_line(&line)?)
    }

    /// Ask the mount to unmount and wait for the teardown to finish.
    ///
    /// Returns the final result: `Completed` on success, otherwise whatever
    /// refusal the mount sent instead of `Acknowledged`.
    pub async fn unmount(&mut self) -> Result<UnmountResult, ClientError> {
        let first: UnmountResult = self
            .send(&Message::header_only(headers::UNMOUNT))
            .await?
            .header
            .parse()?;
        if first != UnmountResult::Acknowledged {
            return Ok(first);
        }

        Ok(self.next_message().await?.header.parse()?)
    }

    pub async fn acquire_lock(
        &mut self,
        request: &LockData,
    ) -> Result<AcquireLockResponse, ClientError> {
        let response = self
            .send(&Message::new(headers::ACQUIRE_LOCK, Some(request.to_body()?)))
            .await?;
        Ok(AcquireLockResponse::from_message(&response)?)
    }

    pub async fn release_lock(
        &mut self,
        request: &LockData,
    ) -> Result<ReleaseLockResult, ClientError> {
        let response = self
            .send(&Message::new(headers::RELEASE_LOCK, Some(request.to_body()?)))
            .await?;
        Ok(response.header.parse()?)
    }

    pub async fn download_object(&mut self, sha: &str) -> Result<DownloadObjectResult, ClientError> {
        let response = self
            .send(&Message::new(headers::DOWNLOAD_OBJECT, Some(sha.to_string())))
            .await?;
        Ok(response.header.parse()?)
    }

    /// Fetch the modified-paths list using the current protocol version.
    pub async fn modified_paths(&mut self) -> Result<Vec<String>, ClientError> {
        match self.modified_paths_with_version(MODIFIED_PATHS_VERSION).await? {
            (ModifiedPathsResult::Success, entries) => Ok(entries),
            (other, _) => Err(ClientError::UnexpectedResponse(other.to_string())),
        }
    }

    pub async fn modified_paths_with_version(
        &mut self,
        version: &str,
    ) -> Result<(ModifiedPathsResult, Vec<String>), ClientError> {
        let response = self
            .send(&Message::new(
                headers::MODIFIED_PATHS_LIST,
                Some(version.to_string()),
            ))
            .await?;
        let result: ModifiedPathsResult = response.header.parse()?;
        let entries = response
            .body_str()
            .map(protocol::split_list)
            .unwrap_or_default();
        Ok((result, entries))
    }

    pub async fn post_fetch(
        &mut self,
        pack_indexes: &[String],
    ) -> Result<PostFetchResult, ClientError> {
        let body = serde_json::to_string(pack_indexes)
            .map_err(|e| ProtocolError::MalformedBody(e.to_string()))?;
        let response = self
            .send(&Message::new(headers::POST_FETCH_JOB, Some(body)))
            .await?;
        Ok(response.header.parse()?)
    }
}
