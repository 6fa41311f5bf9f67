//! Routes control requests by header and mount state
//!
//! Every request gets exactly one response through a [`Responder`]. The only
//! exception is unmount, which acknowledges first and reports completion once
//! the pipeline has stopped.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::AsyncWrite;
use tokio::sync::watch;

use common::content_id::ContentId;
use common::exit_code::ReturnCode;
use common::protocol::status::NO_CACHE_SERVER;
use common::protocol::{
    self, headers, AcquireLockResult, DownloadObjectResult, LockData, Message,
    ModifiedPathsResult, PostFetchResult, ProtocolError, ReleaseLockResult, StatusResponse,
    UnmountResult, INTERNAL_ERROR, MODIFIED_PATHS_VERSION, MOUNT_NOT_READY, UNKNOWN_REQUEST,
};

use crate::database::SCHEMA_VERSION;
use crate::lock::LockArbiter;
use crate::maintenance::{MaintenanceStep, PostFetchStep};
use crate::objects::DownloadResult;

use super::pipeline::Pipeline;
use super::state::{MountState, MountStateCell};

/// Sends the single response for one request.
pub struct Responder<'a, W: AsyncWrite + Unpin> {
    writer: &'a mut W,
    header: String,
    finished: bool,
    acknowledged: bool,
}

impl<'a, W: AsyncWrite + Unpin> Responder<'a, W> {
    pub fn new(writer: &'a mut W, header: impl Into<String>) -> Self {
        Self {
            writer,
            header: header.into(),
            finished: false,
            acknowledged: false,
        }
    }

    pub async fn send(self, message: Message) -> Result<(), ProtocolError> {
        let line = message.to_line();
        self.send_line(&line).await
    }

    /// Send a line that is not `header|body` framed, such as the status JSON.
    ///
    /// A line that cannot be framed is replaced by `InternalError` so the
    /// peer still reads exactly one response.
    pub async fn send_line(mut self, line: &str) -> Result<(), ProtocolError> {
        self.finished = true;
        match protocol::write_line(&mut *self.writer, line).await {
            Err(ProtocolError::EmbeddedNewline) => {
                tracing::error!(header = %self.header, "response contains a line break");
                protocol::write_line(&mut *self.writer, INTERNAL_ERROR).await
            }
            result => result,
        }
    }

    /// First half of an unmount reply. The final result still goes through `send`.
    async fn acknowledge_unmount(&mut self) -> Result<(), ProtocolError> {
        debug_assert!(!self.acknowledged, "unmount acknowledged twice");
        self.acknowledged = true;
        protocol::write_message(
            &mut *self.writer,
            &Message::header_only(UnmountResult::Acknowledged.as_str()),
        )
        .await
    }

    /// Finish the request without replying.
    fn abandon(mut self) {
        self.finished = true;
    }
}

impl<W: AsyncWrite + Unpin> Drop for Responder<'_, W> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(header = %self.header, "request finished without a response");
        }
    }
}

fn unmount_refusal(state: MountState) -> UnmountResult {
    match state {
        MountState::Mounting => UnmountResult::NotMounted,
        MountState::Unmounting => UnmountResult::AlreadyUnmounting,
        _ => UnmountResult::UnknownState,
    }
}

/// Static facts reported by the status query.
#[derive(Debug, Clone, Default)]
pub struct MountInfo {
    pub enlistment_root: PathBuf,
    pub local_cache_root: PathBuf,
    pub repo_url: String,
    pub cache_server: Option<String>,
}

pub struct Dispatcher {
    info: MountInfo,
    state: MountStateCell,
    lock: Arc<LockArbiter>,
    pipeline: RwLock<Option<Arc<Pipeline>>>,
    exit_tx: watch::Sender<Option<ReturnCode>>,
}

impl Dispatcher {
    pub fn new(
        info: MountInfo,
        state: MountStateCell,
        lock: Arc<LockArbiter>,
    ) -> (Self, watch::Receiver<Option<ReturnCode>>) {
        let (exit_tx, exit_rx) = watch::channel(None);
        (
            Self {
                info,
                state,
                lock,
                pipeline: RwLock::new(None),
                exit_tx,
            },
            exit_rx,
        )
    }

    pub fn state(&self) -> &MountStateCell {
        &self.state
    }

    pub fn lock(&self) -> &Arc<LockArbiter> {
        &self.lock
    }

    /// Make the started pipeline visible to request handlers.
    pub fn attach_pipeline(&self, pipeline: Arc<Pipeline>) {
        *self.pipeline.write() = Some(pipeline);
    }

    fn pipeline(&self) -> Option<Arc<Pipeline>> {
        self.pipeline.read().clone()
    }

    /// Ask the process to exit with `code`.
    pub fn request_exit(&self, code: ReturnCode) {
        self.exit_tx.send_replace(Some(code));
    }

    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            enlistment_root: self.info.enlistment_root.display().to_string(),
            local_cache_root: self.info.local_cache_root.display().to_string(),
            repo_url: self.info.repo_url.clone(),
            cache_server: self
                .info
                .cache_server
                .clone()
                .unwrap_or_else(|| NO_CACHE_SERVER.to_string()),
            lock_status: self.lock.status(),
            mount_status: self.state.get(),
            disk_layout_version: SCHEMA_VERSION.to_string(),
            background_operation_count: self
                .pipeline()
                .map(|pipeline| pipeline.callbacks().background_operation_count())
                .unwrap_or(0),
        }
    }

    /// Move to `Unmounting` and stop the pipeline.
    ///
    /// Returns the refusal to report when the mount cannot unmount from its
    /// current state.
    pub async fn begin_unmount(&self) -> Result<(), UnmountResult> {
        if let Err(e) = self.state.transition(MountState::Unmounting) {
            return Err(unmount_refusal(e.actual));
        }

        self.teardown().await;
        Ok(())
    }

    async fn teardown(&self) {
        if let Some(pipeline) = self.pipeline() {
            pipeline.stop().await;
        }
        self.lock.clear();
    }

    /// Answer one request.
    pub async fn handle<W>(&self, message: Message, writer: &mut W) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let responder = Responder::new(writer, message.header.as_str());
        tracing::debug!(header = %message.header, "handling request");

        match message.header.as_str() {
            headers::GET_STATUS => self.handle_status(responder).await,
            headers::UNMOUNT => self.handle_unmount(responder).await,
            headers::ACQUIRE_LOCK => self.handle_acquire_lock(&message, responder).await,
            headers::RELEASE_LOCK => self.handle_release_lock(&message, responder).await,
            headers::DOWNLOAD_OBJECT => self.handle_download_object(&message, responder).await,
            headers::MODIFIED_PATHS_LIST => self.handle_modified_paths(&message, responder).await,
            headers::POST_FETCH_JOB => self.handle_post_fetch(&message, responder).await,
            other => {
                tracing::warn!(header = %other, "unknown request");
                responder.send(Message::header_only(UNKNOWN_REQUEST)).await
            }
        }
    }

    /// The pipeline when the mount is `Ready`, otherwise `None`.
    fn ready_pipeline(&self) -> Option<Arc<Pipeline>> {
        if self.state.is_ready() {
            self.pipeline()
        } else {
            None
        }
    }

    async fn handle_status<W: AsyncWrite + Unpin>(
        &self,
        responder: Responder<'_, W>,
    ) -> Result<(), ProtocolError> {
        let line = self.status().to_line()?;
        responder.send_line(&line).await
    }

    async fn handle_unmount<W: AsyncWrite + Unpin>(
        &self,
        mut responder: Responder<'_, W>,
    ) -> Result<(), ProtocolError> {
        if let Err(e) = self.state.transition(MountState::Unmounting) {
            let refusal = unmount_refusal(e.actual);
            tracing::info!(state = %e.actual, response = %refusal, "unmount refused");
            return responder
                .send(Message::header_only(refusal.as_str()))
                .await;
        }

        tracing::info!("unmount requested");
        // the client may hang up after the ack; teardown must still run
        let acknowledged = responder.acknowledge_unmount().await;
        self.teardown().await;

        let completed = match acknowledged {
            Ok(()) => {
                responder
                    .send(Message::header_only(UnmountResult::Completed.as_str()))
                    .await
            }
            Err(e) => {
                responder.abandon();
                Err(e)
            }
        };
        self.request_exit(ReturnCode::Success);
        completed
    }

    async fn handle_acquire_lock<W: AsyncWrite + Unpin>(
        &self,
        message: &Message,
        responder: Responder<'_, W>,
    ) -> Result<(), ProtocolError> {
        let Some(requester) = LockData::from_body(message.body_str()) else {
            let header = match self.state.get() {
                MountState::Unmounting => AcquireLockResult::UnmountInProgress.as_str(),
                MountState::Ready => {
                    tracing::warn!("acquire-lock request without lock data");
                    UNKNOWN_REQUEST
                }
                _ => MOUNT_NOT_READY,
            };
            return responder.send(Message::header_only(header)).await;
        };

        let response = self.lock.handle_acquire_request(&requester);
        tracing::debug!(requester = %requester, result = %response.result, "acquire-lock");
        responder.send(response.to_message()?).await
    }

    async fn handle_release_lock<W: AsyncWrite + Unpin>(
        &self,
        message: &Message,
        responder: Responder<'_, W>,
    ) -> Result<(), ProtocolError> {
        if !self.state.is_ready() {
            return responder
                .send(Message::header_only(ReleaseLockResult::MountNotReady.as_str()))
                .await;
        }

        let Some(requester) = LockData::from_body(message.body_str()) else {
            // lock state is no longer trustworthy once a client sends garbage here
            tracing::error!("release-lock request without lock data, shutting down");
            responder.abandon();
            if self.state.transition(MountState::Unmounting).is_ok() {
                self.teardown().await;
            }
            self.request_exit(ReturnCode::NullRequestData);
            return Ok(());
        };

        self.lock.release_lock_held_by_external_process(requester.pid);
        responder
            .send(Message::header_only(ReleaseLockResult::Released.as_str()))
            .await
    }

    async fn handle_download_object<W: AsyncWrite + Unpin>(
        &self,
        message: &Message,
        responder: Responder<'_, W>,
    ) -> Result<(), ProtocolError> {
        let Some(pipeline) = self.ready_pipeline() else {
            return responder
                .send(Message::header_only(DownloadObjectResult::MountNotReady.as_str()))
                .await;
        };

        let sha = message.body_str().unwrap_or_default();
        let result = match sha.parse::<ContentId>() {
            Err(e) => {
                tracing::debug!(sha, "rejecting download request: {}", e);
                DownloadObjectResult::InvalidSha
            }
            Ok(id) => match pipeline.downloader().try_download_and_save_object(&id).await {
                DownloadResult::Success => DownloadObjectResult::Success,
                DownloadResult::DownloadFailed => DownloadObjectResult::DownloadFailed,
            },
        };
        responder.send(Message::header_only(result.as_str())).await
    }

    async fn handle_modified_paths<W: AsyncWrite + Unpin>(
        &self,
        message: &Message,
        responder: Responder<'_, W>,
    ) -> Result<(), ProtocolError> {
        let Some(pipeline) = self.ready_pipeline() else {
            return responder
                .send(Message::header_only(ModifiedPathsResult::MountNotReady.as_str()))
                .await;
        };

        let version = message.body_str().unwrap_or_default();
        if version != MODIFIED_PATHS_VERSION {
            tracing::warn!(version, "modified-paths request with unsupported version");
            return responder
                .send(Message::header_only(ModifiedPathsResult::InvalidVersion.as_str()))
                .await;
        }

        let entries = pipeline.modified_paths().get_all();
        responder
            .send(Message::new(
                ModifiedPathsResult::Success.as_str(),
                Some(protocol::join_list(&entries)),
            ))
            .await
    }

    async fn handle_post_fetch<W: AsyncWrite + Unpin>(
        &self,
        message: &Message,
        responder: Responder<'_, W>,
    ) -> Result<(), ProtocolError> {
        let Some(pipeline) = self.ready_pipeline() else {
            return responder
                .send(Message::header_only(PostFetchResult::MountNotReady.as_str()))
                .await;
        };

        let pack_indexes: Vec<String> = match message.body_str() {
            None => Vec::new(),
            Some(body) => match serde_json::from_str(body) {
                Ok(pack_indexes) => pack_indexes,
                Err(e) => {
                    tracing::warn!("post-fetch request with malformed pack list: {}", e);
                    return responder.send(Message::header_only(UNKNOWN_REQUEST)).await;
                }
            },
        };

        let step = MaintenanceStep::PostFetch(PostFetchStep { pack_indexes });
        let result = match pipeline.maintenance().enqueue_one_time_step(step) {
            Ok(()) => PostFetchResult::Queued,
            Err(e) => {
                tracing::warn!("post-fetch step not queued: {}", e);
                PostFetchResult::MountNotReady
            }
        };
        responder.send(Message::header_only(result.as_str())).await
    }
}
