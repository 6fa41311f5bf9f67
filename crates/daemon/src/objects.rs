//! Fetching missing git objects from the cache server

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use url::Url;

use common::content_id::ContentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadResult {
    Success,
    DownloadFailed,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("no cache server is configured")]
    NoCacheServer,
    #[error("invalid object url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("cache server returned {0}")]
    Status(reqwest::StatusCode),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[async_trait]
pub trait ObjectDownloader: Send + Sync {
    async fn try_download_and_save_object(&self, id: &ContentId) -> DownloadResult;
}

/// Downloads loose objects over HTTP into the enlistment's object directory.
#[derive(Debug, Clone)]
pub struct HttpObjectDownloader {
    client: reqwest::Client,
    cache_server: Option<Url>,
    git_objects_root: PathBuf,
}

impl HttpObjectDownloader {
    pub fn new(cache_server: Option<Url>, git_objects_root: impl Into<PathBuf>) -> Self {
        Self::with_client(reqwest::Client::new(), cache_server, git_objects_root)
    }

    pub fn with_client(
        client: reqwest::Client,
        cache_server: Option<Url>,
        git_objects_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            cache_server,
            git_objects_root: git_objects_root.into(),
        }
    }

    /// `<cache_server>/gvfs/objects/<sha>`, with the sha lowercased
    pub fn object_url(&self, id: &ContentId) -> Result<Url, DownloadError> {
        let base = self
            .cache_server
            .as_ref()
            .ok_or(DownloadError::NoCacheServer)?;
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base.join(&format!("gvfs/objects/{}", id.object_name()))?)
    }

    pub fn loose_object_path(&self, id: &ContentId) -> PathBuf {
        let (dir, file) = id.loose_object_path();
        self.git_objects_root.join(dir).join(file)
    }

    async fn download(&self, id: &ContentId) -> Result<PathBuf, DownloadError> {
        let url = self.object_url(id)?;
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(DownloadError::Status(response.status()));
        }
        let bytes = response.bytes().await?;

        let destination = self.loose_object_path(id);
        write_atomically(&destination, &bytes).await?;
        Ok(destination)
    }
}

async fn write_atomically(destination: &Path, bytes: &[u8]) -> Result<(), DownloadError> {
    let to_error = |source: std::io::Error| DownloadError::Write {
        path: destination.to_path_buf(),
        source,
    };

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(to_error)?;
    }
    let staging = destination.with_extension("tmp");
    tokio::fs::write(&staging, bytes).await.map_err(to_error)?;
    tokio::fs::rename(&staging, destination)
        .await
        .map_err(to_error)
}

#[async_trait]
impl ObjectDownloader for HttpObjectDownloader {
    async fn try_download_and_save_object(&self, id: &ContentId) -> DownloadResult {
        match self.download(id).await {
            Ok(path) => {
                tracing::debug!(sha = %id, path = %path.display(), "downloaded object");
                DownloadResult::Success
            }
            Err(e) => {
                tracing::warn!(sha = %id, "object download failed: {}", e);
                DownloadResult::DownloadFailed
            }
        }
    }
}
