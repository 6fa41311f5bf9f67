//! End-to-end tests for a mount process driven over its control socket
//!
//! Each test brings a mount up in a temporary enlistment with stub
//! collaborators, talks to it through `MountClient`, and checks the stores
//! and exit code it leaves behind.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use common::client::MountClient;
use common::content_id::ContentId;
use common::exit_code::ReturnCode;
use common::protocol::{
    AcquireLockResult, DownloadObjectResult, LockData, MountState, PostFetchResult,
    ReleaseLockResult, UnmountResult,
};

use vgit_daemon::background::NoStatusCache;
use vgit_daemon::maintenance::LoggingMaintenance;
use vgit_daemon::mount::pipeline::Collaborators;
use vgit_daemon::objects::{DownloadResult, ObjectDownloader};
use vgit_daemon::{BackgroundTask, Database, Mount, MountConfig, RunningMount};

const KNOWN_SHA: &str = "0123456789abcdef0123456789abcdef01234567";

struct StubDownloader;

#[async_trait]
impl ObjectDownloader for StubDownloader {
    async fn try_download_and_save_object(&self, id: &ContentId) -> DownloadResult {
        if id.as_str() == KNOWN_SHA {
            DownloadResult::Success
        } else {
            DownloadResult::DownloadFailed
        }
    }
}

fn collaborators() -> Collaborators {
    Collaborators {
        downloader: Arc::new(StubDownloader),
        maintenance: Arc::new(LoggingMaintenance),
        status_cache: Arc::new(NoStatusCache),
    }
}

fn test_config(enlistment: &Path) -> MountConfig {
    let mut config = MountConfig::load(enlistment).unwrap();
    config.repo_url = "https://example.com/repo.git".to_string();
    config
}

async fn start_mount(enlistment: &Path) -> RunningMount {
    Mount::start(&test_config(enlistment), collaborators())
        .await
        .unwrap()
}

/// Wait until every queued background task has been applied.
async fn wait_for_drain(running: &RunningMount) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while running.callbacks().background_operation_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("background queue did not drain");
}

#[tokio::test]
async fn test_status_and_unmount_over_socket() {
    let temp_dir = TempDir::new().unwrap();
    let running = start_mount(temp_dir.path()).await;
    let socket_path = running.socket_path().clone();
    assert_eq!(running.state(), MountState::Ready);

    let mut client = MountClient::connect(&socket_path).await.unwrap();
    let status = client.get_status().await.unwrap();
    assert_eq!(status.mount_status, MountState::Ready);
    assert_eq!(status.repo_url, "https://example.com/repo.git");
    assert_eq!(status.cache_server, "None");
    assert_eq!(status.lock_status, "Free");
    assert_eq!(status.disk_layout_version, "1");
    assert_eq!(
        status.enlistment_root,
        temp_dir.path().display().to_string()
    );

    let mount = tokio::spawn(running.wait(std::future::pending()));
    assert_eq!(client.unmount().await.unwrap(), UnmountResult::Completed);

    let code = tokio::time::timeout(Duration::from_secs(5), mount)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code, ReturnCode::Success);
    assert!(!socket_path.exists());
}

#[tokio::test]
async fn test_interrupt_unmounts_cleanly() {
    let temp_dir = TempDir::new().unwrap();
    let running = start_mount(temp_dir.path()).await;
    let socket_path = running.socket_path().clone();

    let code = running.wait(async {}).await;
    assert_eq!(code, ReturnCode::Success);
    assert!(!socket_path.exists());
}

#[tokio::test]
async fn test_file_events_reach_modified_paths_list() {
    let temp_dir = TempDir::new().unwrap();
    let running = start_mount(temp_dir.path()).await;

    let callbacks = running.callbacks().clone();
    callbacks.on_file_created("src/main.rs").await.unwrap();
    callbacks.on_folder_created("docs").await.unwrap();
    callbacks.on_file_created("docs/guide.md").await.unwrap();
    callbacks.on_file_created(".git/index.lock").await.unwrap();
    wait_for_drain(&running).await;

    let mut client = MountClient::connect(running.socket_path()).await.unwrap();
    let mut entries = client.modified_paths().await.unwrap();
    entries.sort();
    // docs/guide.md is covered by the docs/ folder entry
    assert_eq!(entries, vec![".gitattributes", "docs/", "src/main.rs"]);

    let code = running.wait(async {}).await;
    assert_eq!(code, ReturnCode::Success);
}

#[tokio::test]
async fn test_rename_into_dot_git_drops_placeholder() {
    let temp_dir = TempDir::new().unwrap();
    let sha: ContentId = KNOWN_SHA.parse().unwrap();
    let running = start_mount(temp_dir.path()).await;
    let callbacks = running.callbacks().clone();

    callbacks
        .on_placeholder_created(vgit_daemon::PlaceholderRecord::file("foo.txt", sha), "git")
        .await
        .unwrap();
    wait_for_drain(&running).await;

    callbacks.on_file_renamed("foo.txt", ".git/foo.txt").await.unwrap();
    wait_for_drain(&running).await;

    let pipeline = running.pipeline();
    assert!(!pipeline.placeholders().contains("foo.txt").await.unwrap());
    assert!(pipeline.modified_paths().contains("foo.txt", false));
    assert!(!pipeline.modified_paths().contains(".git/foo.txt", false));

    running.wait(async {}).await;
}

#[tokio::test]
async fn test_lock_round_trip_and_status() {
    let temp_dir = TempDir::new().unwrap();
    let running = start_mount(temp_dir.path()).await;
    let mut client = MountClient::connect(running.socket_path()).await.unwrap();

    let me = LockData::new(std::process::id(), "git status");
    let response = client.acquire_lock(&me).await.unwrap();
    assert_eq!(response.result, AcquireLockResult::Acquired);

    let status = client.get_status().await.unwrap();
    assert!(status.lock_status.contains("git status"));

    let other = LockData::new(u32::MAX, "git checkout");
    let response = client.acquire_lock(&other).await.unwrap();
    assert_eq!(response.result, AcquireLockResult::DenyGit);
    assert_eq!(response.holder, Some(me.clone()));

    assert_eq!(
        client.release_lock(&me).await.unwrap(),
        ReleaseLockResult::Released
    );
    assert_eq!(client.get_status().await.unwrap().lock_status, "Free");

    running.wait(async {}).await;
}

#[tokio::test]
async fn test_object_download_and_post_fetch() {
    let temp_dir = TempDir::new().unwrap();
    let running = start_mount(temp_dir.path()).await;
    let mut client = MountClient::connect(running.socket_path()).await.unwrap();

    assert_eq!(
        client.download_object(KNOWN_SHA).await.unwrap(),
        DownloadObjectResult::Success
    );
    assert_eq!(
        client
            .download_object("ffffffffffffffffffffffffffffffffffffffff")
            .await
            .unwrap(),
        DownloadObjectResult::DownloadFailed
    );
    assert_eq!(
        client.download_object("not-a-sha").await.unwrap(),
        DownloadObjectResult::InvalidSha
    );

    let packs = vec!["pack-1234.idx".to_string()];
    assert_eq!(
        client.post_fetch(&packs).await.unwrap(),
        PostFetchResult::Queued
    );

    running.wait(async {}).await;
}

#[tokio::test]
async fn test_logged_tasks_replay_after_restart() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());

    // a previous run crashed after logging these, before applying them
    {
        let db = Database::open(&config.layout.database_path, config.pool.clone())
            .await
            .unwrap();
        db.append_background_task(&BackgroundTask::FileCreated {
            path: "README.md".to_string(),
        })
        .await
        .unwrap();
        db.append_background_task(&BackgroundTask::FolderDeleted {
            path: "old".to_string(),
        })
        .await
        .unwrap();
        db.shutdown().await;
    }

    let running = Mount::start(&config, collaborators()).await.unwrap();
    wait_for_drain(&running).await;

    let modified = running.pipeline().modified_paths();
    assert!(modified.contains("README.md", false));
    assert!(modified.contains("old", true));

    running.wait(async {}).await;

    let db = Database::open(&config.layout.database_path, config.pool.clone())
        .await
        .unwrap();
    assert_eq!(db.background_task_count().await.unwrap(), 0);
    db.shutdown().await;
}

#[tokio::test]
async fn test_placeholders_survive_remount() {
    let temp_dir = TempDir::new().unwrap();
    let sha: ContentId = KNOWN_SHA.parse().unwrap();

    let running = start_mount(temp_dir.path()).await;
    let callbacks = running.callbacks().clone();
    callbacks
        .on_placeholder_created(
            vgit_daemon::PlaceholderRecord::file("src/lib.rs", sha.clone()),
            "cargo",
        )
        .await
        .unwrap();
    wait_for_drain(&running).await;
    running.wait(async {}).await;

    let running = start_mount(temp_dir.path()).await;
    let entries = running.pipeline().placeholders().get_all_entries().await.unwrap();
    assert_eq!(entries.files.len(), 1);
    assert_eq!(entries.files[0].path, "src/lib.rs");
    assert_eq!(entries.files[0].kind.content_id(), Some(&sha));
    running.wait(async {}).await;
}
