//! Integration test: local HTTP server with Range support, full Store →
//! Scheduler → Worker download and resume.
//!
//! Starts a minimal range-capable server, submits a request, drives the
//! Scheduler until it settles, and asserts the downloaded file matches the
//! served body.

mod common;

use ddm_core::env::{EnvSnapshot, FakeEnv};
use ddm_core::http_client::CurlHttpClient;
use ddm_core::name_allocator::NameAllocator;
use ddm_core::request::{DestinationClass, Status};
use ddm_core::scheduler::Scheduler;
use ddm_core::space_manager::SpaceManager;
use ddm_core::store::{NewRequest, Store};
use ddm_core::worker::{DestinationResolver, WorkerDeps};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

struct FixedDir(std::path::PathBuf);

impl DestinationResolver for FixedDir {
    fn dir_for(&self, _class: DestinationClass) -> std::path::PathBuf {
        self.0.clone()
    }
}

async fn run_one(url: String, download_dir: &std::path::Path) -> ddm_core::request::Request {
    let state_dir = tempdir().unwrap();
    let db_path = state_dir.path().join("downloads.db");
    let store = Arc::new(Store::open(&db_path).await.unwrap());

    let id = store
        .add(&NewRequest {
            source_uri: url,
            destination_class: DestinationClass::External,
            no_integrity: true,
            ..Default::default()
        })
        .await
        .unwrap();

    let deps = Arc::new(WorkerDeps {
        env: Arc::new(FakeEnv::new(EnvSnapshot::default())),
        http: Arc::new(CurlHttpClient::default()),
        store: store.clone(),
        name_allocator: Arc::new(NameAllocator::new()),
        space_manager: Arc::new(SpaceManager::new()),
        speed_tx: None,
    });
    let dest: Arc<dyn DestinationResolver> = Arc::new(FixedDir(download_dir.to_path_buf()));
    let scheduler = Scheduler::new(deps, dest, 2);
    let handle = scheduler.handle();
    let join = tokio::spawn(scheduler.run());

    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let req = store.get(id).await.unwrap().unwrap();
        if req.is_terminal() {
            break;
        }
    }
    handle.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(5), join).await;

    store.get(id).await.unwrap().unwrap()
}

#[tokio::test]
async fn range_server_download_completes_and_file_matches() {
    let body: Vec<u8> = (0u8..100).cycle().take(64 * 1024).collect();
    let url = common::range_server::start(body.clone());
    let download_dir = tempdir().unwrap();

    let req = run_one(url, download_dir.path()).await;
    assert_eq!(req.status, Status::Success, "request should complete");
    let final_path = req.file_path.expect("file_path set on success");
    let content = std::fs::read(&final_path).unwrap();
    assert_eq!(content.len(), body.len(), "file size must match");
    assert_eq!(content, body, "file content must match");
}

#[tokio::test]
async fn head_blocked_falls_back_to_range_probe_and_completes() {
    let body: Vec<u8> = (0u8..100).cycle().take(32 * 1024).collect();
    let url = common::range_server::start_with_options(
        body.clone(),
        common::range_server::RangeServerOptions {
            head_allowed: false,
            support_ranges: true,
            advertise_ranges: true,
            ..Default::default()
        },
    );
    let download_dir = tempdir().unwrap();

    let req = run_one(url, download_dir.path()).await;
    assert_eq!(req.status, Status::Success);
    let content = std::fs::read(req.file_path.unwrap()).unwrap();
    assert_eq!(content, body);
}

/// §8 scenario 2: a Worker killed mid-transfer must have already persisted
/// `file_path`/`etag`/`total_bytes`, so a fresh Scheduler picks the row back
/// up with a `Range`/`If-Match` continuation rather than redownloading from
/// zero.
#[tokio::test]
async fn resume_after_kill_sends_range_and_if_match_on_restart() {
    let body: Vec<u8> = (0u8..251).cycle().take(256 * 1024).collect();
    let recorder = Arc::new(std::sync::Mutex::new(Vec::new()));
    let url = common::range_server::start_with_options(
        body.clone(),
        common::range_server::RangeServerOptions {
            etag: Some("\"v1\"".to_string()),
            write_delay: Some(Duration::from_millis(5)),
            recorder: Some(recorder.clone()),
            ..common::range_server::RangeServerOptions::permissive()
        },
    );
    let download_dir = tempdir().unwrap();
    let state_dir = tempdir().unwrap();
    let db_path = state_dir.path().join("downloads.db");
    let store = Arc::new(Store::open(&db_path).await.unwrap());
    let dest: Arc<dyn DestinationResolver> = Arc::new(FixedDir(download_dir.path().to_path_buf()));

    let id = store
        .add(&NewRequest {
            source_uri: url,
            destination_class: DestinationClass::External,
            ..Default::default()
        })
        .await
        .unwrap();

    // First attempt: run a Scheduler, wait until the Worker has persisted
    // `file_path`/`etag` but is still mid-transfer, then kill it (simulating
    // a process crash) by shutting the Scheduler down.
    {
        let deps = Arc::new(WorkerDeps {
            env: Arc::new(FakeEnv::new(EnvSnapshot::default())),
            http: Arc::new(CurlHttpClient::default()),
            store: store.clone(),
            name_allocator: Arc::new(NameAllocator::new()),
            space_manager: Arc::new(SpaceManager::new()),
            speed_tx: None,
        });
        let scheduler = Scheduler::new(deps, dest.clone(), 2);
        let handle = scheduler.handle();
        let join = tokio::spawn(scheduler.run());

        let mut caught_mid_transfer = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let req = store.get(id).await.unwrap().unwrap();
            if req.file_path.is_some() && req.etag.is_some() && req.current_bytes > 0 && !req.is_terminal() {
                caught_mid_transfer = true;
                break;
            }
        }
        assert!(caught_mid_transfer, "never observed a mid-transfer persisted file_path/etag");

        handle.shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(5), join).await;
    }

    let killed = store.get(id).await.unwrap().unwrap();
    assert_eq!(killed.status, Status::WaitingToRetry, "a killed attempt re-arms for retry");
    assert!(killed.file_path.is_some(), "file_path must survive the kill");
    assert_eq!(killed.etag.as_deref(), Some("\"v1\""), "etag must survive the kill, quoted");
    assert!(
        killed.current_bytes > 0 && killed.current_bytes < body.len() as i64,
        "kill should land strictly mid-transfer, got {} of {}",
        killed.current_bytes,
        body.len()
    );

    // Second attempt: a fresh Scheduler (simulating the restarted process)
    // against the same Store and destination directory.
    {
        let deps = Arc::new(WorkerDeps {
            env: Arc::new(FakeEnv::new(EnvSnapshot::default())),
            http: Arc::new(CurlHttpClient::default()),
            store: store.clone(),
            name_allocator: Arc::new(NameAllocator::new()),
            space_manager: Arc::new(SpaceManager::new()),
            speed_tx: None,
        });
        let scheduler = Scheduler::new(deps, dest.clone(), 2);
        let handle = scheduler.handle();
        let join = tokio::spawn(scheduler.run());

        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let req = store.get(id).await.unwrap().unwrap();
            if req.is_terminal() {
                break;
            }
        }
        handle.shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(5), join).await;
    }

    let finished = store.get(id).await.unwrap().unwrap();
    assert_eq!(finished.status, Status::Success, "resumed download must complete");
    let content = std::fs::read(finished.file_path.unwrap()).unwrap();
    assert_eq!(content, body, "resumed file content must match the full body");

    let requests = recorder.lock().unwrap().clone();
    assert!(requests.len() >= 2, "expected at least an initial and a resuming request, got {requests:?}");
    let resuming = requests
        .iter()
        .find(|r| r.range.is_some())
        .expect("a resuming request must carry a Range header");
    assert!(
        resuming.range.as_deref().unwrap().starts_with("bytes="),
        "unexpected Range header: {:?}",
        resuming.range
    );
    assert_eq!(resuming.if_match.as_deref(), Some("\"v1\""), "resume must send the quoted ETag back as If-Match");
}

#[tokio::test]
async fn no_range_server_falls_back_to_single_stream_get() {
    let body: Vec<u8> = (0u8..100).cycle().take(32 * 1024).collect();
    let url = common::range_server::start_with_options(
        body.clone(),
        common::range_server::RangeServerOptions {
            head_allowed: true,
            support_ranges: false,
            advertise_ranges: false,
            ..Default::default()
        },
    );
    let download_dir = tempdir().unwrap();

    let req = run_one(url, download_dir.path()).await;
    assert_eq!(req.status, Status::Success);
    let content = std::fs::read(req.file_path.unwrap()).unwrap();
    assert_eq!(content, body);
}
