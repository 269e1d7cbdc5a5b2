//! Single-attempt HTTP transfer (§4.3): resume, redirect, retry, and
//! cancellation for exactly one request.
//!
//! A sequential, non-Range GET with a write loop, since a single request is
//! never split into segments here. `storage::writer::StorageWriter`'s
//! `write_at`/`sync`/`finalize` lifecycle is reused directly, with
//! sequential offsets instead of segment offsets.
//!
//! Deviation from a literal reading of §4.3: `HttpClient::execute` (like
//! `curl::easy::Easy::perform` underneath it) runs one attempt to
//! completion rather than yielding control back after headers arrive.
//! Steps 6-7 (capture headers, choose name) still run as soon as headers
//! are known — via `HttpClient::execute`'s `on_headers` callback, fired
//! before the first body byte — so `file_path`/`etag`/`total_bytes` are
//! durable before the body finishes streaming and a crash mid-transfer
//! stays resumable. Step 8's reconnectivity re-check, though, only runs
//! once the body has fully streamed (there is no mid-body yield point to
//! run it from), so a request that should have waited for Wifi once its
//! size became known instead finishes the transfer and is reported
//! `Success` (or `QueuedForWifi` for subsequent resumes) rather than
//! pausing mid-download.

pub mod headers;
pub mod redirect;

use crate::env::Env;
use crate::http_client::{ChunkSink, HeaderSink, HttpClient, HttpError, HttpRequest, HttpResponse};
use crate::name_allocator::{NameAllocator, NameHints};
use crate::policy::{self, PolicyDecision, RequiredNetwork, MAX_RETRIES, MAX_RETRY_AFTER_SECS, MIN_RETRY_AFTER_SECS};
use crate::request::{Control, DestinationClass, Request, RequestId, Status};
use crate::space_manager::{SpaceError, SpaceManager};
use crate::storage::{temp_path, StorageWriter, StorageWriterBuilder};
use crate::store::{Patch, Store};

use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const PROGRESS_MIN_BYTES: i64 = 4096;
const PROGRESS_MIN_INTERVAL: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Paused,
    Deleted,
    Shutdown,
    /// The Scheduler re-evaluated Policy for an already-running request and
    /// it no longer runs under the current network snapshot (§4.7 step 2:
    /// "policy returns `WaitNetwork`... → signal the Worker to stop").
    /// Handled identically to `Shutdown`: an immediate re-arm that leaves
    /// `num_failed` untouched, since nothing about the request failed.
    Preempted,
}

/// Per-request cancellation token (§5), polled at the three checkpoints
/// named in §4.3: before issuing the request, at each response-header
/// parse, and after each streamed chunk.
#[derive(Clone)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<StopReason>>>,
}

impl StopToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    pub fn signal(&self, reason: StopReason) {
        *self.reason.lock().unwrap() = Some(reason);
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<StopReason> {
        *self.reason.lock().unwrap()
    }

    /// The plain `Arc<AtomicBool>` `HttpClient::execute` expects.
    pub fn http_flag(&self) -> Arc<AtomicBool> {
        self.flag.clone()
    }
}

impl Default for StopToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress published out-of-band to the Notifier (§4.3 step 9, §4.8).
#[derive(Debug, Clone, Copy)]
pub struct SpeedSample {
    pub request_id: RequestId,
    pub bytes_per_sec: f64,
}

/// Resolves the directory a request's file is allocated under, for
/// destination classes the engine names a file for. `FileUri` requests
/// pre-declare `file_path` and never reach `NameAllocator`. The filesystem
/// layout itself is an external collaborator (§1); this trait is the seam.
pub trait DestinationResolver: Send + Sync {
    fn dir_for(&self, destination_class: DestinationClass) -> PathBuf;
}

/// Everything a Worker needs besides the Request itself.
pub struct WorkerDeps<E: Env, H: HttpClient> {
    pub env: Arc<E>,
    pub http: Arc<H>,
    pub store: Arc<Store>,
    pub name_allocator: Arc<NameAllocator>,
    pub space_manager: Arc<SpaceManager>,
    pub speed_tx: Option<tokio::sync::mpsc::UnboundedSender<SpeedSample>>,
}

enum AttemptOutcome {
    Redirected,
    Done,
}

/// What `on_headers` discovered and already persisted to the Store, read
/// back once `execute()` returns so the rest of `run_attempt` can reuse it
/// instead of redoing the naming/patch work (§4.3 steps 6-7).
#[derive(Debug, Clone, Default)]
struct HeaderOutcome {
    persisted: bool,
    final_path: Option<PathBuf>,
    etag: Option<String>,
    mime_type: Option<String>,
    total_bytes: i64,
}

/// Executes one request end-to-end, restarting internally on redirect
/// (`RetryDownload` in the spec's terms), until a terminal or waiting
/// status is written to the Store.
pub async fn run<E: Env, H: HttpClient>(
    id: RequestId,
    deps: &WorkerDeps<E, H>,
    dest: &dyn DestinationResolver,
    stop: StopToken,
) -> anyhow::Result<()> {
    let Some(mut req) = deps.store.get(id).await? else {
        return Ok(());
    };

    loop {
        match run_attempt(&mut req, deps, dest, &stop).await? {
            AttemptOutcome::Redirected => continue,
            AttemptOutcome::Done => return Ok(()),
        }
    }
}

/// Checkpoint: re-reads the row and reacts to `deleted`/`control=Paused`/a
/// scheduler-requested shutdown. Returns `Some(Done)` if the attempt must
/// stop here.
async fn checkpoint<E: Env, H: HttpClient>(
    req: &mut Request,
    deps: &WorkerDeps<E, H>,
    stop: &StopToken,
) -> anyhow::Result<Option<AttemptOutcome>> {
    if stop.is_stopped()
        && matches!(stop.reason(), Some(StopReason::Shutdown) | Some(StopReason::Preempted))
    {
        deps.store
            .update(req.id, &Patch::new().status(Status::WaitingToRetry).retry_after_ms(-1))
            .await?;
        return Ok(Some(AttemptOutcome::Done));
    }

    let Some(fresh) = deps.store.get(req.id).await? else {
        return Ok(Some(AttemptOutcome::Done));
    };
    if fresh.deleted {
        stop.signal(StopReason::Deleted);
        deps.store.update(req.id, &Patch::new().status(Status::Canceled)).await?;
        return Ok(Some(AttemptOutcome::Done));
    }
    if fresh.control == Control::Paused {
        stop.signal(StopReason::Paused);
        deps.store.update(req.id, &Patch::new().status(Status::PausedByApp)).await?;
        return Ok(Some(AttemptOutcome::Done));
    }
    req.control = fresh.control;
    req.deleted = fresh.deleted;
    Ok(None)
}

async fn run_attempt<E: Env, H: HttpClient>(
    req: &mut Request,
    deps: &WorkerDeps<E, H>,
    dest: &dyn DestinationResolver,
    stop: &StopToken,
) -> anyhow::Result<AttemptOutcome> {
    if let Some(outcome) = checkpoint(req, deps, stop).await? {
        return Ok(outcome);
    }

    // §4.3 step 1: partial-file setup. A request that has not yet had a
    // successful response has no allocated name; it streams into a
    // provisional, id-scoped temp path that is renamed once NameAllocator
    // picks the real name (step 7).
    let dest_dir = dest.dir_for(req.destination_class);
    std::fs::create_dir_all(&dest_dir).ok();
    let final_known = req.file_path.clone();
    let mut working_temp = match &final_known {
        Some(p) => temp_path(Path::new(p)),
        None => dest_dir.join(format!(".ddm-{}.part", req.id)),
    };

    let mut resume_from: Option<u64> = None;
    if final_known.is_some() {
        if let Ok(meta) = std::fs::metadata(&working_temp) {
            let len = meta.len();
            if len == 0 {
                let _ = std::fs::remove_file(&working_temp);
            } else if !req.is_resumable() {
                let _ = std::fs::remove_file(&working_temp);
                terminal(deps, req, Status::CannotResume, None).await?;
                return Ok(AttemptOutcome::Done);
            } else {
                resume_from = Some(len);
                req.current_bytes = len as i64;
            }
        }
    } else {
        let _ = std::fs::remove_file(&working_temp);
    }

    // §4.3 step 2: headers.
    let header_list = headers::build_request_headers(req, resume_from);

    // §4.3 step 3: connectivity precheck.
    let mut rng = rand::thread_rng();
    {
        let snapshot = deps.env.snapshot().await;
        match policy::decide(req, &snapshot, deps.env.now_monotonic_ms(), &mut rng, |_| true) {
            PolicyDecision::RunNow(_) => {}
            PolicyDecision::WaitNetwork(RequiredNetwork::Unmetered) => {
                waiting(deps, req, Status::QueuedForWifi).await?;
                return Ok(AttemptOutcome::Done);
            }
            _ => {
                waiting(deps, req, Status::WaitingForNetwork).await?;
                return Ok(AttemptOutcome::Done);
            }
        }
    }

    // §4.3 step 4: send, streaming chunks into `working_temp` as they arrive.
    let http_req = HttpRequest {
        url: req.source_uri.clone(),
        headers: header_list,
    };
    let written = Arc::new(AtomicI64::new(resume_from.unwrap_or(0) as i64));
    let writer_slot: Arc<Mutex<Option<StorageWriter>>> = Arc::new(Mutex::new(None));
    let last_progress = Arc::new(Mutex::new((written.load(Ordering::Relaxed), Instant::now())));
    let request_id = req.id;
    let store_for_chunk = deps.store.clone();
    let speed_tx = deps.speed_tx.clone();
    let resume_offset = resume_from.unwrap_or(0);
    let stop_for_chunk = stop.clone();

    // Shared with `on_headers`: a happy-path response may rename
    // `working_temp` (once the real name is known) before the first chunk
    // arrives, so `on_chunk` has to look the current path up rather than
    // close over a fixed one.
    let working_temp_shared = Arc::new(Mutex::new(working_temp.clone()));
    let header_outcome = Arc::new(Mutex::new(HeaderOutcome::default()));

    // Clones kept in the outer scope so the post-transfer code below can
    // read the byte count and reclaim the writer once `on_chunk` has moved
    // its own handles into the closure.
    let written_outer = written.clone();
    let writer_slot_outer = writer_slot.clone();
    let working_temp_shared_outer = working_temp_shared.clone();
    let header_outcome_outer = header_outcome.clone();

    let on_headers: HeaderSink = {
        let header_outcome = header_outcome.clone();
        let working_temp_shared = working_temp_shared.clone();
        let store = deps.store.clone();
        let name_allocator = deps.name_allocator.clone();
        let dest_dir = dest_dir.clone();
        let final_known = final_known.clone();
        let hint_name = req.hint_name.clone();
        let source_uri = req.source_uri.clone();
        let mime_type_known = req.mime_type.clone();
        let no_integrity = req.no_integrity;
        Box::new(move |status: u16, lines: Vec<String>| {
            let happy = (status == 200 && resume_from.is_none()) || (status == 206 && resume_from.is_some());
            if !happy {
                return;
            }
            let parsed = headers::parse_response_headers(&lines);
            if !parsed.chunked && parsed.content_length.is_none() && !no_integrity {
                return;
            }
            let mime_type = mime_type_known.clone().or(parsed.content_type.clone());
            let total_bytes = if parsed.chunked {
                Request::UNKNOWN_SIZE
            } else {
                parsed.content_length.map(|n| n as i64).unwrap_or(Request::UNKNOWN_SIZE)
            };
            let final_path = match &final_known {
                Some(p) => PathBuf::from(p),
                None => {
                    let hints = NameHints {
                        hint_name: hint_name.as_deref(),
                        content_disposition: parsed.content_disposition.as_deref(),
                        content_location: parsed.content_location.as_deref(),
                        url: &source_uri,
                        mime_type: mime_type.as_deref(),
                    };
                    let allocated = match name_allocator.allocate(&dest_dir, &hints) {
                        Ok(p) => p,
                        Err(_) => return,
                    };
                    let mut cur = working_temp_shared.lock().unwrap();
                    let _ = std::fs::rename(&*cur, temp_path(&allocated));
                    *cur = temp_path(&allocated);
                    allocated
                }
            };
            let etag = parsed.etag.clone();
            *header_outcome.lock().unwrap() = HeaderOutcome {
                persisted: true,
                final_path: Some(final_path.clone()),
                etag: etag.clone(),
                mime_type: mime_type.clone(),
                total_bytes,
            };
            let patch = Patch::new()
                .etag(etag)
                .mime_type(mime_type)
                .total_bytes(total_bytes)
                .file_path(Some(final_path.to_string_lossy().to_string()));
            tokio::spawn(async move {
                let _ = store.update(request_id, &patch).await;
            });
        })
    };

    let on_chunk: ChunkSink = Box::new(move |data: &[u8]| -> bool {
        if stop_for_chunk.is_stopped() {
            return false;
        }
        let mut slot = writer_slot.lock().unwrap();
        if slot.is_none() {
            let temp_for_chunk = working_temp_shared.lock().unwrap().clone();
            let opened = if resume_offset > 0 {
                StorageWriter::open_existing(&temp_for_chunk).ok()
            } else {
                StorageWriterBuilder::create(&temp_for_chunk).ok().map(|b| b.build())
            };
            match opened {
                Some(w) => *slot = Some(w),
                None => return false,
            }
        }
        let writer = slot.as_ref().unwrap();
        let offset = written.fetch_add(data.len() as i64, Ordering::Relaxed);
        if writer.write_at(offset as u64, data).is_err() {
            return false;
        }
        drop(slot);

        let (prev_bytes, prev_at) = *last_progress.lock().unwrap();
        let now_bytes = offset + data.len() as i64;
        if now_bytes - prev_bytes > PROGRESS_MIN_BYTES && prev_at.elapsed() > PROGRESS_MIN_INTERVAL {
            let elapsed = prev_at.elapsed().as_secs_f64().max(0.001);
            *last_progress.lock().unwrap() = (now_bytes, Instant::now());
            if let Some(tx) = &speed_tx {
                let _ = tx.send(SpeedSample {
                    request_id,
                    bytes_per_sec: (now_bytes - prev_bytes) as f64 / elapsed,
                });
            }
            let store = store_for_chunk.clone();
            tokio::spawn(async move {
                let _ = store.update(request_id, &Patch::new().current_bytes(now_bytes)).await;
            });
        }
        true
    });

    let response = deps.http.execute(http_req, stop.http_flag(), on_headers, on_chunk).await;

    // `on_headers` may have renamed `working_temp` (and persisted
    // `file_path`/`etag`/`total_bytes`) before the transfer finished or
    // aborted; every branch below needs the current path and outcome.
    working_temp = working_temp_shared_outer.lock().unwrap().clone();
    let header_outcome = header_outcome_outer.lock().unwrap().clone();

    let response = match response {
        Ok(r) => r,
        Err(HttpError::Aborted) => {
            return handle_abort(deps, req, stop, &dest_dir).await;
        }
        Err(_network_err) => {
            let snapshot = deps.env.snapshot().await;
            if !snapshot.connected {
                waiting(deps, req, Status::WaitingForNetwork).await?;
            } else if req.num_failed < MAX_RETRIES.saturating_sub(1) {
                retry_transient(deps, req, None).await?;
            } else {
                terminal(deps, req, Status::HttpDataError, Some(&working_temp)).await?;
            }
            return Ok(AttemptOutcome::Done);
        }
    };

    // Checkpoint 2: at response-header parse.
    if let Some(outcome) = checkpoint(req, deps, stop).await? {
        return Ok(outcome);
    }

    if redirect::is_redirect_status(response.status) {
        let _ = std::fs::remove_file(&working_temp);
        return handle_redirect(req, deps, &response).await;
    }

    if response.status == 200 && resume_from.is_some() {
        terminal(deps, req, Status::CannotResume, Some(&working_temp)).await?;
        return Ok(AttemptOutcome::Done);
    }
    if response.status == 206 && resume_from.is_none() {
        terminal(deps, req, Status::UnhandledHttpCode, Some(&working_temp)).await?;
        return Ok(AttemptOutcome::Done);
    }
    if response.status == 503 && req.num_failed < MAX_RETRIES {
        let parsed = headers::parse_response_headers(&response.header_lines);
        let secs = parsed
            .retry_after_secs
            .unwrap_or(0)
            .clamp(MIN_RETRY_AFTER_SECS, MAX_RETRY_AFTER_SECS);
        let jitter = rand::thread_rng().gen_range(0..=MIN_RETRY_AFTER_SECS);
        retry_transient(deps, req, Some(((secs + jitter) * 1000) as i64)).await?;
        return Ok(AttemptOutcome::Done);
    }
    if response.status >= 500 && req.num_failed < MAX_RETRIES.saturating_sub(1) {
        retry_transient(deps, req, None).await?;
        return Ok(AttemptOutcome::Done);
    }
    if !(200..300).contains(&response.status) {
        terminal(deps, req, Status::HttpStatus(response.status), Some(&working_temp)).await?;
        return Ok(AttemptOutcome::Done);
    }

    // §4.3 steps 6-7: capture response headers and choose the file path. If
    // `on_headers` already saw a happy-path status and persisted these
    // (`header_outcome.persisted`), reuse its result instead of redoing the
    // naming/rename work; otherwise this is the byte-identical fallback for
    // a response `on_headers` declined to act on (redirect, error status, or
    // a missing/uncertain content length that still needs the integrity
    // check below).
    let final_path: PathBuf = if header_outcome.persisted {
        req.etag = header_outcome.etag.clone();
        req.mime_type = header_outcome.mime_type.clone();
        req.total_bytes = header_outcome.total_bytes;
        req.file_path = header_outcome
            .final_path
            .as_ref()
            .map(|p| p.to_string_lossy().to_string());
        header_outcome.final_path.clone().unwrap_or_else(|| working_temp.clone())
    } else {
        let parsed = headers::parse_response_headers(&response.header_lines);
        if let Some(etag) = &parsed.etag {
            req.etag = Some(etag.clone());
        }
        if req.mime_type.is_none() {
            req.mime_type = parsed.content_type.clone();
        }
        if !parsed.chunked && parsed.content_length.is_none() && !req.no_integrity {
            terminal(deps, req, Status::HttpDataError, Some(&working_temp)).await?;
            return Ok(AttemptOutcome::Done);
        }
        req.total_bytes = if parsed.chunked {
            Request::UNKNOWN_SIZE
        } else {
            parsed.content_length.map(|n| n as i64).unwrap_or(Request::UNKNOWN_SIZE)
        };

        let final_path = match final_known {
            Some(p) => PathBuf::from(p),
            None => {
                let hints = NameHints {
                    hint_name: req.hint_name.as_deref(),
                    content_disposition: parsed.content_disposition.as_deref(),
                    content_location: parsed.content_location.as_deref(),
                    url: &req.source_uri,
                    mime_type: req.mime_type.as_deref(),
                };
                let allocated = deps.name_allocator.allocate(&dest_dir, &hints)?;
                let _ = std::fs::rename(&working_temp, temp_path(&allocated));
                working_temp = temp_path(&allocated);
                allocated
            }
        };
        req.file_path = Some(final_path.to_string_lossy().to_string());
        final_path
    };

    let mut patch = Patch::new()
        .etag(req.etag.clone())
        .mime_type(req.mime_type.clone())
        .total_bytes(req.total_bytes)
        .file_path(req.file_path.clone());
    // §4.3 step 8: reconnectivity check now that `total_bytes` is known.
    let snapshot = deps.env.snapshot().await;
    if let PolicyDecision::WaitNetwork(RequiredNetwork::Unmetered) =
        policy::decide(req, &snapshot, deps.env.now_monotonic_ms(), &mut rng, |_| true)
    {
        patch = patch.status(Status::QueuedForWifi);
        deps.store.update(req.id, &patch).await?;
        return Ok(AttemptOutcome::Done);
    }
    deps.store.update(req.id, &patch).await?;

    // §4.3 steps 9-10: the stream already ran inline via `on_chunk`;
    // reconcile the final byte count here. A body with no bytes at all
    // (Content-Length: 0) never invokes `on_chunk`, so no writer and no
    // file on disk exist yet; create an empty one so the finalize rename
    // below has a source.
    if let Some(writer) = writer_slot_outer.lock().unwrap().take() {
        let _ = writer.sync();
    } else if !working_temp.exists() {
        let _ = std::fs::File::create(&working_temp);
    }
    req.current_bytes = written_outer.load(Ordering::Relaxed);

    if req.total_bytes != Request::UNKNOWN_SIZE && req.current_bytes != req.total_bytes {
        if req.is_resumable() {
            retry_transient(deps, req, None).await?;
        } else {
            terminal(deps, req, Status::CannotResume, Some(&working_temp)).await?;
        }
        return Ok(AttemptOutcome::Done);
    }
    if req.total_bytes == Request::UNKNOWN_SIZE {
        req.total_bytes = req.current_bytes;
    }

    // §4.3 step 11: finalize.
    finalize_success(deps, req, &working_temp, &final_path).await?;
    Ok(AttemptOutcome::Done)
}

async fn handle_redirect<E: Env, H: HttpClient>(
    req: &mut Request,
    deps: &WorkerDeps<E, H>,
    response: &HttpResponse,
) -> anyhow::Result<AttemptOutcome> {
    let parsed = headers::parse_response_headers(&response.header_lines);
    let Some(location) = parsed.location else {
        terminal(deps, req, Status::UnhandledHttpCode, None).await?;
        return Ok(AttemptOutcome::Done);
    };
    if req.redirect_count >= 5 {
        terminal(deps, req, Status::TooManyRedirects, None).await?;
        return Ok(AttemptOutcome::Done);
    }
    let Some(resolved) = redirect::resolve_location(&req.source_uri, &location) else {
        terminal(deps, req, Status::UnhandledHttpCode, None).await?;
        return Ok(AttemptOutcome::Done);
    };

    req.redirect_count += 1;
    req.source_uri = resolved.clone();
    let mut patch = Patch::new().redirect_count(req.redirect_count);
    if redirect::should_persist_redirect(response.status) {
        patch = patch.source_uri(resolved);
    }
    deps.store.update(req.id, &patch).await?;
    Ok(AttemptOutcome::Redirected)
}

async fn retry_transient<E: Env, H: HttpClient>(
    deps: &WorkerDeps<E, H>,
    req: &mut Request,
    retry_after_ms: Option<i64>,
) -> anyhow::Result<()> {
    req.num_failed += 1;
    let mut patch = Patch::new()
        .status(Status::WaitingToRetry)
        .num_failed(req.num_failed)
        .current_bytes(req.current_bytes);
    if let Some(ms) = retry_after_ms {
        patch = patch.retry_after_ms(ms);
    }
    deps.store.update(req.id, &patch).await?;
    Ok(())
}

async fn waiting<E: Env, H: HttpClient>(
    deps: &WorkerDeps<E, H>,
    req: &Request,
    status: Status,
) -> anyhow::Result<()> {
    deps.store.update(req.id, &Patch::new().status(status)).await?;
    Ok(())
}

/// Any terminal `Error*` status (§4.3 step 11) deletes the partial file.
/// `Success` never routes through here; `DeviceNotFound` is non-terminal
/// and is handled by `waiting` instead, preserving the file for retry
/// (§9 open question (b)).
async fn terminal<E: Env, H: HttpClient>(
    deps: &WorkerDeps<E, H>,
    req: &Request,
    status: Status,
    temp: Option<&Path>,
) -> anyhow::Result<()> {
    if let Some(p) = temp {
        let _ = std::fs::remove_file(p);
    }
    deps.store.update(req.id, &Patch::new().status(status)).await?;
    Ok(())
}

async fn finalize_success<E: Env, H: HttpClient>(
    deps: &WorkerDeps<E, H>,
    req: &mut Request,
    temp: &Path,
    final_path: &Path,
) -> anyhow::Result<()> {
    if let Some(parent) = final_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = std::fs::metadata(temp) {
            let mut perms = meta.permissions();
            perms.set_mode(0o644);
            let _ = std::fs::set_permissions(temp, perms);
        }
    }
    std::fs::rename(temp, final_path)?;
    deps.store
        .update(
            req.id,
            &Patch::new()
                .status(Status::Success)
                .current_bytes(req.current_bytes)
                .total_bytes(req.total_bytes)
                .num_failed(0),
        )
        .await?;
    Ok(())
}

/// Classifies a transfer abort that was not a deliberate stop signal as a
/// write failure (§4.3 step 9's error table), with one best-effort
/// `SpaceManager` reclaim pass before giving up.
async fn handle_abort<E: Env, H: HttpClient>(
    deps: &WorkerDeps<E, H>,
    req: &mut Request,
    stop: &StopToken,
    dest_dir: &Path,
) -> anyhow::Result<AttemptOutcome> {
    match stop.reason() {
        Some(StopReason::Paused) => {
            deps.store.update(req.id, &Patch::new().status(Status::PausedByApp)).await?;
        }
        Some(StopReason::Deleted) => {
            deps.store.update(req.id, &Patch::new().status(Status::Canceled)).await?;
        }
        Some(StopReason::Shutdown) | Some(StopReason::Preempted) => {
            // -1 (not 0) tells Policy this is an immediate re-arm, not "no
            // server-directed value" — at num_failed == 0 the latter would
            // fall through to a spurious 30s exponential-backoff floor.
            deps.store
                .update(req.id, &Patch::new().status(Status::WaitingToRetry).retry_after_ms(-1))
                .await?;
        }
        None => {
            let status = classify_write_failure(deps, req, dest_dir).await;
            if status == Status::FileError && req.num_failed < MAX_RETRIES.saturating_sub(1) {
                retry_transient(deps, req, None).await?;
            } else {
                terminal(deps, req, status, None).await?;
            }
        }
    }
    Ok(AttemptOutcome::Done)
}

async fn classify_write_failure<E: Env, H: HttpClient>(
    deps: &WorkerDeps<E, H>,
    req: &Request,
    dest_dir: &Path,
) -> Status {
    if std::fs::metadata(dest_dir).is_err() {
        return Status::DeviceNotFound;
    }
    let others = deps.store.list_active().await.unwrap_or_default();
    let delete_fn = |r: &Request| -> std::io::Result<()> {
        match &r.file_path {
            Some(p) => std::fs::remove_file(p),
            None => Ok(()),
        }
    };
    let candidates: Vec<(Request, _)> = others
        .into_iter()
        .filter(|r| r.id != req.id && matches!(r.destination_class, DestinationClass::Cache))
        .map(|r| (r, delete_fn))
        .collect();
    let need = if req.total_bytes > 0 {
        req.total_bytes as u64
    } else {
        16 * 1024 * 1024
    };
    match deps.space_manager.ensure_available(dest_dir, need, candidates) {
        Ok(()) => Status::FileError,
        Err(SpaceError::Insufficient { .. }) => Status::InsufficientSpace,
        Err(SpaceError::Statvfs(_)) => Status::DeviceNotFound,
    }
}
