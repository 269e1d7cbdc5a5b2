//! Central reconciliation loop owning Worker lifecycles (§4.7).
//!
//! Hub-and-spoke: Workers never call back into the Scheduler directly, only
//! by writing to the Store (observed through `Store::observe()`) and by the
//! task's own completion. Every reconciliation pass is strictly serialized
//! through one mpsc channel carrying `StoreChanged | WorkerDone | Timer |
//! Shutdown`.

use crate::env::Env;
use crate::http_client::HttpClient;
use crate::policy::{self, PolicyDecision};
use crate::request::{Request, RequestId};
use crate::worker::{self, DestinationResolver, StopReason, StopToken, WorkerDeps};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const CROSS_PROCESS_POLL_MS: u64 = 2_000;

enum Event {
    StoreChanged,
    WorkerDone(RequestId),
    Timer,
    Shutdown,
}

struct Slot {
    stop: StopToken,
    handle: JoinHandle<()>,
}

/// Cheap, cloneable way for the Engine (or anything else) to nudge a
/// reconciliation pass or ask the Scheduler to wind down.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Event>,
}

impl SchedulerHandle {
    pub fn nudge(&self) {
        let _ = self.tx.send(Event::Timer);
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Event::Shutdown);
    }
}

pub struct Scheduler<E: Env, H: HttpClient> {
    deps: Arc<WorkerDeps<E, H>>,
    dest: Arc<dyn DestinationResolver>,
    max_concurrent: usize,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
}

impl<E: Env + 'static, H: HttpClient + 'static> Scheduler<E, H> {
    pub fn new(
        deps: Arc<WorkerDeps<E, H>>,
        dest: Arc<dyn DestinationResolver>,
        max_concurrent: usize,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            deps,
            dest,
            max_concurrent,
            events_tx,
            events_rx,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            tx: self.events_tx.clone(),
        }
    }

    /// Runs until a `SchedulerHandle::shutdown()` call is observed. On
    /// return, every in-flight Worker has been signaled to stop and its
    /// task has been joined.
    pub async fn run(mut self) {
        let mut changes = self.deps.store.observe();
        let forward_tx = self.events_tx.clone();
        let forward = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(_) => {
                        if forward_tx.send(Event::StoreChanged).is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut slots: HashMap<RequestId, Slot> = HashMap::new();
        let mut wake_at: Option<i64> = None;
        self.reconcile(&mut slots, &mut wake_at).await;

        loop {
            let delay_ms = match wake_at {
                Some(deadline) => (deadline - self.deps.env.now_monotonic_ms()).max(0) as u64,
                // `Store::observe()` only fires from an in-process `publish()` call, so a
                // sibling process (e.g. `ddm pause`) mutating the same database is invisible
                // to the event channel. This fallback poll is what notices it.
                None => CROSS_PROCESS_POLL_MS,
            };

            tokio::select! {
                event = self.events_rx.recv() => {
                    match event {
                        None | Some(Event::Shutdown) => break,
                        Some(Event::WorkerDone(id)) => { slots.remove(&id); }
                        Some(Event::StoreChanged) | Some(Event::Timer) => {}
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            }
            self.reconcile(&mut slots, &mut wake_at).await;
        }

        for (_, slot) in slots.drain() {
            slot.stop.signal(StopReason::Shutdown);
            let _ = slot.handle.await;
        }
        forward.abort();
    }

    /// One serialized pass (§4.7): reclaim finished slots, re-evaluate
    /// Policy for every row with a live Worker and signal it to stop if the
    /// fresh decision demands it (step 2), evaluate Policy for every
    /// non-running active row, start up to `max_concurrent - slots.len()`
    /// runnable requests in `(last_modified, id)` order, cancel Workers for
    /// rows no longer in the active set (step 3), and record the earliest
    /// deferred wake-up.
    async fn reconcile(&self, slots: &mut HashMap<RequestId, Slot>, wake_at: &mut Option<i64>) {
        slots.retain(|_, slot| !slot.handle.is_finished());

        let Ok(active) = self.deps.store.list_active().await else {
            return;
        };
        let snapshot = self.deps.env.snapshot().await;
        let now = self.deps.env.now_monotonic_ms();
        let mut rng = rand::thread_rng();

        let mut runnable: Vec<&Request> = Vec::new();
        let mut next_wake: Option<i64> = None;
        let mut seen: HashSet<RequestId> = HashSet::with_capacity(active.len());

        for req in &active {
            seen.insert(req.id);
            let decision = policy::decide(req, &snapshot, now, &mut rng, |_| true);

            if let Some(slot) = slots.get(&req.id) {
                // A Worker is already running this id: only react when the
                // fresh snapshot demands it stop. `RunNow`/`Defer`/`Skip`
                // leave it running untouched.
                match decision {
                    PolicyDecision::Pause => slot.stop.signal(StopReason::Paused),
                    PolicyDecision::WaitNetwork(_) => slot.stop.signal(StopReason::Preempted),
                    PolicyDecision::RunNow(_)
                    | PolicyDecision::Defer(_)
                    | PolicyDecision::DeferIndefinitely
                    | PolicyDecision::Skip => {}
                }
                continue;
            }

            match decision {
                PolicyDecision::RunNow(_) => runnable.push(req),
                PolicyDecision::Defer(d) => {
                    let at = now + d.as_millis() as i64;
                    next_wake = Some(next_wake.map_or(at, |w| w.min(at)));
                }
                PolicyDecision::WaitNetwork(_)
                | PolicyDecision::DeferIndefinitely
                | PolicyDecision::Pause
                | PolicyDecision::Skip => {}
            }
        }

        // §4.7 step 3: a row that dropped out of the active set (deleted, or
        // physically removed) while its Worker was still running.
        for (id, slot) in slots.iter() {
            if !seen.contains(id) {
                slot.stop.signal(StopReason::Deleted);
            }
        }

        runnable.sort_by_key(|r| (r.last_modified, r.id));
        let free = self.max_concurrent.saturating_sub(slots.len());

        for req in runnable.into_iter().take(free) {
            let id = req.id;
            let stop = StopToken::new();
            let deps = self.deps.clone();
            let dest = self.dest.clone();
            let done_tx = self.events_tx.clone();
            let stop_for_task = stop.clone();
            let handle = tokio::spawn(async move {
                let _ = worker::run(id, &deps, dest.as_ref(), stop_for_task).await;
                let _ = done_tx.send(Event::WorkerDone(id));
            });
            slots.insert(id, Slot { stop, handle });
        }

        *wake_at = next_wake;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::FakeEnv;
    use crate::http_client::{ChunkSink, HeaderSink, HttpClient as _, HttpError, HttpRequest, HttpResponse};
    use crate::name_allocator::NameAllocator;
    use crate::request::DestinationClass;
    use crate::space_manager::SpaceManager;
    use crate::store::{NewRequest, Store};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    struct EmptyBodyClient;

    #[async_trait]
    impl HttpClient for EmptyBodyClient {
        async fn execute(
            &self,
            _request: HttpRequest,
            _stop: Arc<AtomicBool>,
            on_headers: HeaderSink,
            _on_chunk: ChunkSink,
        ) -> Result<HttpResponse, HttpError> {
            let header_lines = vec!["Content-Length: 0".to_string()];
            on_headers(200, header_lines.clone());
            Ok(HttpResponse {
                status: 200,
                header_lines,
            })
        }
    }

    struct FixedDir(std::path::PathBuf);
    impl DestinationResolver for FixedDir {
        fn dir_for(&self, _class: DestinationClass) -> std::path::PathBuf {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn reconcile_runs_a_pending_request_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.db");
        let store = Arc::new(Store::open(&db_path).await.unwrap());
        let id = store
            .add(&NewRequest {
                source_uri: "https://example.com/x".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let deps = Arc::new(WorkerDeps {
            env: Arc::new(FakeEnv::new(crate::env::EnvSnapshot::default())),
            http: Arc::new(EmptyBodyClient),
            store: store.clone(),
            name_allocator: Arc::new(NameAllocator::new()),
            space_manager: Arc::new(SpaceManager::new()),
            speed_tx: None,
        });
        let dest: Arc<dyn DestinationResolver> = Arc::new(FixedDir(dir.path().to_path_buf()));
        let scheduler = Scheduler::new(deps, dest, 2);
        let handle = scheduler.handle();

        let join = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(5), join).await;

        let req = store.get(id).await.unwrap().unwrap();
        assert_eq!(req.status, crate::request::Status::Success);
    }
}
