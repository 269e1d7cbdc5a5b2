//! The top-level aggregate (§9 "Engine"): Store + Scheduler + Policy config
//! + Notifier + Idle Reaper handles, constructed once per process and the
//! sole legitimate owner of the process-wide `NameAllocator` lock.
//!
//! Exposes the library-level API named in §6: `submit`, `cancel`, `pause`,
//! `resume`, `query`, `open`, as one constructed object the CLI (or any
//! other host) drives, rather than wiring the Store and Scheduler directly
//! into each call site.

use crate::config::DdmConfig;
use crate::env::Env;
use crate::http_client::HttpClient;
use crate::name_allocator::NameAllocator;
use crate::request::{Control, DestinationClass, Request, RequestId, Status};
use crate::scheduler::{Scheduler, SchedulerHandle};
use crate::space_manager::SpaceManager;
use crate::store::{NewRequest, Patch, Store};
use crate::worker::{DestinationResolver, WorkerDeps};

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Maps destination classes onto XDG-standard directories. The only
/// `DestinationResolver` this crate ships; a host targeting a different
/// filesystem layout (e.g. Android's scoped storage) supplies its own.
pub struct XdgDestinationResolver {
    cache_dir: PathBuf,
    data_dir: PathBuf,
}

impl XdgDestinationResolver {
    pub fn new() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("ddm")?;
        Ok(Self {
            cache_dir: xdg_dirs.get_cache_home(),
            data_dir: xdg_dirs.get_data_home().join("downloads"),
        })
    }
}

impl DestinationResolver for XdgDestinationResolver {
    fn dir_for(&self, destination_class: DestinationClass) -> PathBuf {
        match destination_class {
            DestinationClass::Cache
            | DestinationClass::CachePurgeable
            | DestinationClass::CacheNoRoaming
            | DestinationClass::SystemCache => self.cache_dir.clone(),
            DestinationClass::External
            | DestinationClass::ExternalAdded
            | DestinationClass::FileUri => self.data_dir.clone(),
        }
    }
}

/// A query filter for `Engine::query` (§6 `query(filter) -> list`).
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub owner: Option<String>,
    pub status: Option<Status>,
}

fn matches(req: &Request, filter: &QueryFilter) -> bool {
    if let Some(owner) = &filter.owner {
        if &req.owner != owner {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if req.status != status {
            return false;
        }
    }
    true
}

pub struct Engine<E: Env, H: HttpClient> {
    store: Arc<Store>,
    config: DdmConfig,
    scheduler_handle: SchedulerHandle,
    scheduler_task: JoinHandle<()>,
    env: Arc<E>,
    _http: Arc<H>,
    dest: Arc<dyn DestinationResolver>,
}

impl<E: Env + 'static, H: HttpClient + 'static> Engine<E, H> {
    pub fn start(
        store: Arc<Store>,
        env: Arc<E>,
        http: Arc<H>,
        dest: Arc<dyn DestinationResolver>,
        config: DdmConfig,
    ) -> Self {
        let deps = Arc::new(WorkerDeps {
            env: env.clone(),
            http: http.clone(),
            store: store.clone(),
            name_allocator: Arc::new(NameAllocator::new()),
            space_manager: Arc::new(SpaceManager::new()),
            speed_tx: None,
        });
        let scheduler = Scheduler::new(deps, dest.clone(), config.max_concurrent);
        let scheduler_handle = scheduler.handle();
        let scheduler_task = tokio::spawn(scheduler.run());

        Self {
            store,
            config,
            scheduler_handle,
            scheduler_task,
            env,
            _http: http,
            dest,
        }
    }

    pub fn config(&self) -> &DdmConfig {
        &self.config
    }

    /// §6 `submit(Request) -> id`.
    pub async fn submit(&self, req: NewRequest) -> Result<RequestId> {
        let id = self.store.add(&req).await?;
        self.scheduler_handle.nudge();
        Ok(id)
    }

    /// §6 `cancel(id)`: tombstones the row; the owning Worker (if any)
    /// observes `deleted=true` at its next checkpoint and exits to
    /// `Canceled`.
    pub async fn cancel(&self, id: RequestId) -> Result<()> {
        self.store
            .update(id, &Patch::new().deleted(true))
            .await?;
        self.scheduler_handle.nudge();
        Ok(())
    }

    /// §6 `pause(id)`.
    pub async fn pause(&self, id: RequestId) -> Result<()> {
        self.store
            .update(id, &Patch::new().control(Control::Paused))
            .await?;
        self.scheduler_handle.nudge();
        Ok(())
    }

    /// §6 `resume(id)`: clears user pause and, if the row had settled into
    /// `PausedByApp`, returns it to `Pending` so Policy reconsiders it on
    /// the next pass.
    pub async fn resume(&self, id: RequestId) -> Result<()> {
        let mut patch = Patch::new().control(Control::Run);
        if let Some(req) = self.store.get(id).await? {
            if req.status == Status::PausedByApp {
                patch = patch.status(Status::Pending);
            }
        }
        self.store.update(id, &patch).await?;
        self.scheduler_handle.nudge();
        Ok(())
    }

    /// §6 `query(filter) -> list`.
    pub async fn query(&self, filter: &QueryFilter) -> Result<Vec<Request>> {
        let all = self.store.list_active().await?;
        Ok(all.into_iter().filter(|r| matches(r, filter)).collect())
    }

    /// §6 `open(id) -> read_stream`: hands back a file handle onto the
    /// request's current (possibly still-partial) bytes. Returns `None`
    /// if no file has been created yet.
    pub async fn open(&self, id: RequestId) -> Result<Option<tokio::fs::File>> {
        let Some(req) = self.store.get(id).await? else {
            return Ok(None);
        };
        let Some(path) = req.file_path else {
            return Ok(None);
        };
        match tokio::fs::File::open(&path).await {
            Ok(f) => Ok(Some(f)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Runs one Idle Reaper sweep (§9 open question (b)); the host is
    /// responsible for calling this periodically.
    pub async fn reap_idle(&self) -> Result<Vec<RequestId>> {
        crate::idle_reaper::sweep(
            &self.store,
            self.env.now_wall_ms(),
            self.config.min_delete_age_secs,
        )
        .await
    }

    /// Runs one orphan-file sweep across every destination class' directory
    /// (§2's "prune stale rows and orphan files vs. filesystem"), deleting
    /// files on disk that no live row references. Distinct from
    /// `reap_idle`, which only ever removes rows.
    pub async fn reap_orphan_files(&self) -> Result<Vec<PathBuf>> {
        let classes = [
            DestinationClass::Cache,
            DestinationClass::CachePurgeable,
            DestinationClass::CacheNoRoaming,
            DestinationClass::SystemCache,
            DestinationClass::External,
            DestinationClass::FileUri,
            DestinationClass::ExternalAdded,
        ];
        let mut dirs: Vec<PathBuf> = classes.iter().map(|c| self.dest.dir_for(*c)).collect();
        dirs.sort();
        dirs.dedup();
        crate::idle_reaper::sweep_orphan_files(&self.store, &dirs, self.config.min_delete_age_secs).await
    }

    /// Signals the Scheduler to stop and joins it, ensuring every
    /// in-flight Worker has wound down before returning.
    pub async fn shutdown(self) {
        self.scheduler_handle.shutdown();
        let _ = self.scheduler_task.await;
    }
}
