//! Shared construction helpers for CLI commands.
//!
//! Commands that only read or patch the persistent record (`add`, `status`,
//! `pause`, `resume`, `remove`, `import-har`) open the `Store` directly, the
//! same way the teacher's CLI commands touched `ResumeDb` directly without
//! spinning up the scheduler. Only `run` needs the full `Engine` aggregate
//! (§9) — a live `Scheduler` actually executing Workers — so it is the only
//! command that pays for `Engine::start`'s background reconciliation task.

use anyhow::Result;
use ddm_core::config::DdmConfig;
use ddm_core::engine::{Engine, XdgDestinationResolver};
use ddm_core::env::SystemEnv;
use ddm_core::http_client::CurlHttpClient;
use ddm_core::store::Store;
use ddm_core::worker::DestinationResolver;
use std::sync::Arc;

pub async fn open_store() -> Result<Arc<Store>> {
    Ok(Arc::new(Store::open_default().await?))
}

pub async fn build_engine(cfg: &DdmConfig) -> Result<Engine<SystemEnv, CurlHttpClient>> {
    let store = open_store().await?;
    let env = Arc::new(SystemEnv::new(
        cfg.max_over_mobile_bytes,
        cfg.recommended_over_mobile_bytes,
    ));
    let http = Arc::new(CurlHttpClient::default());
    let dest: Arc<dyn DestinationResolver> = Arc::new(XdgDestinationResolver::new()?);
    Ok(Engine::start(store, env, http, dest, cfg.clone()))
}
