//! `ddm remove <id>` – tombstone a request; the Idle Reaper purges it later.

use anyhow::Result;
use ddm_core::store::Patch;

use crate::cli::engine_builder;

pub async fn run_remove(id: i64) -> Result<()> {
    let store = engine_builder::open_store().await?;
    store.update(id, &Patch::new().deleted(true)).await?;
    println!("Removed request {id}");
    Ok(())
}
