//! `ddm pause <id>` – pause a request by user control.

use anyhow::Result;
use ddm_core::request::Control;
use ddm_core::store::Patch;

use crate::cli::engine_builder;

pub async fn run_pause(id: i64) -> Result<()> {
    let store = engine_builder::open_store().await?;
    store.update(id, &Patch::new().control(Control::Paused)).await?;
    println!("Paused request {id}");
    Ok(())
}
