//! `ddm resume <id>` – clear a user pause, mirroring `Engine::resume`.

use anyhow::Result;
use ddm_core::request::{Control, Status};
use ddm_core::store::Patch;

use crate::cli::engine_builder;

pub async fn run_resume(id: i64) -> Result<()> {
    let store = engine_builder::open_store().await?;
    let mut patch = Patch::new().control(Control::Run);
    if let Some(req) = store.get(id).await? {
        if req.status == Status::PausedByApp {
            patch = patch.status(Status::Pending);
        }
    }
    store.update(id, &patch).await?;
    println!("Resumed request {id}");
    Ok(())
}
