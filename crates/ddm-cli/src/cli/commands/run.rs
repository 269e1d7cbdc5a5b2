//! `ddm run` – drive the Engine until every queued request settles (or,
//! with `--daemon`, until interrupted).

use anyhow::Result;
use ddm_core::config::DdmConfig;
use ddm_core::request::Status;

use crate::cli::engine_builder;

const POLL_INTERVAL_MS: u64 = 500;

fn is_settled(status: Status) -> bool {
    status.is_terminal() || status == Status::PausedByApp
}

pub async fn run_run(cfg: &DdmConfig, daemon: bool) -> Result<()> {
    let engine = engine_builder::build_engine(cfg).await?;

    if daemon {
        println!("Running in daemon mode, press Ctrl-C to stop.");
        tokio::signal::ctrl_c().await?;
        println!("Shutting down.");
    } else {
        loop {
            let active = engine.query(&Default::default()).await?;
            let unsettled = active.iter().filter(|r| !is_settled(r.status)).count();
            if unsettled == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
        println!("All queued requests settled.");
    }

    engine.shutdown().await;
    Ok(())
}
