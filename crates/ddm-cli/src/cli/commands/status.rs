//! `ddm status` – show every live (non-deleted) request.

use anyhow::Result;

use crate::cli::engine_builder;

pub async fn run_status() -> Result<()> {
    let store = engine_builder::open_store().await?;
    let requests = store.list_active().await?;
    if requests.is_empty() {
        println!("No requests in database.");
        return Ok(());
    }
    println!(
        "{:<6} {:<18} {:<10} {:<12} {}",
        "ID", "STATUS", "OWNER", "BYTES", "URL"
    );
    for r in requests {
        let bytes_str = if r.total_bytes < 0 {
            format!("{}/?", r.current_bytes)
        } else {
            format!("{}/{}", r.current_bytes, r.total_bytes)
        };
        println!(
            "{:<6} {:<18} {:<10} {:<12} {}",
            r.id,
            r.status.as_str(),
            r.owner,
            bytes_str,
            r.source_uri
        );
    }
    Ok(())
}
