//! `ddm add <url>` – submit a new download request.

use anyhow::Result;
use ddm_core::request::DestinationClass;
use ddm_core::store::NewRequest;

use crate::cli::engine_builder;

fn default_owner() -> String {
    std::env::var("USER").unwrap_or_else(|_| "cli".to_string())
}

pub async fn run_add(url: &str, owner: Option<String>, no_integrity: bool) -> Result<()> {
    let store = engine_builder::open_store().await?;
    let id = store
        .add(&NewRequest {
            owner: owner.unwrap_or_else(default_owner),
            source_uri: url.to_string(),
            destination_class: DestinationClass::External,
            no_integrity,
            ..Default::default()
        })
        .await?;
    println!("Added request {id} for URL: {url}");
    println!("Run `ddm run` to start processing queued requests.");
    Ok(())
}
