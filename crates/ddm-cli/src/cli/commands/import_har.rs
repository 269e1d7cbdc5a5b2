//! `ddm import-har <path>` – resolve a HAR capture to a direct download.

use anyhow::Result;
use ddm_core::har;
use ddm_core::request::DestinationClass;
use ddm_core::store::NewRequest;
use std::path::Path;

use crate::cli::engine_builder;

fn default_owner() -> String {
    std::env::var("USER").unwrap_or_else(|_| "cli".to_string())
}

pub async fn run_import_har(path: &Path, allow_cookies: bool) -> Result<()> {
    let spec = har::resolve_har(path, allow_cookies)?;
    let store = engine_builder::open_store().await?;
    let id = store
        .add(&NewRequest {
            owner: default_owner(),
            source_uri: spec.url.clone(),
            destination_class: DestinationClass::External,
            headers: spec.headers,
            ..Default::default()
        })
        .await?;
    println!("Added request {id} for URL: {}", spec.url);
    Ok(())
}
