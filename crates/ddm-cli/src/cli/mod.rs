//! CLI for the DDM download manager.

mod commands;
mod engine_builder;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ddm_core::config;
use std::path::Path;

use commands::{
    run_add, run_bench, run_checksum, run_import_har, run_pause, run_remove, run_resume, run_run,
    run_status,
};

/// Top-level CLI for the DDM download manager.
#[derive(Debug, Parser)]
#[command(name = "ddm")]
#[command(about = "DDM: persistent background download manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Submit a new download request.
    Add {
        /// Direct HTTP/HTTPS URL to download.
        url: String,
        /// Owner tag stored with the request (defaults to $USER).
        #[arg(long)]
        owner: Option<String>,
        /// Accept resume without a server ETag (§3 `no_integrity`).
        #[arg(long)]
        no_integrity: bool,
    },

    /// Run the engine: reconcile the store and execute workers for every
    /// runnable request.
    Run {
        /// Keep running after the currently queued requests settle, picking
        /// up anything submitted later, until interrupted.
        #[arg(long)]
        daemon: bool,
    },

    /// Show every live (non-deleted) request.
    Status,

    /// Pause a request by id. The engine will not run it until resumed.
    Pause {
        /// Request identifier.
        id: i64,
    },

    /// Resume a paused request by its id.
    Resume {
        /// Request identifier.
        id: i64,
    },

    /// Cancel a request by id (tombstones it; the Idle Reaper purges it later).
    Remove {
        /// Request identifier.
        id: i64,
    },

    /// Import a HAR file and submit the direct download it resolves to.
    ImportHar {
        /// Path to the HAR file.
        path: String,

        /// Allow persisting cookies extracted from the HAR (if needed).
        #[arg(long)]
        allow_cookies: bool,
    },

    /// Benchmark concurrent Range-request throughput for a URL.
    Bench {
        /// Direct HTTP/HTTPS URL to benchmark.
        url: String,
    },

    /// Compute SHA-256 of a file (e.g. after download).
    Checksum {
        /// Path to the file.
        path: String,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Add {
                url,
                owner,
                no_integrity,
            } => run_add(&url, owner, no_integrity).await?,
            CliCommand::Run { daemon } => run_run(&cfg, daemon).await?,
            CliCommand::Status => run_status().await?,
            CliCommand::Pause { id } => run_pause(id).await?,
            CliCommand::Resume { id } => run_resume(id).await?,
            CliCommand::Remove { id } => run_remove(id).await?,
            CliCommand::ImportHar { path, allow_cookies } => {
                run_import_har(Path::new(&path), allow_cookies).await?;
            }
            CliCommand::Bench { url } => run_bench(&url).await?,
            CliCommand::Checksum { path } => run_checksum(Path::new(&path)).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
