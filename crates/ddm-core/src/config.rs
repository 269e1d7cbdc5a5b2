use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Global configuration loaded from `~/.config/ddm/config.toml`.
///
/// Fields mirror the tunables §4.5 (Policy), §4.6 (SpaceManager), and §4.7
/// (Scheduler) name as engine-wide parameters rather than per-request ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdmConfig {
    /// Scheduler concurrency cap (§4.7, §5): at most this many Workers run
    /// at once; the rest wait their turn in `(last_modified, id)` order.
    pub max_concurrent: usize,
    /// Policy's metered-network size ceiling (§4.5): requests larger than
    /// this never run over a metered connection regardless of
    /// `bypass_recommended_size_limit`.
    pub max_over_mobile_bytes: i64,
    /// Policy's recommended metered-network size ceiling (§4.5): requests
    /// larger than this wait for Wifi unless the caller set
    /// `bypass_recommended_size_limit`.
    pub recommended_over_mobile_bytes: i64,
    /// SpaceManager's headroom beyond what a download needs (§4.6).
    pub reserved_space_bytes: u64,
    /// Idle Reaper's minimum age before a stale terminal row is pruned (§9).
    pub min_delete_age_secs: u64,
    /// Per-attempt wall-clock budget before a Worker is treated as stuck
    /// and its attempt is abandoned (§5).
    pub worker_attempt_timeout_secs: u64,
}

impl Default for DdmConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_over_mobile_bytes: 100 * 1024 * 1024,
            recommended_over_mobile_bytes: 10 * 1024 * 1024,
            reserved_space_bytes: crate::space_manager::RESERVE_BYTES,
            min_delete_age_secs: 48 * 60 * 60,
            worker_attempt_timeout_secs: 600,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("ddm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<DdmConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = DdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: DdmConfig = toml::from_str(&data)?;
    Ok(cfg)
}
