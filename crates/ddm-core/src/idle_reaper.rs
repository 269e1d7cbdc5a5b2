//! Prunes stale, invisible terminal rows and orphan files (§2 "prune stale
//! rows and orphan files vs. filesystem"; §3 "Destroyed on explicit delete
//! or by the Idle Reaper when stale+invisible", §9).
//!
//! Runs under an external trigger (a host timer, not a task this crate
//! spawns on its own); cleanup is the caller's responsibility rather than a
//! background loop this module owns itself.

use crate::request::Visibility;
use crate::store::Store;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// True if `file_path`'s parent directory can be stat'd, i.e. the backing
/// mount is present. A row with no `file_path` yet (never started) is
/// always considered present.
fn backing_mount_present(file_path: &Option<String>) -> bool {
    match file_path {
        None => true,
        Some(path) => Path::new(path)
            .parent()
            .map(|parent| std::fs::metadata(parent).is_ok())
            .unwrap_or(true),
    }
}

/// Deletes terminal, `Hidden`-visibility rows whose `last_modified` is at
/// least `min_age_secs` old, skipping any whose backing mount is absent
/// (open question decision (b): never drop the DB's only record of a file
/// that might still exist on an unmounted volume). Returns the ids purged.
pub async fn sweep(store: &Arc<Store>, now_ms: i64, min_age_secs: u64) -> anyhow::Result<Vec<i64>> {
    let min_age_ms = (min_age_secs as i64).saturating_mul(1000);
    let mut purged = Vec::new();

    for req in store.list_active().await? {
        if !req.is_terminal() || req.visibility != Visibility::Hidden {
            continue;
        }
        if now_ms.saturating_sub(req.last_modified) < min_age_ms {
            continue;
        }
        if !backing_mount_present(&req.file_path) {
            continue;
        }
        store.delete(req.id).await?;
        purged.push(req.id);
    }

    Ok(purged)
}

/// Deletes regular files in `dirs` that neither match a live row's
/// `file_path` nor its `.part` temp path, and are at least `min_age_secs`
/// old by mtime. A file referenced by any active row (including one still
/// `Running`, whose `.part` sibling must survive) is never touched.
///
/// This is the filesystem-facing half of idle reaping; `sweep` above only
/// ever deletes rows, never files (those are removed inline by the Worker
/// on terminal failure). Orphans arise from crashes between a file being
/// created and its row being durably updated, or from a row deleted out
/// from under a file NameAllocator had already reserved.
pub async fn sweep_orphan_files(
    store: &Arc<Store>,
    dirs: &[PathBuf],
    min_age_secs: u64,
) -> anyhow::Result<Vec<PathBuf>> {
    let mut known: HashSet<PathBuf> = HashSet::new();
    for req in store.list_active().await? {
        if let Some(p) = &req.file_path {
            let path = PathBuf::from(p);
            known.insert(crate::storage::temp_path(&path));
            known.insert(path);
        }
    }

    let min_age = std::time::Duration::from_secs(min_age_secs);
    let now = std::time::SystemTime::now();
    let mut removed = Vec::new();

    for dir in dirs {
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || known.contains(&path) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            let Ok(age) = now.duration_since(meta.modified().unwrap_or(now)) else {
                continue;
            };
            if age < min_age {
                continue;
            }
            if std::fs::remove_file(&path).is_ok() {
                removed.push(path);
            }
        }
    }

    Ok(removed)
}
