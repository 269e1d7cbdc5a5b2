//! Free-space precondition and reclamation (§4.6).
//!
//! Net-new: the teacher has no equivalent (it always wrote into a
//! preallocated destination chosen ahead of time by its segmenter). Grounded
//! on `storage::builder::StorageWriterBuilder::preallocate`'s `nix::sys::
//! statvfs`/`posix_fallocate` use for the free-space probe.

use crate::request::{DestinationClass, Request};
use nix::sys::statvfs::statvfs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Extra headroom §4.6 keeps beyond the bytes a download actually needs, so
/// unrelated writers on the same filesystem don't immediately fill it back up.
pub const RESERVE_BYTES: u64 = 32 * 1024 * 1024;

/// Minimum age before a `Cache`-class file becomes reclaimable.
pub const MIN_RECLAIM_AGE_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum SpaceError {
    #[error("statvfs failed: {0}")]
    Statvfs(#[from] nix::Error),
    #[error("insufficient space: need {needed} bytes free (incl. {reserve} reserve), have {available}")]
    Insufficient {
        needed: u64,
        reserve: u64,
        available: u64,
    },
}

fn free_bytes(path: &Path) -> Result<u64, SpaceError> {
    let stat = statvfs(path)?;
    Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

/// An external "free cache" capability a host may provide (§4.6's fallback
/// when the reclaim pass over the Store's own `Cache`-class rows isn't
/// enough, e.g. a system-level cache-clearing API). Optional: hosts with no
/// such capability simply never call `with_external_reclaim`.
pub trait ExternalReclaim: Send + Sync {
    /// Best-effort attempt to free at least `bytes_needed` bytes outside this
    /// process's own bookkeeping. Returns the number of bytes actually freed.
    fn reclaim(&self, bytes_needed: u64) -> u64;
}

pub struct SpaceManager {
    external: Option<Box<dyn ExternalReclaim>>,
}

impl Default for SpaceManager {
    fn default() -> Self {
        Self { external: None }
    }
}

impl SpaceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_external_reclaim(external: Box<dyn ExternalReclaim>) -> Self {
        Self { external: Some(external) }
    }

    /// Ensures `bytes_needed` (plus `RESERVE_BYTES`) is available on the
    /// filesystem backing `dest_dir`, reclaiming space from `candidates`
    /// (this process's own `Cache`-class rows, oldest first) and then the
    /// external capability (if any) before giving up.
    ///
    /// `candidates` must already be filtered to `DestinationClass::Cache`
    /// rows not currently in flight; the caller (Scheduler/Worker) owns that
    /// filtering since only it knows which rows are actively being written.
    pub fn ensure_available(
        &self,
        dest_dir: &Path,
        bytes_needed: u64,
        mut candidates: Vec<(Request, impl Fn(&Request) -> std::io::Result<()>)>,
    ) -> Result<(), SpaceError> {
        let needed = bytes_needed + RESERVE_BYTES;

        if free_bytes(dest_dir)? >= needed {
            return Ok(());
        }

        candidates.sort_by_key(|(r, _)| r.last_modified);
        for (request, delete_fn) in &candidates {
            if !matches!(request.destination_class, DestinationClass::Cache) {
                continue;
            }
            if !is_reclaimable(request) {
                continue;
            }
            let _ = delete_fn(request);
            if free_bytes(dest_dir)? >= needed {
                return Ok(());
            }
        }

        if let Some(external) = &self.external {
            external.reclaim(needed);
            if free_bytes(dest_dir)? >= needed {
                return Ok(());
            }
        }

        let available = free_bytes(dest_dir)?;
        Err(SpaceError::Insufficient {
            needed,
            reserve: RESERVE_BYTES,
            available,
        })
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn is_reclaimable(request: &Request) -> bool {
    let age_secs = now_secs().saturating_sub((request.last_modified / 1000) as u64);
    age_secs >= MIN_RECLAIM_AGE_SECS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Status;

    fn cache_request(last_modified_ms: i64) -> Request {
        Request {
            last_modified: last_modified_ms,
            destination_class: DestinationClass::Cache,
            ..Request::new_for_test(Status::Success)
        }
    }

    #[test]
    fn reclaimable_respects_min_age() {
        let fresh = cache_request((now_secs() as i64) * 1000);
        let old = cache_request(((now_secs() - MIN_RECLAIM_AGE_SECS - 60) as i64) * 1000);
        assert!(!is_reclaimable(&fresh));
        assert!(is_reclaimable(&old));
    }
}
