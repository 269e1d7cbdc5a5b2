//! Destination filename allocation (§4.4).
//!
//! Generalizes `url_model::derive_filename` (which only looks at
//! Content-Disposition and the URL path, and sanitizes for Linux) into the
//! full raw-name selection order the spec requires — hint name, then
//! Content-Disposition, then Content-Location, then URL path, then a
//! default — followed by VFAT sanitization instead of the Linux rule, an
//! extension fallback from MIME type, and collision-suffix probing against
//! the destination directory.

mod ext;
mod sanitize;
mod suffix;

use crate::url_model::{filename_from_url_path, parse_content_disposition_filename};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const DEFAULT_FILENAME: &str = "download.bin";

#[derive(Debug, thiserror::Error)]
pub enum NameAllocatorError {
    #[error("destination directory is full: no free name found for {0:?}")]
    Exhausted(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Inputs to a single allocation, mirroring the header/hint data a Worker
/// gathers before naming a file (§4.3 step 4, §4.4).
#[derive(Debug, Clone, Default)]
pub struct NameHints<'a> {
    pub hint_name: Option<&'a str>,
    pub content_disposition: Option<&'a str>,
    pub content_location: Option<&'a str>,
    pub url: &'a str,
    pub mime_type: Option<&'a str>,
}

fn raw_name(hints: &NameHints) -> String {
    hints
        .hint_name
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .or_else(|| hints.content_disposition.and_then(parse_content_disposition_filename))
        .or_else(|| hints.content_location.and_then(filename_from_url_path))
        .or_else(|| filename_from_url_path(hints.url))
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string())
}

/// Process-wide serialization point for name allocation. A single mutex
/// rather than a per-directory lock: §4.4 calls for allocation to be
/// globally serialized so two Workers racing on the same destination
/// directory never observe the same "is this name free" snapshot.
pub struct NameAllocator {
    lock: Mutex<()>,
}

impl Default for NameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl NameAllocator {
    pub fn new() -> Self {
        Self { lock: Mutex::new(()) }
    }

    /// Picks a sanitized, collision-free filename under `dest_dir` for the
    /// given hints, and returns the full path. Holds the allocator's process
    /// mutex for the duration of the probes, and reserves the winning name
    /// by creating it (§4.4: "must be created to reserve the name") via
    /// `create_new`, so the "is this free" check and the reservation are the
    /// same atomic syscall rather than a check-then-create race.
    pub fn allocate(
        &self,
        dest_dir: &Path,
        hints: &NameHints,
    ) -> Result<PathBuf, NameAllocatorError> {
        let raw = raw_name(hints);
        let sanitized = sanitize::sanitize_filename_for_vfat(&raw);
        let sanitized = if sanitized.is_empty() || sanitize::is_reserved_name(&sanitized) {
            DEFAULT_FILENAME.to_string()
        } else {
            sanitized
        };
        let candidate_base = ext::ensure_extension(sanitized, hints.mime_type);

        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let chosen = suffix::allocate_free_name(&candidate_base, |name| {
            std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(dest_dir.join(name))
                .is_err()
        })
        .ok_or_else(|| NameAllocatorError::Exhausted(candidate_base.clone()))?;
        Ok(dest_dir.join(chosen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_hint_name_over_everything_else() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = NameAllocator::new();
        let hints = NameHints {
            hint_name: Some("my-file.bin"),
            content_disposition: Some("attachment; filename=\"other.txt\""),
            url: "https://example.com/ignored.dat",
            ..Default::default()
        };
        let path = allocator.allocate(dir.path(), &hints).unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "my-file.bin");
    }

    #[test]
    fn falls_back_through_content_disposition_then_url_path() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = NameAllocator::new();

        let hints = NameHints {
            content_disposition: Some("attachment; filename=\"report.pdf\""),
            url: "https://example.com/ignored.dat",
            ..Default::default()
        };
        let path = allocator.allocate(dir.path(), &hints).unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "report.pdf");

        let hints = NameHints {
            url: "https://example.com/archive.zip",
            ..Default::default()
        };
        let path = allocator.allocate(dir.path(), &hints).unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "archive.zip");
    }

    #[test]
    fn avoids_collision_with_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.pdf"), b"x").unwrap();
        let allocator = NameAllocator::new();
        let hints = NameHints {
            content_disposition: Some("attachment; filename=\"report.pdf\""),
            url: "https://example.com/x",
            ..Default::default()
        };
        let path = allocator.allocate(dir.path(), &hints).unwrap();
        assert_ne!(path.file_name().unwrap().to_str().unwrap(), "report.pdf");
        // The winning name is reserved by creation, not merely chosen.
        assert!(path.exists());
    }

    #[test]
    fn unusable_hints_fall_back_to_default_name() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = NameAllocator::new();
        let hints = NameHints {
            url: "https://example.com/",
            ..Default::default()
        };
        let path = allocator.allocate(dir.path(), &hints).unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "download.bin");
    }

    #[test]
    fn reserved_device_name_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = NameAllocator::new();
        let hints = NameHints {
            hint_name: Some("CON"),
            url: "https://example.com/x",
            ..Default::default()
        };
        let path = allocator.allocate(dir.path(), &hints).unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "download.bin");
    }
}
