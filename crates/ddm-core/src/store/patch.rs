//! Per-row targeted update payload for `Store::update`.

use crate::request::{Control, MediaScanned, Status};

/// Only the fields present are written; everything else is left unchanged.
/// Mirrors the field list Workers/Scheduler/user actions are allowed to
/// mutate per §3's Lifecycle paragraph.
#[derive(Debug, Clone, Default)]
pub struct Patch {
    pub status: Option<Status>,
    pub control: Option<Control>,
    pub current_bytes: Option<i64>,
    pub total_bytes: Option<i64>,
    pub etag: Option<Option<String>>,
    pub file_path: Option<Option<String>>,
    pub mime_type: Option<Option<String>>,
    pub source_uri: Option<String>,
    pub num_failed: Option<u32>,
    pub retry_after_ms: Option<i64>,
    pub last_modified: Option<i64>,
    pub redirect_count: Option<u32>,
    pub deleted: Option<bool>,
    pub media_scanned: Option<MediaScanned>,
    pub media_store_uri: Option<Option<String>>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, s: Status) -> Self {
        self.status = Some(s);
        self
    }

    pub fn control(mut self, c: Control) -> Self {
        self.control = Some(c);
        self
    }

    pub fn current_bytes(mut self, n: i64) -> Self {
        self.current_bytes = Some(n);
        self
    }

    pub fn total_bytes(mut self, n: i64) -> Self {
        self.total_bytes = Some(n);
        self
    }

    pub fn etag(mut self, v: Option<String>) -> Self {
        self.etag = Some(v);
        self
    }

    pub fn file_path(mut self, v: Option<String>) -> Self {
        self.file_path = Some(v);
        self
    }

    pub fn mime_type(mut self, v: Option<String>) -> Self {
        self.mime_type = Some(v);
        self
    }

    pub fn source_uri(mut self, v: String) -> Self {
        self.source_uri = Some(v);
        self
    }

    pub fn num_failed(mut self, n: u32) -> Self {
        self.num_failed = Some(n);
        self
    }

    pub fn retry_after_ms(mut self, n: i64) -> Self {
        self.retry_after_ms = Some(n);
        self
    }

    pub fn last_modified(mut self, ms: i64) -> Self {
        self.last_modified = Some(ms);
        self
    }

    pub fn redirect_count(mut self, n: u32) -> Self {
        self.redirect_count = Some(n);
        self
    }

    pub fn deleted(mut self, v: bool) -> Self {
        self.deleted = Some(v);
        self
    }
}
