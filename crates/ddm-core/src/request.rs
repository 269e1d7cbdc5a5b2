//! The persistent Request record and its tagged-variant fields.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type RequestId = i64;

/// One persistent download record (the authoritative row in the Store).
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub owner: String,
    pub uid: i64,

    pub source_uri: String,
    pub hint_name: Option<String>,
    pub referer: Option<String>,
    pub cookies: Option<String>,
    pub user_agent: Option<String>,

    pub destination_class: DestinationClass,
    pub file_path: Option<String>,
    pub mime_type: Option<String>,

    pub total_bytes: i64,
    pub current_bytes: i64,
    pub etag: Option<String>,
    pub no_integrity: bool,

    pub status: Status,
    pub control: Control,
    pub visibility: Visibility,

    pub allowed_network_types: NetworkTypeMask,
    pub allow_roaming: bool,
    pub allow_metered: bool,
    pub bypass_recommended_size_limit: bool,
    pub flags: RequestFlags,

    pub num_failed: u32,
    pub retry_after_ms: i64,
    pub last_modified: i64,

    pub redirect_count: u32,

    pub deleted: bool,
    pub media_scanned: MediaScanned,
    pub media_store_uri: Option<String>,

    pub headers: HashMap<String, String>,
}

impl Request {
    /// -1 means unknown, matching the spec's `total_bytes` sentinel.
    pub const UNKNOWN_SIZE: i64 = -1;

    /// Invariant 2: a partial may be resumed only if an ETag is retained or the
    /// caller accepted no-integrity semantics.
    pub fn is_resumable(&self) -> bool {
        self.etag.is_some() || self.no_integrity
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Minimal fixture for tests that only care about a handful of fields.
    #[cfg(test)]
    pub fn new_for_test(status: Status) -> Self {
        Request {
            id: 0,
            owner: String::new(),
            uid: 0,
            source_uri: String::new(),
            hint_name: None,
            referer: None,
            cookies: None,
            user_agent: None,
            destination_class: DestinationClass::Cache,
            file_path: None,
            mime_type: None,
            total_bytes: Request::UNKNOWN_SIZE,
            current_bytes: 0,
            etag: None,
            no_integrity: false,
            status,
            control: Control::Run,
            visibility: Visibility::Visible,
            allowed_network_types: NetworkTypeMask::default(),
            allow_roaming: false,
            allow_metered: false,
            bypass_recommended_size_limit: false,
            flags: RequestFlags::default(),
            num_failed: 0,
            retry_after_ms: 0,
            last_modified: 0,
            redirect_count: 0,
            deleted: false,
            media_scanned: MediaScanned::NotScanned,
            media_store_uri: None,
            headers: HashMap::new(),
        }
    }
}

/// Per-request state machine (§4.2). Non-exhaustive default branches are
/// intentionally avoided at every match site so new variants force updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Running,
    PausedByApp,
    WaitingToRetry,
    WaitingForNetwork,
    QueuedForWifi,
    DeviceNotFound,
    Success,
    CannotResume,
    HttpDataError,
    TooManyRedirects,
    UnhandledHttpCode,
    FileError,
    InsufficientSpace,
    Canceled,
    /// 4xx/5xx mapped verbatim as a terminal status.
    HttpStatus(u16),
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Status::Pending
                | Status::Running
                | Status::PausedByApp
                | Status::WaitingToRetry
                | Status::WaitingForNetwork
                | Status::QueuedForWifi
                | Status::DeviceNotFound
        )
    }

    /// Stable string form for persistence (mirrors `JobState::as_str`/`from_str`).
    pub fn as_str(&self) -> String {
        match self {
            Status::Pending => "pending".to_string(),
            Status::Running => "running".to_string(),
            Status::PausedByApp => "paused_by_app".to_string(),
            Status::WaitingToRetry => "waiting_to_retry".to_string(),
            Status::WaitingForNetwork => "waiting_for_network".to_string(),
            Status::QueuedForWifi => "queued_for_wifi".to_string(),
            Status::DeviceNotFound => "device_not_found".to_string(),
            Status::Success => "success".to_string(),
            Status::CannotResume => "cannot_resume".to_string(),
            Status::HttpDataError => "http_data_error".to_string(),
            Status::TooManyRedirects => "too_many_redirects".to_string(),
            Status::UnhandledHttpCode => "unhandled_http_code".to_string(),
            Status::FileError => "file_error".to_string(),
            Status::InsufficientSpace => "insufficient_space".to_string(),
            Status::Canceled => "canceled".to_string(),
            Status::HttpStatus(code) => format!("http_{code}"),
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => Status::Pending,
            "running" => Status::Running,
            "paused_by_app" => Status::PausedByApp,
            "waiting_to_retry" => Status::WaitingToRetry,
            "waiting_for_network" => Status::WaitingForNetwork,
            "queued_for_wifi" => Status::QueuedForWifi,
            "device_not_found" => Status::DeviceNotFound,
            "success" => Status::Success,
            "cannot_resume" => Status::CannotResume,
            "http_data_error" => Status::HttpDataError,
            "too_many_redirects" => Status::TooManyRedirects,
            "unhandled_http_code" => Status::UnhandledHttpCode,
            "file_error" => Status::FileError,
            "insufficient_space" => Status::InsufficientSpace,
            "canceled" => Status::Canceled,
            other => other
                .strip_prefix("http_")
                .and_then(|n| n.parse::<u16>().ok())
                .map(Status::HttpStatus)
                .unwrap_or(Status::Pending),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Control {
    Run,
    Paused,
}

impl Control {
    pub fn as_str(&self) -> &'static str {
        match self {
            Control::Run => "run",
            Control::Paused => "paused",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "paused" => Control::Paused,
            _ => Control::Run,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Hidden,
    Visible,
    VisibleNotifyComplete,
    VisibleNotifyCompleteOnly,
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::Visible
    }
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Hidden => "hidden",
            Visibility::Visible => "visible",
            Visibility::VisibleNotifyComplete => "visible_notify_complete",
            Visibility::VisibleNotifyCompleteOnly => "visible_notify_complete_only",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "hidden" => Visibility::Hidden,
            "visible_notify_complete" => Visibility::VisibleNotifyComplete,
            "visible_notify_complete_only" => Visibility::VisibleNotifyCompleteOnly,
            _ => Visibility::Visible,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestinationClass {
    Cache,
    CachePurgeable,
    CacheNoRoaming,
    SystemCache,
    External,
    FileUri,
    ExternalAdded,
}

impl Default for DestinationClass {
    fn default() -> Self {
        DestinationClass::Cache
    }
}

impl DestinationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationClass::Cache => "cache",
            DestinationClass::CachePurgeable => "cache_purgeable",
            DestinationClass::CacheNoRoaming => "cache_no_roaming",
            DestinationClass::SystemCache => "system_cache",
            DestinationClass::External => "external",
            DestinationClass::FileUri => "file_uri",
            DestinationClass::ExternalAdded => "external_added",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "cache_purgeable" => DestinationClass::CachePurgeable,
            "cache_no_roaming" => DestinationClass::CacheNoRoaming,
            "system_cache" => DestinationClass::SystemCache,
            "external" => DestinationClass::External,
            "file_uri" => DestinationClass::FileUri,
            "external_added" => DestinationClass::ExternalAdded,
            _ => DestinationClass::Cache,
        }
    }
}

impl DestinationClass {
    pub fn is_cache(&self) -> bool {
        matches!(
            self,
            DestinationClass::Cache
                | DestinationClass::CachePurgeable
                | DestinationClass::CacheNoRoaming
                | DestinationClass::SystemCache
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaScanned {
    NotScannable,
    NotScanned,
    Scanned,
}

impl Default for MediaScanned {
    fn default() -> Self {
        MediaScanned::NotScanned
    }
}

impl MediaScanned {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaScanned::NotScannable => "not_scannable",
            MediaScanned::NotScanned => "not_scanned",
            MediaScanned::Scanned => "scanned",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "not_scannable" => MediaScanned::NotScannable,
            "scanned" => MediaScanned::Scanned,
            _ => MediaScanned::NotScanned,
        }
    }
}

bitflags! {
    /// Bitmask of allowed network categories (§3 `allowed_network_types`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct NetworkTypeMask: u8 {
        const WIFI   = 0b0000_0001;
        const MOBILE = 0b0000_0010;
        const OTHER  = 0b0000_0100;
    }
}

impl Default for NetworkTypeMask {
    fn default() -> Self {
        NetworkTypeMask::all()
    }
}

bitflags! {
    /// Request-level behavior flags (§3 `flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RequestFlags: u8 {
        const REQUIRES_CHARGING    = 0b0000_0001;
        const REQUIRES_DEVICE_IDLE = 0b0000_0010;
    }
}

impl Default for RequestFlags {
    fn default() -> Self {
        RequestFlags::empty()
    }
}
