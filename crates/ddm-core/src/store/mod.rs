//! The persistent request store (§4.1): SQLite-backed, with an in-process
//! change-notification stream.
//!
//! Adds the `observe()` change stream named in §6 (fed by every successful
//! write, not a database trigger — the same in-process broadcast-channel
//! idiom used elsewhere in this crate for progress updates).

mod db;
mod patch;

pub use db::Store;
pub use patch::Patch;

/// A change published by the Store after a commit. Scheduler and Notifier
/// both subscribe independently via `Store::observe()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Added(crate::request::RequestId),
    Updated(crate::request::RequestId),
    Deleted(crate::request::RequestId),
}

/// New-request payload for `Store::add` — the fields the submission API
/// supplies; the rest (`status`, counters, byte counts) start at their
/// initial values per §4.2.
#[derive(Debug, Clone, Default)]
pub struct NewRequest {
    pub owner: String,
    pub uid: i64,
    pub source_uri: String,
    pub hint_name: Option<String>,
    pub referer: Option<String>,
    pub cookies: Option<String>,
    pub user_agent: Option<String>,
    pub destination_class: crate::request::DestinationClass,
    pub file_path: Option<String>,
    pub mime_type: Option<String>,
    pub no_integrity: bool,
    pub visibility: crate::request::Visibility,
    pub allowed_network_types: crate::request::NetworkTypeMask,
    pub allow_roaming: bool,
    pub allow_metered: bool,
    pub bypass_recommended_size_limit: bool,
    pub flags: crate::request::RequestFlags,
    pub headers: std::collections::HashMap<String, String>,
}
