//! Env capability (§6): monotonic/wall time and the current connectivity
//! snapshot. A trait-based capability seam in the same style as
//! `resolver::Resolver`, applied to the clock/network side of the engine so
//! Policy and the Scheduler depend on a trait instead of ambient globals
//! (§9's "rebuild as a single `Engine` aggregate... tests instantiate with
//! fakes" design note).

use async_trait::async_trait;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    Wifi,
    Mobile,
    Other,
}

/// A snapshot of network/power conditions taken once per reconciliation
/// (§5: "immutable between reconciliations; refreshed at the start of each").
#[derive(Debug, Clone, Copy)]
pub struct EnvSnapshot {
    pub connected: bool,
    pub active_kind: NetworkKind,
    pub metered: bool,
    pub roaming: bool,
    pub charging: bool,
    pub idle: bool,
    pub max_over_mobile_bytes: i64,
    pub recommended_over_mobile_bytes: i64,
}

#[async_trait]
pub trait Env: Send + Sync {
    fn now_wall_ms(&self) -> i64;
    fn now_monotonic_ms(&self) -> i64;
    async fn snapshot(&self) -> EnvSnapshot;
}

/// Real system clock and connectivity source. Connectivity fields are
/// conservative placeholders (always connected, unmetered Wifi) since the
/// actual connectivity source is an external collaborator per §1 ("the
/// CLI/host wiring" is out of scope) — a real host binds this trait to its
/// platform's network-state API instead of using `SystemEnv` directly.
pub struct SystemEnv {
    start: std::time::Instant,
    start_wall_ms: i64,
    pub max_over_mobile_bytes: i64,
    pub recommended_over_mobile_bytes: i64,
}

impl SystemEnv {
    pub fn new(max_over_mobile_bytes: i64, recommended_over_mobile_bytes: i64) -> Self {
        Self {
            start: std::time::Instant::now(),
            start_wall_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as i64,
            max_over_mobile_bytes,
            recommended_over_mobile_bytes,
        }
    }
}

#[async_trait]
impl Env for SystemEnv {
    fn now_wall_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    fn now_monotonic_ms(&self) -> i64 {
        self.start_wall_ms + self.start.elapsed().as_millis() as i64
    }

    async fn snapshot(&self) -> EnvSnapshot {
        EnvSnapshot {
            connected: true,
            active_kind: NetworkKind::Wifi,
            metered: false,
            roaming: false,
            charging: true,
            idle: false,
            max_over_mobile_bytes: self.max_over_mobile_bytes,
            recommended_over_mobile_bytes: self.recommended_over_mobile_bytes,
        }
    }
}

/// A fake `Env` for tests: every field is set directly, and time is a plain
/// counter so backoff/jitter math can be asserted exactly (§9).
#[cfg(any(test, feature = "test-util"))]
pub struct FakeEnv {
    pub wall_ms: std::sync::atomic::AtomicI64,
    pub snapshot: std::sync::Mutex<EnvSnapshot>,
}

#[cfg(any(test, feature = "test-util"))]
impl FakeEnv {
    pub fn new(snapshot: EnvSnapshot) -> Self {
        Self {
            wall_ms: std::sync::atomic::AtomicI64::new(0),
            snapshot: std::sync::Mutex::new(snapshot),
        }
    }

    pub fn set_wall_ms(&self, ms: i64) {
        self.wall_ms.store(ms, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set_snapshot(&self, s: EnvSnapshot) {
        *self.snapshot.lock().unwrap() = s;
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl Env for FakeEnv {
    fn now_wall_ms(&self) -> i64 {
        self.wall_ms.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn now_monotonic_ms(&self) -> i64 {
        self.now_wall_ms()
    }

    async fn snapshot(&self) -> EnvSnapshot {
        *self.snapshot.lock().unwrap()
    }
}

impl Default for EnvSnapshot {
    fn default() -> Self {
        EnvSnapshot {
            connected: true,
            active_kind: NetworkKind::Wifi,
            metered: false,
            roaming: false,
            charging: true,
            idle: false,
            max_over_mobile_bytes: 100 * 1024 * 1024,
            recommended_over_mobile_bytes: 10 * 1024 * 1024,
        }
    }
}
