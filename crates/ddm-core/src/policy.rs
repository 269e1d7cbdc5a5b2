//! Pure run/defer decision table (§4.5).
//!
//! A pure `fn(&Request, &EnvSnapshot) -> PolicyDecision` with no I/O, that
//! accounts for network category, charging/idle flags, and mount presence.
//! The backoff constants below are this policy's own (§9).

use crate::env::{EnvSnapshot, NetworkKind};
use crate::request::{Control, NetworkTypeMask, Request, RequestFlags, Status};
use rand::Rng;
use std::time::Duration;

/// First exponential-backoff delay (§9): doubles per additional failure.
pub const RETRY_FIRST_DELAY_SECS: u64 = 30;
pub const MAX_RETRIES: u32 = 5;
pub const MIN_RETRY_AFTER_SECS: u64 = 30;
pub const MAX_RETRY_AFTER_SECS: u64 = 86_400;

/// Which network category a request currently needs in order to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredNetwork {
    Any,
    NotRoaming,
    Unmetered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    RunNow(RequiredNetwork),
    Defer(Duration),
    /// Defer with no scheduled wake-up: only an external event (mount, charging,
    /// idle, user resume) can make this request runnable again.
    DeferIndefinitely,
    WaitNetwork(RequiredNetwork),
    Pause,
    Skip,
}

fn required_network(req: &Request, env: &EnvSnapshot) -> RequiredNetwork {
    if !req.allow_metered {
        return RequiredNetwork::Unmetered;
    }
    if req.allowed_network_types == NetworkTypeMask::WIFI {
        return RequiredNetwork::Unmetered;
    }
    if req.total_bytes > env.max_over_mobile_bytes {
        return RequiredNetwork::Unmetered;
    }
    if req.total_bytes > env.recommended_over_mobile_bytes && !req.bypass_recommended_size_limit {
        return RequiredNetwork::Unmetered;
    }
    if !req.allow_roaming {
        return RequiredNetwork::NotRoaming;
    }
    RequiredNetwork::Any
}

fn network_available(required: RequiredNetwork, env: &EnvSnapshot) -> bool {
    if !env.connected {
        return false;
    }
    match required {
        RequiredNetwork::Any => true,
        RequiredNetwork::NotRoaming => !env.roaming,
        RequiredNetwork::Unmetered => !env.metered || env.active_kind == NetworkKind::Wifi,
    }
}

/// True if `req.file_path` names a `file://` destination on external storage
/// that is not presently mounted. The core has no filesystem-layout helper
/// (§1 names it an external collaborator); callers inject the mount check.
pub fn is_unmounted_external(req: &Request, mount_present: impl Fn(&str) -> bool) -> bool {
    match &req.file_path {
        Some(path) if path.starts_with("file://") || path.starts_with('/') => !mount_present(path),
        _ => false,
    }
}

/// Backoff for decision 3: `retry_after_ms` if server-directed, zero if
/// negative (a Worker-set "run again immediately" re-arm, used when a
/// graceful shutdown interrupts a request that hadn't otherwise failed),
/// else exponential from `num_failed`, plus jitter up to half the computed
/// delay.
pub fn backoff_delay_ms(req: &Request, rng: &mut impl Rng) -> i64 {
    let base = if req.retry_after_ms < 0 {
        0
    } else if req.retry_after_ms > 0 {
        req.retry_after_ms
    } else {
        let exp = req.num_failed.saturating_sub(1).min(20);
        (RETRY_FIRST_DELAY_SECS as i64 * 1000) * (1i64 << exp)
    };
    let jitter = if base > 0 {
        rng.gen_range(0..=base / 2)
    } else {
        0
    };
    base + jitter
}

/// §4.5's decision table, first match wins. `mount_present` answers whether
/// the volume backing `req.file_path` is currently mounted (decision 4);
/// pass a closure that always returns `true` when the destination is never
/// on removable external storage.
pub fn decide(
    req: &Request,
    env: &EnvSnapshot,
    now_monotonic_ms: i64,
    rng: &mut impl Rng,
    mount_present: impl Fn(&str) -> bool,
) -> PolicyDecision {
    if req.control == Control::Paused {
        return PolicyDecision::Pause;
    }
    if req.is_terminal() {
        return PolicyDecision::Skip;
    }
    if req.status == Status::WaitingToRetry {
        let delay = backoff_delay_ms(req, rng);
        let deadline = req.last_modified + delay;
        if now_monotonic_ms < deadline {
            return PolicyDecision::Defer(Duration::from_millis((deadline - now_monotonic_ms) as u64));
        }
    }
    if req.status == Status::DeviceNotFound && is_unmounted_external(req, mount_present) {
        return PolicyDecision::DeferIndefinitely;
    }
    if req.flags.contains(RequestFlags::REQUIRES_CHARGING) && !env.charging {
        return PolicyDecision::DeferIndefinitely;
    }
    if req.flags.contains(RequestFlags::REQUIRES_DEVICE_IDLE) && !env.idle {
        return PolicyDecision::DeferIndefinitely;
    }

    let required = required_network(req, env);
    if !network_available(required, env) {
        return PolicyDecision::WaitNetwork(required);
    }
    PolicyDecision::RunNow(required)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::DestinationClass;
    use rand::SeedableRng;

    fn req(status: Status) -> Request {
        Request::new_for_test(status)
    }

    fn env() -> EnvSnapshot {
        EnvSnapshot::default()
    }

    fn rng() -> rand::rngs::StdRng {
        rand::rngs::StdRng::seed_from_u64(1)
    }

    #[test]
    fn paused_control_always_wins() {
        let mut r = req(Status::Running);
        r.control = Control::Paused;
        assert_eq!(
            decide(&r, &env(), 0, &mut rng(), |_| true),
            PolicyDecision::Pause
        );
    }

    #[test]
    fn terminal_status_is_skip() {
        let r = req(Status::Success);
        assert_eq!(decide(&r, &env(), 0, &mut rng(), |_| true), PolicyDecision::Skip);
    }

    #[test]
    fn waiting_to_retry_defers_until_backoff_elapses() {
        let mut r = req(Status::WaitingToRetry);
        r.num_failed = 1;
        r.last_modified = 0;
        let decision = decide(&r, &env(), 1_000, &mut rng(), |_| true);
        assert!(matches!(decision, PolicyDecision::Defer(_)));
    }

    #[test]
    fn waiting_to_retry_runs_once_backoff_elapses() {
        let mut r = req(Status::WaitingToRetry);
        r.num_failed = 1;
        r.last_modified = 0;
        // first delay alone is 30_000ms plus up to 15_000ms jitter; 60s is safely past it.
        let decision = decide(&r, &env(), 60_000, &mut rng(), |_| true);
        assert!(matches!(decision, PolicyDecision::RunNow(_)));
    }

    #[test]
    fn metered_only_requires_unmetered_network() {
        let mut r = req(Status::Pending);
        r.allow_metered = false;
        let mut e = env();
        e.metered = true;
        e.active_kind = NetworkKind::Mobile;
        assert_eq!(
            decide(&r, &e, 0, &mut rng(), |_| true),
            PolicyDecision::WaitNetwork(RequiredNetwork::Unmetered)
        );
    }

    #[test]
    fn oversized_download_over_mobile_requires_unmetered() {
        let mut r = req(Status::Pending);
        r.total_bytes = 200 * 1024 * 1024;
        let mut e = env();
        e.metered = true;
        e.active_kind = NetworkKind::Mobile;
        assert_eq!(
            decide(&r, &e, 0, &mut rng(), |_| true),
            PolicyDecision::WaitNetwork(RequiredNetwork::Unmetered)
        );
    }

    #[test]
    fn runs_now_when_network_and_power_conditions_are_met() {
        let r = req(Status::Pending);
        assert_eq!(
            decide(&r, &env(), 0, &mut rng(), |_| true),
            PolicyDecision::RunNow(RequiredNetwork::Any)
        );
    }

    #[test]
    fn requires_charging_defers_indefinitely_when_not_charging() {
        let mut r = req(Status::Pending);
        r.flags = RequestFlags::REQUIRES_CHARGING;
        let mut e = env();
        e.charging = false;
        assert_eq!(
            decide(&r, &e, 0, &mut rng(), |_| true),
            PolicyDecision::DeferIndefinitely
        );
    }

    #[test]
    fn unmounted_external_device_not_found_defers_indefinitely() {
        let mut r = req(Status::DeviceNotFound);
        r.destination_class = DestinationClass::External;
        r.file_path = Some("/mnt/sdcard/foo.bin".to_string());
        assert_eq!(
            decide(&r, &env(), 0, &mut rng(), |_| false),
            PolicyDecision::DeferIndefinitely
        );
    }

    #[test]
    fn negative_retry_after_ms_means_run_now_even_with_no_prior_failures() {
        let mut r = req(Status::WaitingToRetry);
        r.num_failed = 0;
        r.retry_after_ms = -1;
        r.last_modified = 0;
        let decision = decide(&r, &env(), 0, &mut rng(), |_| true);
        assert!(matches!(decision, PolicyDecision::RunNow(_)));
    }

    #[test]
    fn roaming_not_allowed_waits_for_non_roaming_network() {
        let mut r = req(Status::Pending);
        r.allow_roaming = false;
        let mut e = env();
        e.roaming = true;
        assert_eq!(
            decide(&r, &e, 0, &mut rng(), |_| true),
            PolicyDecision::WaitNetwork(RequiredNetwork::NotRoaming)
        );
    }
}
