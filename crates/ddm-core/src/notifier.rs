//! Clustered notification events derived from Store changes and Worker
//! speed publications (§4.8).
//!
//! Generalizes the progress-channel idiom already used between Worker and
//! Store (an `UnboundedSender` of small progress structs) to a second,
//! independent subscriber over the same `Store::observe()` broadcast: the
//! Notifier never blocks the Scheduler's reconciliation and runs on its own
//! task, per §5 ("Notifier updates run on... a dedicated serialized task").

use crate::request::{Request, RequestId, Status, Visibility};
use crate::worker::SpeedSample;

use std::collections::HashMap;
use tokio::sync::mpsc;

/// A clustering key: `(category, owner)` for Active/Waiting, `(Complete, id)`
/// for terminal rows, where `id` is encoded as the owner string so the map
/// stays single-keyed (§4.8: "Complete items are per-id").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    pub category: Category,
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Active,
    Waiting,
    Complete,
}

#[derive(Debug, Clone)]
pub struct Update {
    pub tag: Tag,
    pub title: String,
    pub detail: String,
    /// `None` when any contributing row has unknown `total_bytes`.
    pub progress: Option<f64>,
    pub eta_ms: Option<i64>,
    pub actions: Vec<&'static str>,
    pub first_shown_at: i64,
}

fn category_for(req: &Request) -> Option<Category> {
    match req.visibility {
        Visibility::Hidden => return None,
        _ => {}
    }
    if req.is_terminal() {
        return matches!(
            req.visibility,
            Visibility::VisibleNotifyComplete | Visibility::VisibleNotifyCompleteOnly
        )
        .then_some(Category::Complete);
    }
    match req.status {
        Status::Running => Some(Category::Active),
        Status::QueuedForWifi | Status::WaitingForNetwork => Some(Category::Waiting),
        _ => None,
    }
}

fn tag_for(req: &Request, category: Category) -> Tag {
    let key = match category {
        Category::Complete => req.id.to_string(),
        Category::Active | Category::Waiting => req.owner.clone(),
    };
    Tag { category, key }
}

fn actions_for(category: Category) -> Vec<&'static str> {
    match category {
        Category::Active => vec!["pause", "cancel"],
        Category::Waiting => vec!["cancel"],
        Category::Complete => vec!["open", "dismiss"],
    }
}

/// Builds `Update` events from the current set of non-deleted rows plus the
/// latest known per-request speed, preserving `first_shown_at` for tags
/// already seen in `shown_at`.
pub fn cluster(
    requests: &[Request],
    speeds: &HashMap<RequestId, f64>,
    shown_at: &mut HashMap<Tag, i64>,
    now_ms: i64,
) -> Vec<Update> {
    let mut groups: HashMap<Tag, Vec<&Request>> = HashMap::new();
    for req in requests {
        if req.deleted {
            continue;
        }
        let Some(category) = category_for(req) else {
            continue;
        };
        groups.entry(tag_for(req, category)).or_default().push(req);
    }

    let mut updates: Vec<Update> = groups
        .into_iter()
        .map(|(tag, members)| {
            let first_shown_at = *shown_at.entry(tag.clone()).or_insert(now_ms);

            let mut current = 0i64;
            let mut total = 0i64;
            let mut any_unknown = false;
            let mut speed_sum = 0f64;
            let mut have_speed = false;
            for req in &members {
                current += req.current_bytes;
                if req.total_bytes < 0 {
                    any_unknown = true;
                } else {
                    total += req.total_bytes;
                }
                if let Some(s) = speeds.get(&req.id) {
                    speed_sum += s;
                    have_speed = true;
                }
            }

            let progress = if any_unknown || total == 0 {
                None
            } else {
                Some((current as f64 / total as f64).clamp(0.0, 1.0))
            };
            let eta_ms = if have_speed && speed_sum > 0.0 && !any_unknown {
                Some((((total - current).max(0) as f64 / speed_sum) * 1000.0) as i64)
            } else {
                None
            };

            let title = match tag.category {
                Category::Active => format!("Downloading ({})", members.len()),
                Category::Waiting => format!("Waiting ({})", members.len()),
                Category::Complete => members[0]
                    .file_path
                    .clone()
                    .unwrap_or_else(|| members[0].source_uri.clone()),
            };
            let detail = match tag.category {
                Category::Complete if members[0].status == Status::Success => {
                    "Download complete".to_string()
                }
                Category::Complete => format!("{:?}", members[0].status),
                _ => format!("{} of {}", format_bytes(current), format_bytes(total)),
            };

            Update {
                tag: tag.clone(),
                title,
                detail,
                progress,
                eta_ms,
                actions: actions_for(tag.category),
                first_shown_at,
            }
        })
        .collect();

    updates.sort_by_key(|u| u.first_shown_at);
    shown_at.retain(|tag, _| updates.iter().any(|u| &u.tag == tag));
    updates
}

fn format_bytes(n: i64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut value = n.max(0) as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Runs until the Store's change channel closes, emitting clustered
/// `Update`s to `out` on every change and every speed sample. Reconciles
/// fresh clustering on each tick rather than diffing incrementally, matching
/// the Scheduler's own reconcile-from-scratch design (§4.7).
pub async fn run(
    store: std::sync::Arc<crate::store::Store>,
    mut speed_rx: mpsc::UnboundedReceiver<SpeedSample>,
    out: mpsc::UnboundedSender<Update>,
    now_ms: impl Fn() -> i64 + Send + 'static,
) {
    let mut changes = store.observe();
    let mut speeds: HashMap<RequestId, f64> = HashMap::new();
    let mut shown_at: HashMap<Tag, i64> = HashMap::new();

    loop {
        tokio::select! {
            change = changes.recv() => {
                match change {
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            sample = speed_rx.recv() => {
                match sample {
                    Some(s) => { speeds.insert(s.request_id, s.bytes_per_sec); }
                    None => break,
                }
            }
        }

        let Ok(active) = store.list_active().await else { continue };
        for update in cluster(&active, &speeds, &mut shown_at, now_ms()) {
            if out.send(update).is_err() {
                return;
            }
        }
    }
}
