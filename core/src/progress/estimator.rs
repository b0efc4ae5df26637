use std::sync::Weak;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use super::registry::RegistryInner;

/// Projections further out than this are not reported.
const MAX_PROJECTION_MS: i64 = 100 * 365 * 24 * 60 * 60 * 1000;

/// Linear projection: if `progress` percent took `now - start`, the rest
/// takes proportionally as long.
pub fn estimate_end(start: DateTime<Utc>, now: DateTime<Utc>, progress: f64) -> Option<DateTime<Utc>> {
    if progress.is_nan() || progress <= 0.0 {
        return None;
    }
    let elapsed_ms = (now - start).num_milliseconds().max(0) as f64;
    let total_ms = elapsed_ms / progress.min(100.0) * 100.0;
    if !total_ms.is_finite() || total_ms >= MAX_PROJECTION_MS as f64 {
        return None;
    }
    start.checked_add_signed(chrono::Duration::milliseconds(total_ms.round() as i64))
}

/// The task only holds a weak reference and exits once the registry is gone.
pub(crate) fn spawn(registry: Weak<RegistryInner>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let Some(inner) = registry.upgrade() else {
                break;
            };
            inner.refresh_estimates(Utc::now());
        }
        tracing::debug!("progress estimator stopped");
    })
}
