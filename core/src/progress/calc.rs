//! Weighted progress arithmetic.

use super::types::{ProgressUpdate, UpdateMode};

pub fn clamp_percent(v: f64) -> f64 {
    if v.is_nan() {
        return 0.0;
    }
    v.clamp(0.0, 100.0)
}

/// New phase progress after applying `update` to `current`.
pub fn apply_update(current: f64, update: &ProgressUpdate) -> f64 {
    match update.mode {
        UpdateMode::Absolute => clamp_percent(update.percentage),
        UpdateMode::Increment => clamp_percent(current + update.percentage),
    }
}

/// Phases before `current_index` count as finished, the active phase counts
/// proportionally and each subtask adds one unit of weight scaled by its own
/// overall progress.
pub fn overall_progress(
    weights: &[f64],
    current_index: usize,
    phase_progress: f64,
    subtasks: &[f64],
) -> f64 {
    let total: f64 = weights.iter().sum::<f64>() + subtasks.len() as f64;
    if total <= 0.0 {
        return 0.0;
    }

    let idx = current_index.min(weights.len().saturating_sub(1));
    let finished: f64 = weights[..idx].iter().sum();
    let active = weights.get(idx).copied().unwrap_or(0.0) * clamp_percent(phase_progress) / 100.0;
    let subs: f64 = subtasks.iter().map(|p| clamp_percent(*p) / 100.0).sum();

    clamp_percent((finished + active + subs) / total * 100.0)
}
