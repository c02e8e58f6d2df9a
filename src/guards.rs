//! Safety guards that veto a refeed recommendation

use crate::models::{DailyMetric, GuardFlags, MetricKey};

/// Temperature at or above which the day looks feverish
pub const FEVER_TEMP_C: f64 = 37.5;

/// Weight observations compared for acute gain
pub const ACUTE_GAIN_WINDOW: usize = 3;

/// Fractional gain over the window that counts as acute
pub const ACUTE_GAIN_FRACTION: f64 = 0.015;

pub fn is_fever_like(latest: Option<&DailyMetric>) -> bool {
    latest
        .and_then(|m| m.value(MetricKey::TempC))
        .is_some_and(|t| t >= FEVER_TEMP_C)
}

/// Gain of at least 1.5% between the first and last of the latest three
/// recorded weights
pub fn has_acute_weight_gain(history: &[DailyMetric]) -> bool {
    let recent: Vec<f64> = history
        .iter()
        .rev()
        .filter_map(|m| m.value(MetricKey::WeightKg))
        .take(ACUTE_GAIN_WINDOW)
        .collect();
    if recent.len() < ACUTE_GAIN_WINDOW {
        return false;
    }

    // Collected newest first
    let end = recent[0];
    let start = recent[ACUTE_GAIN_WINDOW - 1];
    start > 0.0 && (end - start) / start >= ACUTE_GAIN_FRACTION
}

/// Evaluate both guards for the day described by `latest`
pub fn evaluate_guard_flags(latest: Option<&DailyMetric>, history: &[DailyMetric]) -> GuardFlags {
    GuardFlags {
        fever_like: is_fever_like(latest),
        acute_weight_gain: has_acute_weight_gain(history),
    }
}
