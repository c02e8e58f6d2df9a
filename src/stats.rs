//! Baseline statistics for per-user metric series
//!
//! Two families of baselines are used by the scoring engines and they are kept
//! deliberately separate:
//!
//! - **Mean/SD baselines** ([`mean_sd_baseline`], [`sample_baseline`]) with a
//!   variance floor, optionally after [`trim_outliers`]
//! - **Robust baselines** ([`robust_baseline`]) built from the median and the
//!   median absolute deviation, scaled by 1.4826 so that it estimates the
//!   standard deviation of normally distributed data
//!
//! All values handed to these functions are expected to be finite; callers
//! obtain them through [`DailyMetric::value`], which drops non-finite input.

use crate::models::{values_of, DailyMetric, MetricKey};
use serde::{Deserialize, Serialize};

/// Number of trailing observations a baseline is computed over
pub const BASELINE_WINDOW: usize = 28;

/// Lower bound applied to every variance estimate
pub const VARIANCE_FLOOR: f64 = 1e-6;

/// Converts a MAD into a standard-deviation estimate
pub const MAD_SCALE: f64 = 1.4826;

/// Robust z-scores are clamped to this magnitude
pub const Z_LIMIT: f64 = 2.5;

/// Values farther than this many SDs from the mean are trimmed
pub const OUTLIER_SD: f64 = 3.0;

/// Mean and standard deviation of a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub mean: f64,
    pub sd: f64,
}

/// Median and scaled MAD of a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RobustBaseline {
    pub median: f64,
    pub scaled_mad: f64,
}

pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.clamp(min, max)
}

/// Map NaN and infinities to zero contribution
pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// The trailing `BASELINE_WINDOW` values of a series
pub fn trailing_window(values: &[f64]) -> &[f64] {
    &values[values.len().saturating_sub(BASELINE_WINDOW)..]
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Mean/SD baseline with singleton handling.
///
/// A single value gets an SD of 5% of its magnitude (at least `1e-6`) so that
/// a one-point series never divides by zero. Two or more values use the
/// Bessel-corrected sample variance, floored at [`VARIANCE_FLOOR`].
pub fn mean_sd_baseline(values: &[f64]) -> Option<Baseline> {
    match values {
        [] => None,
        [only] => Some(Baseline {
            mean: *only,
            sd: (only.abs() * 0.05).max(1e-6),
        }),
        _ => {
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                / (values.len() - 1) as f64;
            Some(Baseline {
                mean,
                sd: variance.max(VARIANCE_FLOOR).sqrt(),
            })
        }
    }
}

/// Mean/SD baseline used for refeed response z-series.
///
/// Unlike [`mean_sd_baseline`], a single value is not special-cased: the
/// divisor is `max(n - 1, 1)`, so a singleton gets the floored SD of
/// `sqrt(1e-6)`.
pub fn sample_baseline(values: &[f64]) -> Option<Baseline> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
        / (values.len().saturating_sub(1).max(1)) as f64;
    Some(Baseline {
        mean,
        sd: variance.max(VARIANCE_FLOOR).sqrt(),
    })
}

/// Drop values more than three SDs from the mean; no-op below four values
pub fn trim_outliers(values: &[f64]) -> Vec<f64> {
    if values.len() < 4 {
        return values.to_vec();
    }
    let Some(stats) = mean_sd_baseline(values) else {
        return values.to_vec();
    };
    let threshold = OUTLIER_SD * stats.sd;
    values
        .iter()
        .copied()
        .filter(|v| (v - stats.mean).abs() <= threshold)
        .collect()
}

/// Median, averaging the two middle elements for even lengths; 0 when empty
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Median absolute deviation around `center`; 0 when empty
pub fn mad(values: &[f64], center: f64) -> f64 {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// Median and scaled MAD over the trailing window of `values`
pub fn robust_baseline(values: &[f64]) -> Option<RobustBaseline> {
    if values.is_empty() {
        return None;
    }
    let window = trailing_window(values);
    let median = median(window);
    Some(RobustBaseline {
        median,
        scaled_mad: MAD_SCALE * mad(window, median),
    })
}

/// Robust z-score of the latest day's value for `key`.
///
/// The baseline is the median/scaled-MAD of the last 28 usable values up to
/// and including the latest day. The scale is floored at `sd_floor` and the
/// result clamped to ±[`Z_LIMIT`]. Returns `None` when the latest day has no
/// usable value, meaning the metric contributes nothing.
pub fn robust_z(history: &[DailyMetric], key: MetricKey, sd_floor: f64) -> Option<f64> {
    let latest = history.last()?.value(key)?;
    let baseline = robust_baseline(&values_of(history, key))?;
    let scale = baseline.scaled_mad.max(sd_floor);
    let raw = (latest - baseline.median) / scale;
    Some(clamp(finite_or_zero(raw), -Z_LIMIT, Z_LIMIT))
}

/// Z-score of the latest day's value against an outlier-trimmed mean/SD
/// baseline of the last 28 usable values. Not clamped.
pub fn baseline_z(history: &[DailyMetric], key: MetricKey) -> Option<f64> {
    let latest = history.last()?.value(key)?;
    let values = values_of(history, key);
    let trimmed = trim_outliers(trailing_window(&values));
    let stats = mean_sd_baseline(&trimmed)?;
    Some(finite_or_zero((latest - stats.mean) / stats.sd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn history(key: MetricKey, values: &[Option<f64>]) -> Vec<DailyMetric> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let mut m = DailyMetric::new(start + chrono::Days::new(i as u64));
                m.set(key, *v);
                m
            })
            .collect()
    }

    #[test]
    fn test_mean_sd_baseline_empty_and_singleton() {
        assert_eq!(mean_sd_baseline(&[]), None);

        let single = mean_sd_baseline(&[60.0]).unwrap();
        assert_eq!(single.mean, 60.0);
        assert!((single.sd - 3.0).abs() < 1e-12);

        let zero = mean_sd_baseline(&[0.0]).unwrap();
        assert_eq!(zero.sd, 1e-6);
    }

    #[test]
    fn test_mean_sd_baseline_sample_variance() {
        let stats = mean_sd_baseline(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(stats.mean, 5.0);
        // Sample variance 32 / 7
        assert!((stats.sd - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);

        let constant = mean_sd_baseline(&[5.0, 5.0, 5.0]).unwrap();
        assert!((constant.sd - 1e-3).abs() < 1e-15);
    }

    #[test]
    fn test_sample_baseline_singleton_uses_floor() {
        let stats = sample_baseline(&[36.5]).unwrap();
        assert_eq!(stats.mean, 36.5);
        assert!((stats.sd - 1e-3).abs() < 1e-15);
        assert_eq!(sample_baseline(&[]), None);
    }

    #[test]
    fn test_trim_outliers() {
        let short = [1.0, 100.0, 2.0];
        assert_eq!(trim_outliers(&short), short.to_vec());

        let mut values = vec![10.0; 20];
        values.push(1000.0);
        let trimmed = trim_outliers(&values);
        assert_eq!(trimmed.len(), 20);
        assert!(trimmed.iter().all(|v| *v == 10.0));
    }

    #[test]
    fn test_median_and_mad() {
        assert_eq!(median(&[]), 0.0);
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(mad(&[1.0, 2.0, 3.0, 4.0, 100.0], 3.0), 1.0);
        assert_eq!(mad(&[], 3.0), 0.0);
    }

    #[test]
    fn test_robust_baseline_uses_trailing_window() {
        let mut values = vec![1000.0; 10];
        values.extend(std::iter::repeat(50.0).take(BASELINE_WINDOW));
        let baseline = robust_baseline(&values).unwrap();
        assert_eq!(baseline.median, 50.0);
        assert_eq!(baseline.scaled_mad, 0.0);
    }

    #[test]
    fn test_robust_z_respects_floor_and_clamp() {
        let mut values = vec![Some(55.0); 27];
        values.push(Some(57.0));
        let series = history(MetricKey::RhrBpm, &values);
        // MAD is zero, so the floor of 2 bpm is the scale
        let z = robust_z(&series, MetricKey::RhrBpm, 2.0).unwrap();
        assert!((z - 1.0).abs() < 1e-12);

        let mut spiked = vec![Some(55.0); 27];
        spiked.push(Some(80.0));
        let series = history(MetricKey::RhrBpm, &spiked);
        assert_eq!(robust_z(&series, MetricKey::RhrBpm, 2.0), Some(Z_LIMIT));
    }

    #[test]
    fn test_robust_z_requires_latest_value() {
        let series = history(MetricKey::TempC, &[Some(36.5), Some(36.6), None]);
        assert_eq!(robust_z(&series, MetricKey::TempC, 0.1), None);

        let series = history(MetricKey::TempC, &[None, None]);
        assert_eq!(robust_z(&series, MetricKey::TempC, 0.1), None);

        assert_eq!(robust_z(&[], MetricKey::TempC, 0.1), None);
    }

    #[test]
    fn test_robust_z_ignores_non_finite_history() {
        let series = history(
            MetricKey::HrvMs,
            &[Some(f64::NAN), Some(70.0), Some(f64::INFINITY), Some(70.0)],
        );
        assert_eq!(robust_z(&series, MetricKey::HrvMs, 10.0), Some(0.0));
    }

    #[test]
    fn test_baseline_z_trims_before_scoring() {
        let mut values: Vec<Option<f64>> = (0..20).map(|i| Some(60.0 + (i % 2) as f64)).collect();
        values.push(Some(200.0));
        values.push(Some(61.0));
        let series = history(MetricKey::RhrBpm, &values);
        let z = baseline_z(&series, MetricKey::RhrBpm).unwrap();
        assert!(z.is_finite());
        assert!(z.abs() < 2.0);
    }
}
