//! Metabolic adaptation score (MAS)
//!
//! Combines per-metric z-scores of temperature, resting heart rate, HRV, sleep
//! and subjective fatigue into one polarity-adjusted index. Each metric moves
//! the index upward when it drifts in its maladaptive direction: a rising
//! resting heart rate or fatigue, or a falling temperature, HRV or sleep.
//!
//! Metrics without a value on the scored day are left out entirely and the
//! remaining weights are renormalized, so missing data lowers confidence
//! without diluting the index toward zero.

use crate::models::{DailyMetric, MetricKey};
use crate::stats::{self, clamp, finite_or_zero};
use serde::{Deserialize, Serialize};

/// The composite index is clamped to ±MAS_LIMIT
pub const MAS_LIMIT: f64 = 3.0;

/// Contribution parameters of one tracked metric
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricWeight {
    pub key: MetricKey,
    pub weight: f64,
    /// +1 when a rise is maladaptive, -1 when a fall is
    pub polarity: f64,
    /// Lower bound on the robust scale, in the metric's unit
    pub sd_floor: f64,
}

/// Tracked metrics in evaluation order
pub const COMPOSITE_METRICS: [MetricWeight; 5] = [
    MetricWeight {
        key: MetricKey::TempC,
        weight: 0.35,
        polarity: -1.0,
        sd_floor: 0.1,
    },
    MetricWeight {
        key: MetricKey::RhrBpm,
        weight: 0.25,
        polarity: 1.0,
        sd_floor: 2.0,
    },
    MetricWeight {
        key: MetricKey::HrvMs,
        weight: 0.15,
        polarity: -1.0,
        sd_floor: 10.0,
    },
    MetricWeight {
        key: MetricKey::SleepMin,
        weight: 0.15,
        polarity: -1.0,
        sd_floor: 30.0,
    },
    MetricWeight {
        key: MetricKey::Fatigue,
        weight: 0.10,
        polarity: 1.0,
        sd_floor: 0.5,
    },
];

/// How per-metric z-scores are derived
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZScoreMethod {
    /// Median / scaled-MAD with per-metric floors, clamped to ±2.5
    #[default]
    Robust,
    /// Outlier-trimmed mean / SD, unclamped
    TrimmedBaseline,
}

impl ZScoreMethod {
    fn z(&self, history: &[DailyMetric], metric: &MetricWeight) -> Option<f64> {
        match self {
            ZScoreMethod::Robust => stats::robust_z(history, metric.key, metric.sd_floor),
            ZScoreMethod::TrimmedBaseline => stats::baseline_z(history, metric.key),
        }
    }
}

/// Z-score of one tracked metric on the scored day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricZ {
    pub key: MetricKey,
    /// 0 when the metric had no value
    pub z: f64,
    pub has_value: bool,
}

/// Composite index with its per-metric breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeIndex {
    pub mas: f64,
    pub z_scores: Vec<MetricZ>,
    /// Sum of the raw weights of metrics that had a value
    pub active_weight: f64,
}

impl CompositeIndex {
    pub fn z(&self, key: MetricKey) -> Option<f64> {
        self.z_scores.iter().find(|m| m.key == key).map(|m| m.z)
    }

    pub fn contributing_metrics(&self) -> usize {
        self.z_scores.iter().filter(|m| m.has_value).count()
    }
}

/// Composite index of the last day of a chronologically ordered history
pub fn composite_index(history: &[DailyMetric]) -> CompositeIndex {
    composite_index_with(history, ZScoreMethod::Robust)
}

pub fn composite_index_with(history: &[DailyMetric], method: ZScoreMethod) -> CompositeIndex {
    let mut z_scores = Vec::with_capacity(COMPOSITE_METRICS.len());
    let mut active_weight = 0.0;

    for metric in &COMPOSITE_METRICS {
        match method.z(history, metric) {
            Some(z) => {
                active_weight += metric.weight;
                z_scores.push(MetricZ {
                    key: metric.key,
                    z,
                    has_value: true,
                });
            }
            None => z_scores.push(MetricZ {
                key: metric.key,
                z: 0.0,
                has_value: false,
            }),
        }
    }

    let mut mas = 0.0;
    if active_weight > 0.0 {
        for (metric, score) in COMPOSITE_METRICS.iter().zip(&z_scores) {
            if !score.has_value {
                continue;
            }
            let normalized_weight = metric.weight / active_weight;
            mas += normalized_weight * metric.polarity * score.z;
        }
    }

    CompositeIndex {
        mas: clamp(finite_or_zero(mas), -MAS_LIMIT, MAS_LIMIT),
        z_scores,
        active_weight,
    }
}
