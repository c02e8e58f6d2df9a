//! Baseline refeed readiness score (v1)
//!
//! A fixed linear combination of the composite index and the behavioral
//! signals, passed through a logistic curve with steepness 2 centred at 0.5.
//! The score is stateless: it knows nothing about previous refeeds. See
//! [`crate::refeed`] for the cooldown-aware model.

use crate::mas::{composite_index_with, MetricZ, ZScoreMethod};
use crate::models::{is_chronological, DailyMetric};
use crate::signals::{deficit_streak, plateau_flag, training_load_factor};
use crate::stats::{clamp, finite_or_zero};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

pub const SIGMOID_STEEPNESS: f64 = 2.0;
pub const SIGMOID_MIDPOINT: f64 = 0.5;

/// Deficit streak length at which the deficit term saturates
pub const DEFICIT_SATURATION_DAYS: f64 = 14.0;

/// Weights of the v1 linear combination
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadinessCoefficients {
    pub mas: f64,
    pub plateau: f64,
    pub deficit: f64,
    pub training: f64,
}

pub const V1_COEFFICIENTS: ReadinessCoefficients = ReadinessCoefficients {
    mas: 1.2,
    plateau: 0.8,
    deficit: 0.5,
    training: 0.3,
};

/// Logistic transform shared by both readiness models
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-SIGMOID_STEEPNESS * (x - SIGMOID_MIDPOINT)).exp())
}

/// Deficit streak mapped into [0, 1], saturating at two weeks
pub fn normalized_deficit(streak: f64) -> f64 {
    clamp(finite_or_zero(streak) / DEFICIT_SATURATION_DAYS, 0.0, 1.0)
}

/// v1 readiness from already aggregated inputs
pub fn readiness_v1(mas: f64, plateau: bool, deficit_streak: u32, training_load_factor: f64) -> f64 {
    let c = V1_COEFFICIENTS;
    let input = c.mas * finite_or_zero(mas)
        + c.plateau * if plateau { 1.0 } else { 0.0 }
        + c.deficit * normalized_deficit(deficit_streak as f64)
        + c.training * finite_or_zero(training_load_factor);
    sigmoid(input)
}

/// Aggregated signals and the v1 score for the last day of a history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub mas: f64,
    pub rrs: f64,
    pub plateau_flag: bool,
    pub deficit_streak: u32,
    pub training_load_factor: f64,
    pub z_scores: Vec<MetricZ>,
}

/// Score the latest day of `metrics` using robust z-scores.
///
/// `metrics` may arrive in any order; it is sorted by date before scoring and
/// its last entry is treated as "today". `estimated_tdee` is the fallback
/// expenditure target for days without a recorded one.
pub fn calculate_scores(metrics: &[DailyMetric], estimated_tdee: Option<f64>) -> Scores {
    calculate_scores_with(metrics, estimated_tdee, ZScoreMethod::Robust)
}

pub fn calculate_scores_with(
    metrics: &[DailyMetric],
    estimated_tdee: Option<f64>,
    method: ZScoreMethod,
) -> Scores {
    let ordered = chronological(metrics);

    let index = composite_index_with(&ordered, method);
    let plateau = plateau_flag(&ordered);
    let streak = deficit_streak(&ordered, estimated_tdee);
    let load_factor = training_load_factor(&ordered);

    Scores {
        mas: index.mas,
        rrs: readiness_v1(index.mas, plateau, streak, load_factor),
        plateau_flag: plateau,
        deficit_streak: streak,
        training_load_factor: load_factor,
        z_scores: index.z_scores,
    }
}

/// Borrow the history when it is already sorted, otherwise sort a copy
pub(crate) fn chronological(metrics: &[DailyMetric]) -> Cow<'_, [DailyMetric]> {
    if is_chronological(metrics) {
        Cow::Borrowed(metrics)
    } else {
        let mut sorted = metrics.to_vec();
        sorted.sort_by_key(|m| m.date);
        Cow::Owned(sorted)
    }
}
