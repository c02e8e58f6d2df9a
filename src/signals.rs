//! Behavioral signal detectors: weight plateau, caloric deficit streak and
//! recent training load.
//!
//! Each detector is causal: it only looks at the history it is given, which
//! ends at the day being scored.

use crate::models::{values_of, DailyMetric, MetricKey};
use crate::stats::{clamp, mean};
use serde::{Deserialize, Serialize};

/// Observations used for the slope fit and for each weekly average
pub const PLATEAU_WINDOW: usize = 7;

/// Observations needed before the week-over-week comparison is defined
pub const WEEKLY_COMPARISON_POINTS: usize = 14;

/// Minimum daily slope, as a fraction of average weight, to count as flat
pub const PLATEAU_SLOPE_THRESHOLD: f64 = -0.0002;

/// Week-over-week drop in percent that must be exceeded to count as flat
pub const PLATEAU_WEEKLY_DROP_THRESHOLD: f64 = -0.5;

/// Daily deficit that must be exceeded for a day to extend the streak
pub const DEFICIT_THRESHOLD_KCAL: f64 = 300.0;

/// Training-load observations averaged for the load factor
pub const TRAINING_LOAD_WINDOW: usize = 7;

/// Average load that maps to a factor of 1
pub const TRAINING_LOAD_NORMALIZER: f64 = 500.0;

/// Closed-form ordinary least squares slope; 0 for a degenerate design
pub fn least_squares_slope(points: &[(f64, f64)]) -> f64 {
    let n = points.len() as f64;
    let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
    let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
    let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();
    let sum_x2: f64 = points.iter().map(|(x, _)| x.powi(2)).sum();

    let denominator = n * sum_x2 - sum_x.powi(2);
    if denominator == 0.0 {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denominator
}

/// Intermediate values of the plateau test
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlateauAnalysis {
    /// OLS slope of the last seven weights, kg per observation
    pub slope_kg_per_day: f64,
    /// Slope as a fraction of the seven-observation average weight
    pub slope_fraction_per_day: f64,
    /// Percent change between the previous and the latest seven-observation
    /// averages; `-inf` when fewer than fourteen observations exist
    pub weekly_drop_percent: f64,
    pub plateau: bool,
}

/// Run the plateau test; `None` with fewer than seven weight observations
pub fn analyze_plateau(history: &[DailyMetric]) -> Option<PlateauAnalysis> {
    let weights = values_of(history, MetricKey::WeightKg);
    if weights.len() < PLATEAU_WINDOW {
        return None;
    }

    let last_week = &weights[weights.len() - PLATEAU_WINDOW..];
    let points: Vec<(f64, f64)> = last_week
        .iter()
        .enumerate()
        .map(|(i, w)| (i as f64, *w))
        .collect();
    let slope = least_squares_slope(&points);
    let current_avg = mean(last_week).unwrap_or(0.0);
    let slope_fraction = if current_avg > 0.0 {
        slope / current_avg
    } else {
        0.0
    };

    let mut weekly_drop_percent = f64::NEG_INFINITY;
    if weights.len() >= WEEKLY_COMPARISON_POINTS {
        let previous = &weights[weights.len() - WEEKLY_COMPARISON_POINTS..weights.len() - PLATEAU_WINDOW];
        let previous_avg = mean(previous).unwrap_or(0.0);
        if previous_avg > 0.0 {
            weekly_drop_percent = ((previous_avg - current_avg) / previous_avg) * 100.0;
        }
    }

    let plateau = slope_fraction >= PLATEAU_SLOPE_THRESHOLD
        && weekly_drop_percent > PLATEAU_WEEKLY_DROP_THRESHOLD;

    Some(PlateauAnalysis {
        slope_kg_per_day: slope,
        slope_fraction_per_day: slope_fraction,
        weekly_drop_percent,
        plateau,
    })
}

/// Whether weight loss has stalled.
///
/// Needs at least 14 weight observations to ever be `true`: with fewer, the
/// week-over-week drop is undefined (`-inf`) and the test fails.
pub fn plateau_flag(history: &[DailyMetric]) -> bool {
    analyze_plateau(history).is_some_and(|a| a.plateau)
}

/// Consecutive days, ending at the latest one, with a deficit above 300 kcal.
///
/// A day's target is its recorded expenditure, falling back to
/// `estimated_tdee`. The streak stops at the first day whose target or intake
/// is missing or zero, or whose deficit does not exceed the threshold.
pub fn deficit_streak(history: &[DailyMetric], estimated_tdee: Option<f64>) -> u32 {
    let fallback = estimated_tdee.filter(|v| v.is_finite());
    let mut streak = 0;

    for metric in history.iter().rev() {
        let target = metric
            .value(MetricKey::EnergyExpenditureKcal)
            .or(fallback)
            .filter(|v| *v != 0.0);
        let intake = metric
            .value(MetricKey::CalorieIntakeKcal)
            .filter(|v| *v != 0.0);

        let (Some(target), Some(intake)) = (target, intake) else {
            break;
        };
        if target - intake > DEFICIT_THRESHOLD_KCAL {
            streak += 1;
        } else {
            break;
        }
    }

    streak
}

/// Average of the most recent seven recorded training loads, divided by 500
/// and clamped to [0, 1]; 0 when no load was ever recorded
pub fn training_load_factor(history: &[DailyMetric]) -> f64 {
    let recent: Vec<f64> = history
        .iter()
        .rev()
        .filter_map(|m| m.value(MetricKey::TrainingLoad))
        .take(TRAINING_LOAD_WINDOW)
        .collect();

    match mean(&recent) {
        Some(average) => clamp(average / TRAINING_LOAD_NORMALIZER, 0.0, 1.0),
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Days, NaiveDate};

    fn weights(values: &[f64]) -> Vec<DailyMetric> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, w)| DailyMetric::new(start + Days::new(i as u64)).with(MetricKey::WeightKg, *w))
            .collect()
    }

    fn energy(days: &[(Option<f64>, Option<f64>)]) -> Vec<DailyMetric> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        days.iter()
            .enumerate()
            .map(|(i, (intake, expenditure))| {
                let mut m = DailyMetric::new(start + Days::new(i as u64));
                m.calorie_intake_kcal = *intake;
                m.energy_expenditure_kcal = *expenditure;
                m
            })
            .collect()
    }

    #[test]
    fn test_least_squares_slope() {
        let points: Vec<(f64, f64)> = (0..7).map(|i| (i as f64, 2.0 * i as f64 + 1.0)).collect();
        assert!((least_squares_slope(&points) - 2.0).abs() < 1e-12);
        assert_eq!(least_squares_slope(&[(1.0, 5.0)]), 0.0);
        assert_eq!(least_squares_slope(&[]), 0.0);
    }

    #[test]
    fn test_plateau_requires_fourteen_points() {
        for n in 7..14 {
            let flat = weights(&vec![70.0; n]);
            assert!(!plateau_flag(&flat), "flat series of {} points", n);
            let analysis = analyze_plateau(&flat).unwrap();
            assert_eq!(analysis.weekly_drop_percent, f64::NEG_INFINITY);
        }
        assert!(analyze_plateau(&weights(&[70.0; 6])).is_none());
        assert!(plateau_flag(&weights(&[70.0; 14])));
    }

    #[test]
    fn test_plateau_detects_stall_after_loss() {
        let mut series: Vec<f64> = (0..21).map(|i| 70.0 - i as f64 * 0.1).collect();
        series.extend((0..7).map(|i| 67.9 + i as f64 * 0.01));
        assert!(plateau_flag(&weights(&series)));
    }

    #[test]
    fn test_no_plateau_while_losing() {
        let series: Vec<f64> = (0..21).map(|i| 75.0 - i as f64 * 0.1).collect();
        let analysis = analyze_plateau(&weights(&series)).unwrap();
        assert!(analysis.slope_fraction_per_day < PLATEAU_SLOPE_THRESHOLD);
        assert!(!analysis.plateau);
    }

    #[test]
    fn test_weight_gain_week_is_not_a_plateau() {
        let mut series = vec![70.0; 7];
        series.extend(vec![71.0; 7]);
        let analysis = analyze_plateau(&weights(&series)).unwrap();
        assert!(analysis.weekly_drop_percent < PLATEAU_WEEKLY_DROP_THRESHOLD);
        assert!(!analysis.plateau);
    }

    #[test]
    fn test_plateau_skips_missing_weights() {
        let mut history = weights(&[70.0; 14]);
        let start = history.last().unwrap().date;
        history.push(DailyMetric::new(start + Days::new(1)));
        assert!(plateau_flag(&history));
    }

    #[test]
    fn test_deficit_streak_counts_from_latest() {
        let history = energy(&[
            (Some(2300.0), Some(2400.0)),
            (Some(2000.0), Some(2400.0)),
            (Some(2000.0), Some(2400.0)),
            (Some(1900.0), Some(2400.0)),
        ]);
        assert_eq!(deficit_streak(&history, None), 3);
    }

    #[test]
    fn test_deficit_streak_resets_on_missing_data() {
        let history = energy(&[
            (Some(2000.0), Some(2400.0)),
            (Some(2000.0), Some(2400.0)),
            (None, Some(2400.0)),
            (Some(2000.0), Some(2400.0)),
        ]);
        assert_eq!(deficit_streak(&history, None), 1);

        let history = energy(&[(Some(2000.0), Some(2400.0)), (Some(2000.0), None)]);
        assert_eq!(deficit_streak(&history, None), 0);
    }

    #[test]
    fn test_deficit_streak_threshold_is_exclusive() {
        let history = energy(&[(Some(2100.0), Some(2400.0))]);
        assert_eq!(deficit_streak(&history, None), 0);
        let history = energy(&[(Some(2099.0), Some(2400.0))]);
        assert_eq!(deficit_streak(&history, None), 1);
    }

    #[test]
    fn test_deficit_streak_falls_back_to_estimated_tdee() {
        let history = energy(&[(Some(1900.0), None), (Some(1900.0), Some(2400.0))]);
        assert_eq!(deficit_streak(&history, Some(2300.0)), 2);
        assert_eq!(deficit_streak(&history, None), 1);
        assert_eq!(deficit_streak(&history, Some(f64::NAN)), 1);
    }

    #[test]
    fn test_deficit_streak_zero_intake_is_missing() {
        let history = energy(&[(Some(2000.0), Some(2400.0)), (Some(0.0), Some(2400.0))]);
        assert_eq!(deficit_streak(&history, None), 0);
    }

    #[test]
    fn test_training_load_factor() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut history: Vec<DailyMetric> = (0..10)
            .map(|i| {
                let m = DailyMetric::new(start + Days::new(i));
                if i < 3 {
                    m.with(MetricKey::TrainingLoad, 1000.0)
                } else {
                    m.with(MetricKey::TrainingLoad, 100.0)
                }
            })
            .collect();
        assert!((training_load_factor(&history) - 0.2).abs() < 1e-12);

        // Gaps are skipped rather than counted as zero
        history.push(DailyMetric::new(start + Days::new(10)));
        assert!((training_load_factor(&history) - 0.2).abs() < 1e-12);

        history.push(DailyMetric::new(start + Days::new(11)).with(MetricKey::TrainingLoad, 5000.0));
        assert_eq!(training_load_factor(&history), 1.0);

        assert_eq!(training_load_factor(&[]), 0.0);
        assert_eq!(
            training_load_factor(&[DailyMetric::new(start).with(MetricKey::TrainingLoad, -50.0)]),
            0.0
        );
    }
}
