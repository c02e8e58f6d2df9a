//! Per-user score recomputation and the refeed recommendation decision
//!
//! Every score depends on rolling windows that end at its own day, so a change
//! to one day invalidates that day and everything after it. Recomputation
//! walks the history in ascending order and scores each day over the prefix
//! that ends there.

use crate::guards::evaluate_guard_flags;
use crate::mas::{MetricZ, ZScoreMethod};
use crate::models::{
    latest_execution_on_or_before, DailyMetric, GuardFlags, MetricKey, RefeedExecution, RefeedTargets,
    ScoreRecord,
};
use crate::readiness::{calculate_scores_with, chronological, Scores};
use crate::refeed::{compute_rrs_v2, RefeedInput};
use crate::targets::{compute_refeed_targets, TargetRequest, DEFAULT_MULTIPLIER};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Readiness at or above which a refeed is recommended
pub const ACTION_THRESHOLD: f64 = 0.65;

/// Recommended refeed length in days
pub const RECOMMENDATION_DURATION_DAYS: u32 = 1;

/// Scoring engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fallback expenditure target for the deficit streak
    pub estimated_tdee: Option<f64>,
    pub z_method: ZScoreMethod,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            estimated_tdee: None,
            z_method: ZScoreMethod::Robust,
        }
    }
}

/// Runs both readiness models over a user's history
#[derive(Debug, Clone, Default)]
pub struct ScoreEngine {
    config: EngineConfig,
}

impl ScoreEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> Self {
        ScoreEngine { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// v1 scores of the last day of `prefix`
    pub fn baseline_scores(&self, prefix: &[DailyMetric]) -> Scores {
        calculate_scores_with(prefix, self.config.estimated_tdee, self.config.z_method)
    }

    /// Full score record for the last day of a chronological `prefix`
    pub fn score_day(&self, prefix: &[DailyMetric], executions: &[RefeedExecution]) -> Option<ScoreRecord> {
        let today = prefix.last()?.date;
        let scores = self.baseline_scores(prefix);
        let execution = latest_execution_on_or_before(executions, today);

        let assessment = compute_rrs_v2(&RefeedInput {
            mas: scores.mas,
            plateau_flag: scores.plateau_flag,
            deficit_streak: scores.deficit_streak,
            training_load_factor: scores.training_load_factor,
            last_refeed_date: execution.map(|e| e.executed_date()),
            effect_window: execution.map(|e| e.window()),
            ..RefeedInput::new(today, prefix)
        });

        trace!(
            date = %today,
            mas = scores.mas,
            rrs = scores.rrs,
            rrs_v2 = assessment.rrs,
            "scored day"
        );

        Some(ScoreRecord {
            date: today,
            mas: scores.mas,
            rrs: scores.rrs,
            rrs_v2: assessment.rrs,
            plateau_flag: scores.plateau_flag,
            deficit_streak: scores.deficit_streak,
            training_load_factor: scores.training_load_factor,
            cooldown: assessment.cooldown,
            response: assessment.response,
            hard_locked: assessment.hard_locked,
            effective_window: assessment.effective_window,
            observed_days: assessment.observed_days,
            display_rrs: assessment.display_rrs,
            effective_rrs: assessment.effective_rrs,
        })
    }

    /// Score every day of a history, each over the prefix ending at it
    pub fn score_history(&self, history: &[DailyMetric], executions: &[RefeedExecution]) -> Vec<ScoreRecord> {
        let ordered = chronological(history);
        (1..=ordered.len())
            .filter_map(|end| self.score_day(&ordered[..end], executions))
            .collect()
    }

    /// Rescore every day on or after `start`
    pub fn recompute_from_date(&self, history: &[DailyMetric], start: NaiveDate) -> Vec<DayScore> {
        let ordered = chronological(history);
        let mut rolling_weight = None;
        let mut results = Vec::new();

        for (index, metric) in ordered.iter().enumerate() {
            if let Some(weight) = metric.value(MetricKey::WeightKg) {
                rolling_weight = Some(weight);
            }
            if metric.date < start {
                continue;
            }

            let prefix = &ordered[..=index];
            results.push(DayScore {
                date: metric.date,
                scores: self.baseline_scores(prefix),
                body_weight_kg: rolling_weight,
                guards: evaluate_guard_flags(Some(metric), prefix),
            });
        }

        results
    }
}

/// One recomputed day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayScore {
    pub date: NaiveDate,
    pub scores: Scores,
    /// Latest weight recorded on or before `date`
    pub body_weight_kg: Option<f64>,
    pub guards: GuardFlags,
}

/// Rescore every day on or after `start` with the default engine
pub fn recompute_from_date(
    history: &[DailyMetric],
    start: NaiveDate,
    estimated_tdee: Option<f64>,
) -> Vec<DayScore> {
    ScoreEngine::with_config(EngineConfig {
        estimated_tdee,
        ..Default::default()
    })
    .recompute_from_date(history, start)
}

/// Context carried with a recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rationale {
    pub mas: f64,
    pub deficit_streak: u32,
    pub training_load_factor: f64,
    pub z_scores: Vec<MetricZ>,
    pub guards: GuardFlags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub date: NaiveDate,
    pub targets: RefeedTargets,
    pub duration_days: u32,
    pub rationale: Rationale,
}

/// What to do with the stored recommendation for a day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecommendationAction {
    Upsert(Recommendation),
    /// Readiness qualifies but targets cannot be computed
    Keep,
    Delete,
}

/// Inputs to [`decide_recommendation`]
#[derive(Debug, Clone)]
pub struct DecisionInput<'a> {
    pub date: NaiveDate,
    pub scores: &'a Scores,
    pub guards: GuardFlags,
    pub estimated_tdee: Option<f64>,
    pub body_weight_kg: Option<f64>,
    pub multiplier: f64,
}

impl<'a> DecisionInput<'a> {
    pub fn from_day(day: &'a DayScore, estimated_tdee: Option<f64>) -> Self {
        DecisionInput {
            date: day.date,
            scores: &day.scores,
            guards: day.guards,
            estimated_tdee,
            body_weight_kg: day.body_weight_kg,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }

    /// Anchor protein to `weight` instead of the weight known on the day
    pub fn with_body_weight(mut self, weight: Option<f64>) -> Self {
        self.body_weight_kg = weight;
        self
    }
}

/// Most recent weight anywhere in `history`, including days after any
/// decision date
pub fn latest_weight(history: &[DailyMetric]) -> Option<f64> {
    history
        .iter()
        .filter_map(|metric| metric.value(MetricKey::WeightKg).map(|weight| (metric.date, weight)))
        .max_by_key(|(date, _)| *date)
        .map(|(_, weight)| weight)
}

/// Decide whether a refeed should be recommended on `input.date`
pub fn decide_recommendation(input: &DecisionInput<'_>) -> RecommendationAction {
    if input.guards.should_suppress() || input.scores.rrs < ACTION_THRESHOLD {
        return RecommendationAction::Delete;
    }

    let request = TargetRequest::new(input.estimated_tdee, input.body_weight_kg).with_multiplier(input.multiplier);
    match compute_refeed_targets(&request) {
        Some(targets) => RecommendationAction::Upsert(Recommendation {
            date: input.date,
            targets,
            duration_days: RECOMMENDATION_DURATION_DAYS,
            rationale: Rationale {
                mas: input.scores.mas,
                deficit_streak: input.scores.deficit_streak,
                training_load_factor: input.scores.training_load_factor,
                z_scores: input.scores.z_scores.clone(),
                guards: input.guards,
            },
        }),
        None => RecommendationAction::Keep,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Days;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 1).unwrap()
    }

    fn history(days: u64) -> Vec<DailyMetric> {
        (0..days)
            .map(|i| {
                DailyMetric::new(start() + Days::new(i))
                    .with(MetricKey::WeightKg, 70.0)
                    .with(MetricKey::TempC, 36.5)
                    .with(MetricKey::RhrBpm, 55.0)
                    .with(MetricKey::CalorieIntakeKcal, 1800.0)
                    .with(MetricKey::EnergyExpenditureKcal, 2400.0)
                    .with(MetricKey::TrainingLoad, 300.0)
            })
            .collect()
    }

    fn qualifying_scores() -> Scores {
        Scores {
            mas: 0.4,
            rrs: 0.8,
            plateau_flag: true,
            deficit_streak: 14,
            training_load_factor: 0.5,
            z_scores: Vec::new(),
        }
    }

    #[test]
    fn test_score_history_is_causal() {
        let data = history(20);
        let engine = ScoreEngine::new();
        let records = engine.score_history(&data, &[]);
        assert_eq!(records.len(), 20);

        // Appending a day never changes earlier scores
        let mut extended = data.clone();
        extended.push(
            DailyMetric::new(start() + Days::new(20))
                .with(MetricKey::RhrBpm, 70.0)
                .with(MetricKey::TempC, 35.9),
        );
        let longer = engine.score_history(&extended, &[]);
        assert_eq!(&longer[..20], &records[..]);
        assert!(longer[20].mas > records[19].mas);
    }

    #[test]
    fn test_score_day_applies_latest_execution() {
        let data = history(20);
        let executions = vec![
            RefeedExecution::on(start() + Days::new(5)),
            RefeedExecution::on(start() + Days::new(18)),
        ];
        let engine = ScoreEngine::new();
        let records = engine.score_history(&data, &executions);

        // Day 19 is one day after the second refeed
        let last = records.last().unwrap();
        assert!(last.hard_locked);
        assert_eq!(last.rrs_v2, 0.0);

        // Day 14 is nine days after the first refeed
        assert_eq!(records[14].cooldown, 0.0);
        assert!(!records[14].hard_locked);

        // Before any execution there is no cooldown
        assert_eq!(records[2].cooldown, 0.0);
        assert_eq!(records[2].observed_days, 0);
    }

    #[test]
    fn test_recompute_from_date_only_emits_later_days() {
        let mut data = history(10);
        data[8].weight_kg = None;
        data[9].weight_kg = None;
        data[7].weight_kg = Some(69.4);

        let days = recompute_from_date(&data, start() + Days::new(6), None);
        assert_eq!(days.len(), 4);
        assert_eq!(days[0].date, start() + Days::new(6));
        assert_eq!(days[3].body_weight_kg, Some(69.4));
        assert_eq!(days[3].scores.deficit_streak, 10);
    }

    #[test]
    fn test_recompute_matches_full_history_scores() {
        let data = history(15);
        let engine = ScoreEngine::new();
        let full = engine.score_history(&data, &[]);
        let partial = engine.recompute_from_date(&data, start() + Days::new(10));
        for day in &partial {
            let record = full.iter().find(|r| r.date == day.date).unwrap();
            assert_eq!(record.rrs, day.scores.rrs);
            assert_eq!(record.mas, day.scores.mas);
        }
    }

    #[test]
    fn test_decide_recommendation_upserts_targets() {
        let scores = qualifying_scores();
        let input = DecisionInput {
            date: start(),
            scores: &scores,
            guards: GuardFlags::default(),
            estimated_tdee: Some(2200.0),
            body_weight_kg: Some(68.0),
            multiplier: 0.25,
        };

        match decide_recommendation(&input) {
            RecommendationAction::Upsert(rec) => {
                assert_eq!(rec.targets.kcal_total, 2750);
                assert_eq!(rec.duration_days, 1);
                assert_eq!(rec.rationale.deficit_streak, 14);
            }
            other => panic!("expected upsert, got {:?}", other),
        }
    }

    #[test]
    fn test_decide_recommendation_suppression_and_threshold() {
        let scores = qualifying_scores();
        let mut input = DecisionInput {
            date: start(),
            scores: &scores,
            guards: GuardFlags {
                fever_like: true,
                acute_weight_gain: false,
            },
            estimated_tdee: Some(2200.0),
            body_weight_kg: None,
            multiplier: DEFAULT_MULTIPLIER,
        };
        assert_eq!(decide_recommendation(&input), RecommendationAction::Delete);

        input.guards = GuardFlags::default();
        input.estimated_tdee = None;
        assert_eq!(decide_recommendation(&input), RecommendationAction::Keep);

        let low = Scores {
            rrs: ACTION_THRESHOLD - 1e-9,
            ..qualifying_scores()
        };
        input.scores = &low;
        input.estimated_tdee = Some(2200.0);
        assert_eq!(decide_recommendation(&input), RecommendationAction::Delete);
    }

    #[test]
    fn test_backfilled_day_uses_latest_weight_for_targets() {
        let mut data = history(10);
        for metric in &mut data[2..] {
            metric.weight_kg = None;
        }
        data[8].weight_kg = Some(71.0);
        assert_eq!(latest_weight(&data), Some(71.0));
        assert_eq!(latest_weight(&data[..5]), Some(70.0));
        assert_eq!(latest_weight(&[]), None);

        // Deciding for day 4 while day 8 already holds a newer weight
        let day = recompute_from_date(&data, start() + Days::new(4), Some(2200.0)).remove(0);
        assert_eq!(day.body_weight_kg, Some(70.0));

        let scores = qualifying_scores();
        let day = DayScore { scores, ..day };
        let input = DecisionInput::from_day(&day, Some(2200.0)).with_body_weight(latest_weight(&data));
        assert_eq!(input.body_weight_kg, Some(71.0));
        match decide_recommendation(&input) {
            RecommendationAction::Upsert(rec) => assert_eq!(rec.targets.protein_g, 142),
            other => panic!("expected upsert, got {:?}", other),
        }
    }
}
