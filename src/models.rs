//! Core data types shared by the scoring pipeline, the recompute drivers and
//! the persistence layers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric fields carried by a daily metric record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKey {
    WeightKg,
    RhrBpm,
    TempC,
    HrvMs,
    SleepMin,
    #[serde(rename = "fatigue_1_5")]
    Fatigue,
    TrainingLoad,
    CalorieIntakeKcal,
    EnergyExpenditureKcal,
}

impl MetricKey {
    /// Every numeric field, in storage/CSV column order
    pub const ALL: [MetricKey; 9] = [
        MetricKey::WeightKg,
        MetricKey::RhrBpm,
        MetricKey::TempC,
        MetricKey::HrvMs,
        MetricKey::SleepMin,
        MetricKey::Fatigue,
        MetricKey::TrainingLoad,
        MetricKey::CalorieIntakeKcal,
        MetricKey::EnergyExpenditureKcal,
    ];

    /// Column name used by the metric store and CSV files
    pub fn column(&self) -> &'static str {
        match self {
            MetricKey::WeightKg => "weight_kg",
            MetricKey::RhrBpm => "rhr_bpm",
            MetricKey::TempC => "temp_c",
            MetricKey::HrvMs => "hrv_ms",
            MetricKey::SleepMin => "sleep_min",
            MetricKey::Fatigue => "fatigue_1_5",
            MetricKey::TrainingLoad => "training_load",
            MetricKey::CalorieIntakeKcal => "calorie_intake_kcal",
            MetricKey::EnergyExpenditureKcal => "energy_expenditure_kcal",
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.column())
    }
}

/// One user's biometrics for one calendar day.
///
/// Every numeric field is optional. A value that is present but not finite is
/// treated exactly like an absent one by [`DailyMetric::value`], which is the
/// only accessor the scoring code uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetric {
    /// Calendar day; the sole ordering key within a user's history
    pub date: NaiveDate,
    pub weight_kg: Option<f64>,
    pub rhr_bpm: Option<f64>,
    pub temp_c: Option<f64>,
    pub hrv_ms: Option<f64>,
    pub sleep_min: Option<f64>,
    /// Subjective fatigue on a 1-5 scale
    pub fatigue_1_5: Option<f64>,
    pub training_load: Option<f64>,
    pub calorie_intake_kcal: Option<f64>,
    pub energy_expenditure_kcal: Option<f64>,
}

impl DailyMetric {
    /// Create an empty record for a date
    pub fn new(date: NaiveDate) -> Self {
        DailyMetric {
            date,
            weight_kg: None,
            rhr_bpm: None,
            temp_c: None,
            hrv_ms: None,
            sleep_min: None,
            fatigue_1_5: None,
            training_load: None,
            calorie_intake_kcal: None,
            energy_expenditure_kcal: None,
        }
    }

    /// Builder-style setter
    pub fn with(mut self, key: MetricKey, value: f64) -> Self {
        self.set(key, Some(value));
        self
    }

    /// Raw stored value, including non-finite ones
    pub fn raw(&self, key: MetricKey) -> Option<f64> {
        match key {
            MetricKey::WeightKg => self.weight_kg,
            MetricKey::RhrBpm => self.rhr_bpm,
            MetricKey::TempC => self.temp_c,
            MetricKey::HrvMs => self.hrv_ms,
            MetricKey::SleepMin => self.sleep_min,
            MetricKey::Fatigue => self.fatigue_1_5,
            MetricKey::TrainingLoad => self.training_load,
            MetricKey::CalorieIntakeKcal => self.calorie_intake_kcal,
            MetricKey::EnergyExpenditureKcal => self.energy_expenditure_kcal,
        }
    }

    /// Usable value for a field: `None` when absent or not finite
    pub fn value(&self, key: MetricKey) -> Option<f64> {
        self.raw(key).filter(|v| v.is_finite())
    }

    pub fn set(&mut self, key: MetricKey, value: Option<f64>) {
        let slot = match key {
            MetricKey::WeightKg => &mut self.weight_kg,
            MetricKey::RhrBpm => &mut self.rhr_bpm,
            MetricKey::TempC => &mut self.temp_c,
            MetricKey::HrvMs => &mut self.hrv_ms,
            MetricKey::SleepMin => &mut self.sleep_min,
            MetricKey::Fatigue => &mut self.fatigue_1_5,
            MetricKey::TrainingLoad => &mut self.training_load,
            MetricKey::CalorieIntakeKcal => &mut self.calorie_intake_kcal,
            MetricKey::EnergyExpenditureKcal => &mut self.energy_expenditure_kcal,
        };
        *slot = value;
    }
}

/// Return `true` when the history is in ascending date order
pub fn is_chronological(history: &[DailyMetric]) -> bool {
    history.windows(2).all(|pair| pair[0].date <= pair[1].date)
}

/// Insert or replace the record for `metric.date`, keeping the history sorted
pub fn upsert_metric(history: &mut Vec<DailyMetric>, metric: DailyMetric) {
    match history.binary_search_by_key(&metric.date, |m| m.date) {
        Ok(index) => history[index] = metric,
        Err(index) => history.insert(index, metric),
    }
}

/// Usable values of one field across a history, oldest first
pub fn values_of(history: &[DailyMetric], key: MetricKey) -> Vec<f64> {
    history.iter().filter_map(|m| m.value(key)).collect()
}

/// Default number of days a refeed keeps influencing readiness
pub const DEFAULT_EFFECT_WINDOW_DAYS: u32 = 9;

/// A refeed recommendation the user marked as executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefeedExecution {
    /// Date of the recommendation
    pub date: NaiveDate,
    /// Day the refeed was actually executed, if it differs from `date`
    pub executed_at: Option<NaiveDate>,
    /// Per-event override of the effect window in days
    pub effect_window: Option<u32>,
}

impl RefeedExecution {
    pub fn on(date: NaiveDate) -> Self {
        RefeedExecution {
            date,
            executed_at: None,
            effect_window: None,
        }
    }

    /// Day the refeed happened
    pub fn executed_date(&self) -> NaiveDate {
        self.executed_at.unwrap_or(self.date)
    }

    /// Effect window in days, falling back to the default
    pub fn window(&self) -> u32 {
        self.effect_window.unwrap_or(DEFAULT_EFFECT_WINDOW_DAYS)
    }
}

/// Most recent execution that happened on or before `today`
pub fn latest_execution_on_or_before(
    executions: &[RefeedExecution],
    today: NaiveDate,
) -> Option<&RefeedExecution> {
    executions
        .iter()
        .filter(|e| e.executed_date() <= today)
        .max_by_key(|e| e.executed_date())
}

/// Full output of the scoring pipeline for one user and one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub date: NaiveDate,

    /// Composite metabolic adaptation index in [-3, 3]
    pub mas: f64,

    /// Baseline readiness (v1) in (0, 1)
    pub rrs: f64,

    /// Refeed-aware readiness (v2) in [0, 1]
    pub rrs_v2: f64,

    pub plateau_flag: bool,
    pub deficit_streak: u32,

    /// Normalized recent training load in [0, 1]
    pub training_load_factor: f64,

    /// Residual refeed cooldown in [0, 1]
    pub cooldown: f64,

    /// Measured physiological refeed response in [-0.5, 0.5]
    pub response: f64,

    pub hard_locked: bool,

    /// Refeed effect window in days after any measurement-latency extension
    pub effective_window: u32,

    /// Post-refeed days with data used to measure the response
    pub observed_days: u32,

    /// v2 readiness capped below the action threshold while cooling down
    pub display_rrs: f64,

    /// v2 readiness with the heavier cooldown penalty applied
    pub effective_rrs: f64,
}

/// Macronutrient targets for a refeed day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefeedTargets {
    pub kcal_total: i64,
    pub carb_g: i64,
    pub protein_g: i64,
    pub fat_g: i64,
}

/// Safety conditions that suppress a refeed recommendation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardFlags {
    /// Latest temperature at or above the fever threshold
    pub fever_like: bool,
    /// Weight rose sharply over the last three observations
    pub acute_weight_gain: bool,
}

impl GuardFlags {
    pub fn should_suppress(&self) -> bool {
        self.fever_like || self.acute_weight_gain
    }
}
