//! Refeed-day macronutrient targets
//!
//! The refeed adds a surplus on top of maintenance. Most of the surplus goes
//! to carbohydrate, protein is anchored to body weight and fat takes what is
//! left, with a floor of 10% of the day's calories.

use crate::models::RefeedTargets;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MULTIPLIER: f64 = 0.2;

/// Share of the surplus calories allotted to carbohydrate
pub const SURPLUS_CARB_SHARE: f64 = 0.8;

/// Protein per kg of body weight
pub const PROTEIN_G_PER_KG: f64 = 2.0;

/// Share of maintenance calories used for protein when weight is unknown
pub const FALLBACK_PROTEIN_SHARE: f64 = 0.25;

/// Minimum share of total calories left for fat
pub const MIN_FAT_SHARE: f64 = 0.1;

pub const KCAL_PER_G_CARB: f64 = 4.0;
pub const KCAL_PER_G_PROTEIN: f64 = 4.0;
pub const KCAL_PER_G_FAT: f64 = 9.0;

/// Inputs of the target calculation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetRequest {
    pub estimated_tdee: Option<f64>,
    pub body_weight_kg: Option<f64>,
    /// Surplus over maintenance as a fraction
    pub multiplier: f64,
}

impl Default for TargetRequest {
    fn default() -> Self {
        TargetRequest {
            estimated_tdee: None,
            body_weight_kg: None,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

impl TargetRequest {
    pub fn new(estimated_tdee: Option<f64>, body_weight_kg: Option<f64>) -> Self {
        TargetRequest {
            estimated_tdee,
            body_weight_kg,
            ..Default::default()
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }
}

/// Nearest integer with halves rounded toward positive infinity
pub fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

/// Compute macro targets; `None` without a usable maintenance estimate
pub fn compute_refeed_targets(request: &TargetRequest) -> Option<RefeedTargets> {
    let tdee = request
        .estimated_tdee
        .filter(|v| v.is_finite() && *v != 0.0)?;

    let total_kcal = round_half_up(tdee * (1.0 + request.multiplier));
    let extra_kcal = total_kcal - tdee;
    let carb_kcal_budget = round_half_up(extra_kcal * SURPLUS_CARB_SHARE);
    let carb_g = round_half_up(carb_kcal_budget / KCAL_PER_G_CARB);

    let protein_g = match request.body_weight_kg {
        Some(weight) if weight.is_finite() && weight > 0.0 => round_half_up(weight * PROTEIN_G_PER_KG),
        _ => round_half_up(tdee * FALLBACK_PROTEIN_SHARE / KCAL_PER_G_PROTEIN),
    };

    let remaining_kcal = (total_kcal - protein_g * KCAL_PER_G_PROTEIN - carb_g * KCAL_PER_G_CARB)
        .max(round_half_up(total_kcal * MIN_FAT_SHARE));
    let fat_g = round_half_up(remaining_kcal / KCAL_PER_G_FAT);

    Some(RefeedTargets {
        kcal_total: total_kcal as i64,
        carb_g: carb_g as i64,
        protein_g: protein_g as i64,
        fat_g: fat_g as i64,
    })
}
