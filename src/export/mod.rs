//! Score export: the CSV snapshot and JSON score rows
//!
//! Fixed-point formatting rounds the exact binary value of an `f64` half away
//! from zero, so `1.005` (stored as 1.00499999999999989...) formats as `1.00`
//! at two places while `0.5` formats as `1` at zero places.

use crate::error::{ImportExportError, RefeedError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod csv;
pub mod json;

/// Export format types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl std::str::FromStr for ExportFormat {
    type Err = RefeedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            _ => Err(RefeedError::Validation(format!("Unsupported export format: {}", s))),
        }
    }
}

impl ExportFormat {
    /// Guess the format from a file extension, defaulting to CSV
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ExportFormat::Json,
            _ => ExportFormat::Csv,
        }
    }
}

/// Format `value` with exactly `decimals` fractional digits; `None` when the
/// value is not finite.
///
/// The sign follows the input rather than the rounded digits: a negative value
/// that rounds to zero keeps its `-`, and `-0.0` prints without one.
pub fn fixed(value: f64, decimals: u32) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    let magnitude = value.abs();
    let digits = match Decimal::from_f64_retain(magnitude) {
        Some(exact) => {
            let mut rounded = exact.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero);
            rounded.rescale(decimals);
            rounded.to_string()
        }
        // Beyond Decimal's range there are no fractional digits left to round
        None => format!("{:.*}", decimals as usize, magnitude),
    };
    let sign = if value < 0.0 { "-" } else { "" };
    Some(format!("{}{}", sign, digits))
}

/// Round to `decimals` places the same way [`fixed`] formats
pub fn round_dp(value: f64, decimals: u32) -> Option<f64> {
    fixed(value, decimals).and_then(|s| s.parse().ok())
}

/// Map a path-level IO failure to an export error
pub(crate) fn export_failed(path: &Path, err: impl std::fmt::Display) -> RefeedError {
    RefeedError::ImportExport(ImportExportError::ExportFailed {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}
