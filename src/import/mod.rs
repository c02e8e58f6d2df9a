//! Loading of metric histories and refeed executions
//!
//! Importers are lenient about numbers and strict about dates: an empty,
//! unparsable or non-finite numeric cell simply becomes an absent value,
//! while a malformed date rejects the whole file.

use crate::error::{ImportExportError, RefeedError, Result};
use crate::models::{DailyMetric, RefeedExecution};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod csv;

/// A daily metric row tagged with its owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMetric {
    pub user_id: String,
    pub auth_uid: Option<String>,
    pub metric: DailyMetric,
}

/// An executed refeed tagged with its owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserExecution {
    pub user_id: String,
    pub execution: RefeedExecution,
}

/// Lenient numeric cell parsing
pub fn parse_number(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a `YYYY-MM-DD` date, also accepting a timestamp whose first ten
/// characters are one
pub fn parse_day(cell: &str) -> Option<NaiveDate> {
    let trimmed = cell.trim();
    let day = trimmed.get(..10)?;
    if trimmed.len() > 10 && !trimmed[10..].starts_with(['T', ' ']) {
        return None;
    }
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

pub(crate) fn ensure_exists(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(RefeedError::ImportExport(ImportExportError::FileNotFound {
            path: path.to_path_buf(),
        }))
    }
}
