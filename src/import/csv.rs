use super::{ensure_exists, parse_day, parse_number, UserExecution, UserMetric};
use crate::error::{ImportExportError, RefeedError, Result};
use crate::models::{DailyMetric, MetricKey, RefeedExecution};
use ::csv::{ReaderBuilder, StringRecord};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

const METRICS_FORMAT: &str = "metrics CSV";
const EXECUTIONS_FORMAT: &str = "executions CSV";

/// Reads metric and execution CSV files with flexible column names
pub struct CsvImporter {
    column_mapping: HashMap<String, String>,
}

impl Default for CsvImporter {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvImporter {
    pub fn new() -> Self {
        let mut column_mapping = HashMap::new();

        Self::add_mapping(&mut column_mapping, "user_id", &["user_id", "user", "uid"]);
        Self::add_mapping(&mut column_mapping, "auth_uid", &["auth_uid", "auth_id"]);
        Self::add_mapping(&mut column_mapping, "date", &["date", "day"]);
        Self::add_mapping(&mut column_mapping, "weight_kg", &["weight_kg", "weight", "body_weight"]);
        Self::add_mapping(&mut column_mapping, "rhr_bpm", &["rhr_bpm", "rhr", "resting_hr", "resting_heart_rate"]);
        Self::add_mapping(&mut column_mapping, "temp_c", &["temp_c", "temp", "temperature", "body_temp"]);
        Self::add_mapping(&mut column_mapping, "hrv_ms", &["hrv_ms", "hrv", "rmssd"]);
        Self::add_mapping(&mut column_mapping, "sleep_min", &["sleep_min", "sleep", "sleep_minutes"]);
        Self::add_mapping(&mut column_mapping, "fatigue_1_5", &["fatigue_1_5", "fatigue"]);
        Self::add_mapping(&mut column_mapping, "training_load", &["training_load", "load"]);
        Self::add_mapping(
            &mut column_mapping,
            "calorie_intake_kcal",
            &["calorie_intake_kcal", "intake_kcal", "calories_in"],
        );
        Self::add_mapping(
            &mut column_mapping,
            "energy_expenditure_kcal",
            &["energy_expenditure_kcal", "expenditure_kcal", "tdee", "calories_out"],
        );
        Self::add_mapping(&mut column_mapping, "executed_at", &["executed_at", "executed_on"]);
        Self::add_mapping(&mut column_mapping, "executed", &["executed"]);
        Self::add_mapping(
            &mut column_mapping,
            "refeed_effect_window",
            &["refeed_effect_window", "effect_window", "window"],
        );

        Self { column_mapping }
    }

    fn add_mapping(mapping: &mut HashMap<String, String>, standard: &str, variations: &[&str]) {
        for variation in variations {
            mapping.insert(variation.to_lowercase(), standard.to_string());
        }
    }

    fn normalize_column_name(&self, name: &str) -> String {
        let normalized = name.trim().to_lowercase().replace([' ', '-'], "_");

        self.column_mapping
            .get(&normalized)
            .cloned()
            .unwrap_or(normalized)
    }

    /// Standard column name to index
    fn column_index(&self, headers: &StringRecord) -> HashMap<String, usize> {
        headers
            .iter()
            .enumerate()
            .map(|(i, name)| (self.normalize_column_name(name), i))
            .collect()
    }

    pub fn import_metrics(&self, path: &Path) -> Result<Vec<UserMetric>> {
        ensure_exists(path)?;
        let rows = self.read_metrics(File::open(path)?)?;
        info!("Imported {} metric rows from {}", rows.len(), path.display());
        Ok(rows)
    }

    pub fn read_metrics<R: Read>(&self, reader: R) -> Result<Vec<UserMetric>> {
        let mut csv_reader = ReaderBuilder::new().has_headers(true).flexible(true).from_reader(reader);
        let columns = self.column_index(csv_reader.headers()?);
        require(&columns, &["user_id", "date"], METRICS_FORMAT)?;

        let mut rows = Vec::new();
        for result in csv_reader.records() {
            let record = result?;
            let line = line_of(&record);
            let field = |name: &str| cell(&record, &columns, name);

            let user_id = field("user_id").trim();
            if user_id.is_empty() {
                return Err(parse_error(METRICS_FORMAT, line, "missing user_id"));
            }
            let date = parse_day(field("date"))
                .ok_or_else(|| parse_error(METRICS_FORMAT, line, &format!("invalid date '{}'", field("date"))))?;

            let mut metric = DailyMetric::new(date);
            for key in MetricKey::ALL {
                metric.set(key, parse_number(field(key.column())));
            }

            let auth_uid = Some(field("auth_uid").trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            rows.push(UserMetric {
                user_id: user_id.to_string(),
                auth_uid,
                metric,
            });
        }

        debug!("Parsed {} metric rows", rows.len());
        Ok(rows)
    }

    pub fn import_executions(&self, path: &Path) -> Result<Vec<UserExecution>> {
        ensure_exists(path)?;
        let rows = self.read_executions(File::open(path)?)?;
        info!("Imported {} refeed executions from {}", rows.len(), path.display());
        Ok(rows)
    }

    /// Rows with an `executed` column that is not truthy are skipped
    pub fn read_executions<R: Read>(&self, reader: R) -> Result<Vec<UserExecution>> {
        let mut csv_reader = ReaderBuilder::new().has_headers(true).flexible(true).from_reader(reader);
        let columns = self.column_index(csv_reader.headers()?);
        require(&columns, &["user_id", "date"], EXECUTIONS_FORMAT)?;

        let mut rows = Vec::new();
        for result in csv_reader.records() {
            let record = result?;
            let line = line_of(&record);
            let field = |name: &str| cell(&record, &columns, name);

            if columns.contains_key("executed") && !is_truthy(field("executed")) {
                continue;
            }

            let user_id = field("user_id").trim();
            if user_id.is_empty() {
                return Err(parse_error(EXECUTIONS_FORMAT, line, "missing user_id"));
            }
            let date = parse_day(field("date")).ok_or_else(|| {
                parse_error(EXECUTIONS_FORMAT, line, &format!("invalid date '{}'", field("date")))
            })?;

            let executed_cell = field("executed_at").trim();
            let executed_at = if executed_cell.is_empty() {
                None
            } else {
                Some(parse_day(executed_cell).ok_or_else(|| {
                    parse_error(EXECUTIONS_FORMAT, line, &format!("invalid executed_at '{}'", executed_cell))
                })?)
            };

            let effect_window = parse_number(field("refeed_effect_window"))
                .filter(|w| *w >= 0.0 && w.fract() == 0.0 && *w <= u32::MAX as f64)
                .map(|w| w as u32);

            rows.push(UserExecution {
                user_id: user_id.to_string(),
                execution: RefeedExecution {
                    date,
                    executed_at,
                    effect_window,
                },
            });
        }

        Ok(rows)
    }
}

fn cell<'r>(record: &'r StringRecord, columns: &HashMap<String, usize>, name: &str) -> &'r str {
    columns.get(name).and_then(|&i| record.get(i)).unwrap_or("")
}

fn is_truthy(cell: &str) -> bool {
    matches!(cell.trim().to_lowercase().as_str(), "true" | "t" | "1" | "yes")
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

fn parse_error(format: &str, line: u64, reason: &str) -> RefeedError {
    RefeedError::ImportExport(ImportExportError::ParseError {
        format: format.to_string(),
        line,
        reason: reason.to_string(),
    })
}

fn require(columns: &HashMap<String, usize>, required: &[&str], format: &str) -> Result<()> {
    for name in required {
        if !columns.contains_key(*name) {
            return Err(RefeedError::ImportExport(ImportExportError::MissingData {
                field: format!("{} column '{}'", format, name),
            }));
        }
    }
    Ok(())
}
