use super::{export_failed, fixed};
use crate::batch::SnapshotRow;
use crate::error::Result;
use crate::models::MetricKey;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Column order of the snapshot; consumers depend on it
pub const SNAPSHOT_HEADER: [&str; 24] = [
    "auth_uid",
    "user_id",
    "date",
    "weight_kg",
    "rhr_bpm",
    "temp_c",
    "hrv_ms",
    "sleep_min",
    "fatigue_1_5",
    "training_load",
    "calorie_intake_kcal",
    "energy_expenditure_kcal",
    "mas",
    "rrs_v1",
    "rrs_v2",
    "rrs_display",
    "rrs_effective",
    "refeed_cooldown",
    "refeed_response",
    "deficit_streak",
    "training_load_factor",
    "plateau_flag",
    "hard_locked",
    "observed_days",
];

const RAW_VITAL_DECIMALS: u32 = 2;
const RAW_COUNT_DECIMALS: u32 = 0;
const SCORE_DECIMALS: u32 = 4;
const FACTOR_DECIMALS: u32 = 3;

fn decimals_for(key: MetricKey) -> u32 {
    match key {
        MetricKey::WeightKg | MetricKey::RhrBpm | MetricKey::TempC | MetricKey::HrvMs => RAW_VITAL_DECIMALS,
        MetricKey::SleepMin
        | MetricKey::Fatigue
        | MetricKey::TrainingLoad
        | MetricKey::CalorieIntakeKcal
        | MetricKey::EnergyExpenditureKcal => RAW_COUNT_DECIMALS,
    }
}

fn cell(value: Option<f64>, decimals: u32) -> String {
    value.and_then(|v| fixed(v, decimals)).unwrap_or_default()
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

/// Snapshot fields of one row, in [`SNAPSHOT_HEADER`] order
pub fn snapshot_record(row: &SnapshotRow) -> Vec<String> {
    let record = &row.record;
    let mut fields = Vec::with_capacity(SNAPSHOT_HEADER.len());

    fields.push(row.auth_uid.clone());
    fields.push(row.user_id.clone());
    fields.push(row.metric.date.format("%Y-%m-%d").to_string());
    for key in MetricKey::ALL {
        fields.push(cell(row.metric.value(key), decimals_for(key)));
    }

    fields.push(cell(Some(record.mas), SCORE_DECIMALS));
    fields.push(cell(Some(record.rrs), SCORE_DECIMALS));
    fields.push(cell(Some(record.rrs_v2), SCORE_DECIMALS));
    fields.push(cell(Some(record.display_rrs), SCORE_DECIMALS));
    fields.push(cell(Some(record.effective_rrs), SCORE_DECIMALS));
    fields.push(cell(Some(record.cooldown), FACTOR_DECIMALS));
    fields.push(cell(Some(record.response), FACTOR_DECIMALS));
    fields.push(record.deficit_streak.to_string());
    fields.push(cell(Some(record.training_load_factor), FACTOR_DECIMALS));
    fields.push(flag(record.plateau_flag));
    fields.push(flag(record.hard_locked));
    fields.push(record.observed_days.to_string());

    fields
}

/// Write the snapshot with a header line and `\n` line endings
pub fn write_snapshot<W: Write>(rows: &[SnapshotRow], writer: W) -> Result<()> {
    let mut csv_writer = ::csv::WriterBuilder::new()
        .terminator(::csv::Terminator::Any(b'\n'))
        .from_writer(writer);

    csv_writer.write_record(SNAPSHOT_HEADER)?;
    for row in rows {
        csv_writer.write_record(snapshot_record(row))?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Export the snapshot to a CSV file
pub fn export_snapshot<P: AsRef<Path>>(rows: &[SnapshotRow], output_path: P) -> Result<()> {
    let path = output_path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| export_failed(path, e))?;
    }
    let file = File::create(path).map_err(|e| export_failed(path, e))?;
    write_snapshot(rows, file)?;

    info!("Wrote {} snapshot rows to {}", rows.len(), path.display());
    Ok(())
}
