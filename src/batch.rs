//! All-users batch recompute
//!
//! Re-derives every score row of every user from the full history. Users are
//! independent, so they are scored in parallel with rayon; within a user the
//! days are scored in ascending order over a growing prefix.
//!
//! Two outputs are produced:
//! - [`ScoreRow`]s for the score store, rounded to 6 decimals
//! - [`SnapshotRow`]s for the denormalized CSV snapshot, see
//!   [`crate::export::csv`]

use crate::database::Database;
use crate::error::{RefeedError, Result};
use crate::export::round_dp;
use crate::import::{UserExecution, UserMetric};
use crate::models::{upsert_metric, DailyMetric, RefeedExecution, ScoreRecord};
use crate::recompute::ScoreEngine;
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

/// Decimal places kept for persisted scores
pub const STORED_DECIMALS: u32 = 6;

/// Full history of one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserHistory {
    pub user_id: String,
    /// Account identifier echoed into the snapshot
    pub auth_uid: Option<String>,
    /// Ascending by date, one entry per day
    pub metrics: Vec<DailyMetric>,
    /// Ascending by execution date
    pub executions: Vec<RefeedExecution>,
}

impl UserHistory {
    pub fn new(user_id: impl Into<String>) -> Self {
        UserHistory {
            user_id: user_id.into(),
            auth_uid: None,
            metrics: Vec::new(),
            executions: Vec::new(),
        }
    }

    pub fn auth_uid_or_user_id(&self) -> &str {
        self.auth_uid.as_deref().unwrap_or(&self.user_id)
    }
}

/// Group flat rows into per-user histories ordered by user id.
///
/// Executions of users without any metric rows are dropped. A later metric
/// row for the same day replaces an earlier one.
pub fn group_by_user(metrics: Vec<UserMetric>, executions: Vec<UserExecution>) -> Vec<UserHistory> {
    let mut users: BTreeMap<String, UserHistory> = BTreeMap::new();

    for row in metrics {
        let history = users
            .entry(row.user_id.clone())
            .or_insert_with(|| UserHistory::new(row.user_id.clone()));
        if history.auth_uid.is_none() {
            history.auth_uid = row.auth_uid;
        }
        upsert_metric(&mut history.metrics, row.metric);
    }

    for row in executions {
        if let Some(history) = users.get_mut(&row.user_id) {
            history.executions.push(row.execution);
        }
    }

    users
        .into_values()
        .map(|mut history| {
            // Stable, so same-day executions keep their recommendation order
            history.executions.sort_by_key(|e| e.executed_date());
            history
        })
        .collect()
}

/// Persisted score row for one user and day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
    pub user_id: String,
    pub date: NaiveDate,
    pub plateau_flag: bool,
    pub mas: Option<f64>,
    pub rrs: Option<f64>,
    pub rrs_v2: Option<f64>,
    pub refeed_cooldown: Option<f64>,
    pub refeed_response: Option<f64>,
}

impl ScoreRow {
    pub fn from_record(user_id: &str, record: &ScoreRecord) -> Self {
        ScoreRow {
            user_id: user_id.to_string(),
            date: record.date,
            plateau_flag: record.plateau_flag,
            mas: round_dp(record.mas, STORED_DECIMALS),
            rrs: round_dp(record.rrs, STORED_DECIMALS),
            rrs_v2: round_dp(record.rrs_v2, STORED_DECIMALS),
            refeed_cooldown: round_dp(record.cooldown, STORED_DECIMALS),
            refeed_response: round_dp(record.response, STORED_DECIMALS),
        }
    }
}

/// Input day and unrounded scores for the snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub auth_uid: String,
    pub user_id: String,
    pub metric: DailyMetric,
    pub record: ScoreRecord,
}

/// Batch processing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Score users on the rayon pool
    pub parallel: bool,
    /// Pool size; rayon's default when `None`
    pub num_threads: Option<usize>,
    pub show_progress: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            num_threads: None,
            show_progress: true,
        }
    }
}

/// Summary of a batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_users: usize,
    pub total_rows: usize,
    pub hard_locked_days: usize,
    pub cooldown_days: usize,
    pub total_duration_ms: u128,
}

impl BatchSummary {
    /// Scored days per second
    pub fn throughput_rows_per_sec(&self) -> f64 {
        if self.total_duration_ms == 0 {
            return 0.0;
        }
        (self.total_rows as f64 / self.total_duration_ms as f64) * 1000.0
    }

    pub fn to_string_pretty(&self) -> String {
        format!(
            "Batch Recompute Summary\n  \
             Users: {}\n  \
             Scored Days: {}\n  \
             Hard-Locked Days: {}\n  \
             Cooldown Days: {}\n  \
             Total Time: {:.2}s\n  \
             Throughput: {:.0} days/sec",
            self.total_users,
            self.total_rows,
            self.hard_locked_days,
            self.cooldown_days,
            self.total_duration_ms as f64 / 1000.0,
            self.throughput_rows_per_sec()
        )
    }
}

/// Everything a batch run produces
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutput {
    /// Ordered by user id, then date
    pub score_rows: Vec<ScoreRow>,
    /// Ordered by user id, then date
    pub snapshot: Vec<SnapshotRow>,
    pub summary: BatchSummary,
}

/// Score every day of one user
pub fn recompute_user(engine: &ScoreEngine, history: &UserHistory) -> (Vec<ScoreRow>, Vec<SnapshotRow>) {
    let records = engine.score_history(&history.metrics, &history.executions);
    let auth_uid = history.auth_uid_or_user_id();

    let mut rows = Vec::with_capacity(records.len());
    let mut snapshot = Vec::with_capacity(records.len());
    for (metric, record) in history.metrics.iter().zip(records) {
        rows.push(ScoreRow::from_record(&history.user_id, &record));
        snapshot.push(SnapshotRow {
            auth_uid: auth_uid.to_string(),
            user_id: history.user_id.clone(),
            metric: metric.clone(),
            record,
        });
    }

    debug!(user_id = %history.user_id, days = rows.len(), "recomputed user");
    (rows, snapshot)
}

/// Runs the all-users recompute
pub struct BatchProcessor {
    pub config: BatchConfig,
    engine: ScoreEngine,
}

impl BatchProcessor {
    pub fn new() -> Self {
        Self::with_config(BatchConfig::default())
    }

    pub fn with_config(config: BatchConfig) -> Self {
        Self {
            config,
            engine: ScoreEngine::new(),
        }
    }

    pub fn with_engine(mut self, engine: ScoreEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn run(&self, users: &[UserHistory]) -> Result<BatchOutput> {
        let start_time = Instant::now();
        info!("Starting batch recompute of {} users", users.len());

        let progress = self.progress_bar(users.len());
        let outcomes = match (self.config.parallel, self.config.num_threads) {
            (true, Some(num_threads)) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(num_threads)
                    .build()
                    .map_err(|e| RefeedError::Internal(format!("Failed to create thread pool: {}", e)))?;
                pool.install(|| self.score_parallel(users, &progress))
            }
            (true, None) => self.score_parallel(users, &progress),
            (false, _) => users
                .iter()
                .map(|user| self.score_one(user, &progress))
                .collect(),
        };

        if let Some(pb) = progress {
            pb.finish_with_message("Complete");
        }

        let mut score_rows = Vec::new();
        let mut snapshot = Vec::new();
        for (rows, snap) in outcomes {
            score_rows.extend(rows);
            snapshot.extend(snap);
        }
        snapshot.sort_by(|a, b| (&a.user_id, a.metric.date).cmp(&(&b.user_id, b.metric.date)));

        let summary = BatchSummary {
            total_users: users.len(),
            total_rows: score_rows.len(),
            hard_locked_days: snapshot.iter().filter(|row| row.record.hard_locked).count(),
            cooldown_days: snapshot.iter().filter(|row| row.record.cooldown > 0.0).count(),
            total_duration_ms: start_time.elapsed().as_millis(),
        };
        info!("{}", summary.to_string_pretty());

        Ok(BatchOutput {
            score_rows,
            snapshot,
            summary,
        })
    }

    /// Store `incoming` and recompute every user held in `db`.
    ///
    /// Scores are derived from the stored histories after the merge, so days
    /// missing from `incoming` still count. Score rows whose metric day no
    /// longer exists are removed before the new rows are written.
    pub fn run_store(&self, db: &mut Database, incoming: &[UserHistory]) -> Result<BatchOutput> {
        db.ingest_users(incoming)?;
        let users = db.load_all_users()?;
        let output = self.run(&users)?;

        db.prune_orphan_scores()?;
        let written = db.upsert_scores(&output.score_rows)?;
        info!("Stored {} score rows", written);
        Ok(output)
    }

    fn score_parallel(
        &self,
        users: &[UserHistory],
        progress: &Option<ProgressBar>,
    ) -> Vec<(Vec<ScoreRow>, Vec<SnapshotRow>)> {
        users
            .par_iter()
            .map(|user| self.score_one(user, progress))
            .collect()
    }

    fn score_one(&self, user: &UserHistory, progress: &Option<ProgressBar>) -> (Vec<ScoreRow>, Vec<SnapshotRow>) {
        let outcome = recompute_user(&self.engine, user);
        if let Some(pb) = progress {
            pb.inc(1);
        }
        outcome
    }

    fn progress_bar(&self, len: usize) -> Option<ProgressBar> {
        if !self.config.show_progress {
            return None;
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} users") {
            pb.set_style(style.progress_chars("#>-"));
        }
        Some(pb)
    }
}

impl Default for BatchProcessor {
    fn default() -> Self {
        Self::new()
    }
}
