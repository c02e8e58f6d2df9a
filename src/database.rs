//! SQLite store for metric histories, refeed executions and score rows
//!
//! Every table is keyed by `(user_id, date)` so writes are idempotent
//! upserts: recomputing a day replaces its previous row.

use crate::batch::{ScoreRow, UserHistory};
use crate::error::DatabaseError;
use crate::import::UserMetric;
use crate::models::{DailyMetric, MetricKey, RefeedExecution};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};

type DbResult<T> = std::result::Result<T, DatabaseError>;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS metrics_daily (
        user_id TEXT NOT NULL,
        auth_uid TEXT,
        date DATE NOT NULL,
        weight_kg REAL,
        rhr_bpm REAL,
        temp_c REAL,
        hrv_ms REAL,
        sleep_min REAL,
        fatigue_1_5 REAL,
        training_load REAL,
        calorie_intake_kcal REAL,
        energy_expenditure_kcal REAL,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (user_id, date)
    );

    CREATE TABLE IF NOT EXISTS refeed_executions (
        user_id TEXT NOT NULL,
        date DATE NOT NULL,
        executed_at DATE,
        refeed_effect_window INTEGER,
        PRIMARY KEY (user_id, date)
    );

    CREATE TABLE IF NOT EXISTS scores (
        user_id TEXT NOT NULL,
        date DATE NOT NULL,
        plateau_flag BOOLEAN NOT NULL,
        mas REAL,
        rrs REAL,
        rrs_v2 REAL,
        refeed_cooldown REAL,
        refeed_response REAL,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (user_id, date)
    );
"#;

/// Database connection and management
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create or open a database at the specified path
    pub fn new<P: AsRef<Path>>(db_path: P) -> DbResult<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path).map_err(|e| DatabaseError::ConnectionFailed {
            reason: format!("{}: {}", path.display(), e),
        })?;
        let db = Self { conn };
        db.init_schema()?;
        debug!("Opened score database at {}", path.display());
        Ok(db)
    }

    pub fn in_memory() -> DbResult<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> DbResult<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Upsert one user's daily metrics in a single transaction
    pub fn upsert_metrics(&mut self, user_id: &str, auth_uid: Option<&str>, metrics: &[DailyMetric]) -> DbResult<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO metrics_daily (
                    user_id, auth_uid, date, weight_kg, rhr_bpm, temp_c, hrv_ms, sleep_min,
                    fatigue_1_5, training_load, calorie_intake_kcal, energy_expenditure_kcal
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT (user_id, date) DO UPDATE SET
                    auth_uid = COALESCE(excluded.auth_uid, metrics_daily.auth_uid),
                    weight_kg = excluded.weight_kg,
                    rhr_bpm = excluded.rhr_bpm,
                    temp_c = excluded.temp_c,
                    hrv_ms = excluded.hrv_ms,
                    sleep_min = excluded.sleep_min,
                    fatigue_1_5 = excluded.fatigue_1_5,
                    training_load = excluded.training_load,
                    calorie_intake_kcal = excluded.calorie_intake_kcal,
                    energy_expenditure_kcal = excluded.energy_expenditure_kcal,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )?;
            for metric in metrics {
                // Non-finite values are stored as NULL
                let v = |key| metric.value(key);
                stmt.execute(params![
                    user_id,
                    auth_uid,
                    metric.date,
                    v(MetricKey::WeightKg),
                    v(MetricKey::RhrBpm),
                    v(MetricKey::TempC),
                    v(MetricKey::HrvMs),
                    v(MetricKey::SleepMin),
                    v(MetricKey::Fatigue),
                    v(MetricKey::TrainingLoad),
                    v(MetricKey::CalorieIntakeKcal),
                    v(MetricKey::EnergyExpenditureKcal),
                ])?;
            }
        }
        commit(tx)?;
        Ok(metrics.len())
    }

    /// Upsert imported rows for any number of users
    pub fn import_metric_rows(&mut self, rows: &[UserMetric]) -> DbResult<usize> {
        let mut stored = 0;
        for row in rows {
            stored += self.upsert_metrics(&row.user_id, row.auth_uid.as_deref(), std::slice::from_ref(&row.metric))?;
        }
        info!("Stored {} metric rows", stored);
        Ok(stored)
    }

    pub fn record_execution(&self, user_id: &str, execution: &RefeedExecution) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO refeed_executions (user_id, date, executed_at, refeed_effect_window)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (user_id, date) DO UPDATE SET
                executed_at = excluded.executed_at,
                refeed_effect_window = excluded.refeed_effect_window
            "#,
            params![user_id, execution.date, execution.executed_at, execution.effect_window],
        )?;
        Ok(())
    }

    /// Distinct users with at least one metric row, ascending
    pub fn list_user_ids(&self) -> DbResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT user_id FROM metrics_daily ORDER BY user_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// A user's metrics in ascending date order
    pub fn load_history(&self, user_id: &str) -> DbResult<Vec<DailyMetric>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT date, weight_kg, rhr_bpm, temp_c, hrv_ms, sleep_min, fatigue_1_5,
                   training_load, calorie_intake_kcal, energy_expenditure_kcal
            FROM metrics_daily WHERE user_id = ?1 ORDER BY date
            "#,
        )?;
        let metrics = stmt
            .query_map(params![user_id], Self::metric_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(metrics)
    }

    fn metric_from_row(row: &Row) -> rusqlite::Result<DailyMetric> {
        let mut metric = DailyMetric::new(row.get::<_, NaiveDate>("date")?);
        for key in MetricKey::ALL {
            metric.set(key, row.get(key.column())?);
        }
        Ok(metric)
    }

    /// A user's executions ordered by execution date
    pub fn load_executions(&self, user_id: &str) -> DbResult<Vec<RefeedExecution>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT date, executed_at, refeed_effect_window FROM refeed_executions
            WHERE user_id = ?1 ORDER BY COALESCE(executed_at, date), date
            "#,
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((
                    row.get::<_, NaiveDate>(0)?,
                    row.get::<_, Option<NaiveDate>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(date, executed_at, window)| {
                let effect_window = window
                    .map(|w| {
                        u32::try_from(w).map_err(|_| DatabaseError::CorruptValue {
                            table: "refeed_executions".to_string(),
                            column: "refeed_effect_window".to_string(),
                            value: w.to_string(),
                        })
                    })
                    .transpose()?;
                Ok(RefeedExecution {
                    date,
                    executed_at,
                    effect_window,
                })
            })
            .collect()
    }

    /// Everything needed to recompute one user
    pub fn load_user(&self, user_id: &str) -> DbResult<UserHistory> {
        let auth_uid: Option<String> = self
            .conn
            .query_row(
                "SELECT auth_uid FROM metrics_daily WHERE user_id = ?1 AND auth_uid IS NOT NULL LIMIT 1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(UserHistory {
            user_id: user_id.to_string(),
            auth_uid,
            metrics: self.load_history(user_id)?,
            executions: self.load_executions(user_id)?,
        })
    }

    pub fn load_all_users(&self) -> DbResult<Vec<UserHistory>> {
        self.list_user_ids()?
            .iter()
            .map(|user_id| self.load_user(user_id))
            .collect()
    }

    /// Store the metrics and executions of imported users
    pub fn ingest_users(&mut self, users: &[UserHistory]) -> DbResult<()> {
        for user in users {
            self.upsert_metrics(&user.user_id, user.auth_uid.as_deref(), &user.metrics)?;
            for execution in &user.executions {
                self.record_execution(&user.user_id, execution)?;
            }
        }
        info!("Stored inputs of {} users", users.len());
        Ok(())
    }

    /// Delete score rows whose day has no metric row
    pub fn prune_orphan_scores(&self) -> DbResult<usize> {
        let deleted = self.conn.execute(
            r#"
            DELETE FROM scores WHERE NOT EXISTS (
                SELECT 1 FROM metrics_daily m
                WHERE m.user_id = scores.user_id AND m.date = scores.date
            )
            "#,
            [],
        )?;
        if deleted > 0 {
            debug!("Pruned {} orphan score rows", deleted);
        }
        Ok(deleted)
    }

    /// Upsert score rows in one transaction
    pub fn upsert_scores(&mut self, rows: &[ScoreRow]) -> DbResult<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO scores (
                    user_id, date, plateau_flag, mas, rrs, rrs_v2, refeed_cooldown, refeed_response
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT (user_id, date) DO UPDATE SET
                    plateau_flag = excluded.plateau_flag,
                    mas = excluded.mas,
                    rrs = excluded.rrs,
                    rrs_v2 = excluded.rrs_v2,
                    refeed_cooldown = excluded.refeed_cooldown,
                    refeed_response = excluded.refeed_response,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )?;
            for row in rows {
                stmt.execute(params![
                    row.user_id,
                    row.date,
                    row.plateau_flag,
                    row.mas,
                    row.rrs,
                    row.rrs_v2,
                    row.refeed_cooldown,
                    row.refeed_response,
                ])?;
            }
        }
        commit(tx)?;
        debug!("Upserted {} score rows", rows.len());
        Ok(rows.len())
    }

    /// Delete a user's scores on or after `start`
    pub fn delete_scores_from(&self, user_id: &str, start: NaiveDate) -> DbResult<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM scores WHERE user_id = ?1 AND date >= ?2",
            params![user_id, start],
        )?;
        Ok(deleted)
    }

    pub fn load_scores(&self, user_id: &str) -> DbResult<Vec<ScoreRow>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT user_id, date, plateau_flag, mas, rrs, rrs_v2, refeed_cooldown, refeed_response
            FROM scores WHERE user_id = ?1 ORDER BY date
            "#,
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(ScoreRow {
                    user_id: row.get(0)?,
                    date: row.get(1)?,
                    plateau_flag: row.get(2)?,
                    mas: row.get(3)?,
                    rrs: row.get(4)?,
                    rrs_v2: row.get(5)?,
                    refeed_cooldown: row.get(6)?,
                    refeed_response: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Get database statistics
    pub fn get_stats(&self) -> DbResult<DatabaseStats> {
        let count = |sql: &str| -> DbResult<usize> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(DatabaseStats {
            user_count: count("SELECT COUNT(DISTINCT user_id) FROM metrics_daily")?,
            metric_rows: count("SELECT COUNT(*) FROM metrics_daily")?,
            execution_count: count("SELECT COUNT(*) FROM refeed_executions")?,
            score_rows: count("SELECT COUNT(*) FROM scores")?,
        })
    }
}

fn commit(tx: rusqlite::Transaction<'_>) -> DbResult<()> {
    tx.commit().map_err(|e| DatabaseError::TransactionError {
        reason: e.to_string(),
    })
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    pub user_count: usize,
    pub metric_rows: usize,
    pub execution_count: usize,
    pub score_rows: usize,
}
