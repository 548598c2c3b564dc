//! Run statistics repository — one row per mining run

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RunStatsRecord {
    pub id: Option<i64>,
    pub run_id: String,
    pub symbols_processed: i64,
    pub errors: i64,
    pub elapsed_seconds: f64,
    pub success_rate: f64,
    pub observations_written: i64,
    pub events_found: i64,
    pub feature_vectors_written: i64,
    pub created_at: Option<i64>,
}

/// Repository for the `run_stats` table
pub struct RunStatsRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RunStatsRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, record: &RunStatsRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO run_stats (
                run_id, symbols_processed, errors, elapsed_seconds, success_rate,
                observations_written, events_found, feature_vectors_written
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.run_id)
        .bind(record.symbols_processed)
        .bind(record.errors)
        .bind(record.elapsed_seconds)
        .bind(record.success_rate)
        .bind(record.observations_written)
        .bind(record.events_found)
        .bind(record.feature_vectors_written)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent runs first
    pub async fn recent(&self, limit: i64) -> DbResult<Vec<RunStatsRecord>> {
        let records = sqlx::query_as::<_, RunStatsRecord>(
            r#"
            SELECT id, run_id, symbols_processed, errors, elapsed_seconds, success_rate,
                   observations_written, events_found, feature_vectors_written, created_at
            FROM run_stats
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }
}
