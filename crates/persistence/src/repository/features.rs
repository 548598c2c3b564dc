//! Feature vector repository — ML training rows

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A stored feature vector. `payload` is the JSON-encoded set of engineered
/// scalars; labels live in their own columns so they can be indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FeatureVectorRecord {
    pub id: Option<i64>,
    pub symbol: String,
    pub timestamp: i64,
    pub payload: String,
    pub breakout_next: bool,
    pub breakout_within_24: bool,
    pub return_next: f64,
    pub return_24: f64,
    pub horizon_bars: i64,
}

/// Repository for the `feature_vectors` table
pub struct FeatureRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> FeatureRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a batch of feature vectors in one transaction
    pub async fn append(&self, records: &[FeatureVectorRecord]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                r#"
                INSERT INTO feature_vectors (
                    symbol, timestamp, payload,
                    breakout_next, breakout_within_24, return_next, return_24, horizon_bars
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&r.symbol)
            .bind(r.timestamp)
            .bind(&r.payload)
            .bind(r.breakout_next)
            .bind(r.breakout_within_24)
            .bind(r.return_next)
            .bind(r.return_24)
            .bind(r.horizon_bars)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }

    /// Feature vectors ordered by (symbol, timestamp), with optional filters
    pub async fn query(
        &self,
        symbol: Option<&str>,
        since_millis: Option<i64>,
    ) -> DbResult<Vec<FeatureVectorRecord>> {
        let mut sql = String::from(
            r#"
            SELECT id, symbol, timestamp, payload,
                   breakout_next, breakout_within_24, return_next, return_24, horizon_bars
            FROM feature_vectors
            WHERE 1=1
            "#,
        );
        if symbol.is_some() {
            sql.push_str(" AND symbol = ?");
        }
        if since_millis.is_some() {
            sql.push_str(" AND timestamp > ?");
        }
        sql.push_str(" ORDER BY symbol, timestamp, id");

        let mut query = sqlx::query_as::<_, FeatureVectorRecord>(&sql);
        if let Some(sym) = symbol {
            query = query.bind(sym);
        }
        if let Some(since) = since_millis {
            query = query.bind(since);
        }

        Ok(query.fetch_all(self.pool).await?)
    }
}
