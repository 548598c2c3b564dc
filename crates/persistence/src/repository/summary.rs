//! Read-only aggregates over observations for the periodic market summary

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// Per-symbol aggregate over a trailing window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SymbolActivity {
    pub symbol: String,
    /// Close of the newest bar inside the window
    pub latest_price: f64,
    pub total_volume: f64,
    pub avg_breakout_score: Option<f64>,
    pub avg_rsi: Option<f64>,
    pub avg_macd: Option<f64>,
    pub last_timestamp: i64,
    pub observations: i64,
}

pub struct SummaryRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SummaryRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Highest-volume symbols whose bars are newer than `since_millis`.
    /// Averages ignore NULL (undefined) indicator values.
    pub async fn top_symbols_by_volume(
        &self,
        since_millis: i64,
        limit: i64,
    ) -> DbResult<Vec<SymbolActivity>> {
        let rows = sqlx::query_as::<_, SymbolActivity>(
            r#"
            SELECT
                o.symbol AS symbol,
                (SELECT l.close FROM observations l
                  WHERE l.symbol = o.symbol AND l.timestamp > ?1
                  ORDER BY l.timestamp DESC, l.id DESC
                  LIMIT 1) AS latest_price,
                SUM(o.volume) AS total_volume,
                AVG(o.breakout_score) AS avg_breakout_score,
                AVG(o.rsi) AS avg_rsi,
                AVG(o.macd) AS avg_macd,
                MAX(o.timestamp) AS last_timestamp,
                COUNT(*) AS observations
            FROM observations o
            WHERE o.timestamp > ?1
            GROUP BY o.symbol
            ORDER BY total_volume DESC
            LIMIT ?2
            "#,
        )
        .bind(since_millis)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }
}
