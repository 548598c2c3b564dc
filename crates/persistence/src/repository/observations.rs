//! Observations repository — one row per scored bar

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A scored, indicator-augmented bar as stored in `observations`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ObservationRecord {
    pub id: Option<i64>,
    pub symbol: String,
    /// Bar open time, epoch milliseconds (UTC)
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub bb_width: Option<f64>,
    pub bb_position: Option<f64>,
    pub support: Option<f64>,
    pub resistance: Option<f64>,
    pub return_1: Option<f64>,
    pub return_24: Option<f64>,
    pub volatility: Option<f64>,
    pub trend_strength: Option<f64>,
    pub volume_mean: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub breakout_score: Option<f64>,
    pub tier_2x: bool,
    pub tier_3x: bool,
    pub tier_5x: bool,
    pub exchange: String,
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, symbol, timestamp, open, high, low, close, volume,
           rsi, macd, macd_signal, macd_histogram,
           bb_upper, bb_middle, bb_lower, bb_width, bb_position,
           support, resistance, return_1, return_24, volatility, trend_strength,
           volume_mean, volume_ratio, breakout_score, tier_2x, tier_3x, tier_5x, exchange
    FROM observations
"#;

/// Repository for the `observations` table
pub struct ObservationRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ObservationRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a batch of observations in one transaction.
    /// Plain INSERT: the same bar appended twice yields two rows.
    pub async fn append(&self, records: &[ObservationRecord]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                r#"
                INSERT INTO observations (
                    symbol, timestamp, open, high, low, close, volume,
                    rsi, macd, macd_signal, macd_histogram,
                    bb_upper, bb_middle, bb_lower, bb_width, bb_position,
                    support, resistance, return_1, return_24, volatility, trend_strength,
                    volume_mean, volume_ratio, breakout_score, tier_2x, tier_3x, tier_5x, exchange
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&r.symbol)
            .bind(r.timestamp)
            .bind(r.open)
            .bind(r.high)
            .bind(r.low)
            .bind(r.close)
            .bind(r.volume)
            .bind(r.rsi)
            .bind(r.macd)
            .bind(r.macd_signal)
            .bind(r.macd_histogram)
            .bind(r.bb_upper)
            .bind(r.bb_middle)
            .bind(r.bb_lower)
            .bind(r.bb_width)
            .bind(r.bb_position)
            .bind(r.support)
            .bind(r.resistance)
            .bind(r.return_1)
            .bind(r.return_24)
            .bind(r.volatility)
            .bind(r.trend_strength)
            .bind(r.volume_mean)
            .bind(r.volume_ratio)
            .bind(r.breakout_score)
            .bind(r.tier_2x)
            .bind(r.tier_3x)
            .bind(r.tier_5x)
            .bind(&r.exchange)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }

    /// Query observations ordered by (symbol, timestamp), with optional filters.
    /// `since_millis` keeps rows whose bar timestamp is strictly newer.
    pub async fn query(
        &self,
        symbol: Option<&str>,
        since_millis: Option<i64>,
    ) -> DbResult<Vec<ObservationRecord>> {
        let mut sql = format!("{SELECT_COLUMNS} WHERE 1=1");
        if symbol.is_some() {
            sql.push_str(" AND symbol = ?");
        }
        if since_millis.is_some() {
            sql.push_str(" AND timestamp > ?");
        }
        sql.push_str(" ORDER BY symbol, timestamp, id");

        let mut query = sqlx::query_as::<_, ObservationRecord>(&sql);
        if let Some(sym) = symbol {
            query = query.bind(sym);
        }
        if let Some(since) = since_millis {
            query = query.bind(since);
        }

        let records = query.fetch_all(self.pool).await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn record(symbol: &str, timestamp: i64, close: f64) -> ObservationRecord {
        ObservationRecord {
            id: None,
            symbol: symbol.to_string(),
            timestamp,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
            rsi: Some(55.5),
            macd: None,
            macd_signal: None,
            macd_histogram: None,
            bb_upper: None,
            bb_middle: None,
            bb_lower: None,
            bb_width: None,
            bb_position: None,
            support: None,
            resistance: None,
            return_1: Some(0.25),
            return_24: None,
            volatility: None,
            trend_strength: None,
            volume_mean: Some(100.0),
            volume_ratio: Some(1.0),
            breakout_score: Some(0.0),
            tier_2x: false,
            tier_3x: false,
            tier_5x: false,
            exchange: "binance".to_string(),
        }
    }

    #[tokio::test]
    async fn test_append_and_query_ordering() {
        let db = Database::in_memory().await.unwrap();
        let repo = ObservationRepository::new(db.pool());

        let now = chrono::Utc::now().timestamp_millis();
        let written = repo
            .append(&[
                record("ETHUSDT", now - 1_000, 10.0),
                record("BTCUSDT", now - 2_000, 20.0),
                record("BTCUSDT", now - 3_000, 30.0),
            ])
            .await
            .unwrap();
        assert_eq!(written, 3);

        let all = repo.query(None, None).await.unwrap();
        let keys: Vec<(&str, i64)> = all.iter().map(|r| (r.symbol.as_str(), r.timestamp)).collect();
        assert_eq!(
            keys,
            vec![
                ("BTCUSDT", now - 3_000),
                ("BTCUSDT", now - 2_000),
                ("ETHUSDT", now - 1_000)
            ]
        );

        let btc = repo.query(Some("BTCUSDT"), None).await.unwrap();
        assert_eq!(btc.len(), 2);
        assert_eq!(btc[0].rsi, Some(55.5));
        assert_eq!(btc[0].macd, None);
    }

    #[tokio::test]
    async fn test_duplicate_append_keeps_both_rows() {
        let db = Database::in_memory().await.unwrap();
        let repo = ObservationRepository::new(db.pool());
        let now = chrono::Utc::now().timestamp_millis();

        repo.append(&[record("SOLUSDT", now, 5.0)]).await.unwrap();
        repo.append(&[record("SOLUSDT", now, 5.0)]).await.unwrap();

        let rows = repo.query(Some("SOLUSDT"), Some(crate::cutoff_millis(1))).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].close, rows[1].close);
        assert_ne!(rows[0].id, rows[1].id);
    }

    #[tokio::test]
    async fn test_since_filter_excludes_old_rows() {
        let db = Database::in_memory().await.unwrap();
        let repo = ObservationRepository::new(db.pool());
        let now = chrono::Utc::now().timestamp_millis();
        let ten_days = 10 * 86_400_000;

        repo.append(&[record("BTCUSDT", now - ten_days, 1.0), record("BTCUSDT", now, 2.0)])
            .await
            .unwrap();

        let recent = repo.query(None, Some(crate::cutoff_millis(3))).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].close, 2.0);
        assert_eq!(repo.query(Some("BTCUSDT"), None).await.unwrap().len(), 2);
    }
}
