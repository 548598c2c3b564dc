//! Breakout events repository

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A persisted breakout event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BreakoutEventRecord {
    pub id: Option<i64>,
    pub symbol: String,
    pub timestamp: i64,
    /// MINI / BIG / MEGA
    pub kind: String,
    pub volume_multiplier: f64,
    pub price_impact_1: f64,
    pub price_impact_24: f64,
    pub follow_through: f64,
    pub confidence: f64,
    pub exchange: String,
}

/// Event counts per kind inside a time window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventKindCounts {
    pub mega: i64,
    pub big: i64,
    pub mini: i64,
}

/// Repository for the `breakout_events` table
pub struct BreakoutRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BreakoutRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a batch of events in one transaction
    pub async fn append(&self, records: &[BreakoutEventRecord]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                r#"
                INSERT INTO breakout_events (
                    symbol, timestamp, kind, volume_multiplier,
                    price_impact_1, price_impact_24, follow_through, confidence, exchange
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&r.symbol)
            .bind(r.timestamp)
            .bind(&r.kind)
            .bind(r.volume_multiplier)
            .bind(r.price_impact_1)
            .bind(r.price_impact_24)
            .bind(r.follow_through)
            .bind(r.confidence)
            .bind(&r.exchange)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }

    /// Events ordered by (symbol, timestamp), with optional filters
    pub async fn query(
        &self,
        symbol: Option<&str>,
        since_millis: Option<i64>,
    ) -> DbResult<Vec<BreakoutEventRecord>> {
        let mut sql = String::from(
            r#"
            SELECT id, symbol, timestamp, kind, volume_multiplier,
                   price_impact_1, price_impact_24, follow_through, confidence, exchange
            FROM breakout_events
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

        let mut query = sqlx::query_as::<_, BreakoutEventRecord>(&sql);
        if let Some(sym) = symbol {
            query = query.bind(sym);
        }
        if let Some(since) = since_millis {
            query = query.bind(since);
        }

        Ok(query.fetch_all(self.pool).await?)
    }

    /// Count events per kind whose bar timestamp is newer than `since_millis`
    pub async fn count_by_kind(&self, since_millis: i64) -> DbResult<EventKindCounts> {
        let (mega, big, mini): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(CASE WHEN kind = 'MEGA' THEN 1 END),
                COUNT(CASE WHEN kind = 'BIG' THEN 1 END),
                COUNT(CASE WHEN kind = 'MINI' THEN 1 END)
            FROM breakout_events
            WHERE timestamp > ?
            "#,
        )
        .bind(since_millis)
        .fetch_one(self.pool)
        .await?;

        Ok(EventKindCounts { mega, big, mini })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn event(symbol: &str, timestamp: i64, kind: &str) -> BreakoutEventRecord {
        BreakoutEventRecord {
            id: None,
            symbol: symbol.to_string(),
            timestamp,
            kind: kind.to_string(),
            volume_multiplier: 6.0,
            price_impact_1: 1.5,
            price_impact_24: 0.0,
            follow_through: 15.0,
            confidence: 100.0,
            exchange: "binance".to_string(),
        }
    }

    #[tokio::test]
    async fn test_count_by_kind_respects_window() {
        let db = Database::in_memory().await.unwrap();
        let repo = BreakoutRepository::new(db.pool());
        let now = chrono::Utc::now().timestamp_millis();

        repo.append(&[
            event("BTCUSDT", now - 1_000, "MEGA"),
            event("BTCUSDT", now - 2_000, "MINI"),
            event("ETHUSDT", now - 3_000, "MINI"),
            event("ETHUSDT", now - 5 * 86_400_000, "BIG"),
        ])
        .await
        .unwrap();

        let counts = repo.count_by_kind(crate::cutoff_millis(1)).await.unwrap();
        assert_eq!(counts, EventKindCounts { mega: 1, big: 0, mini: 2 });

        let all = repo.count_by_kind(0).await.unwrap();
        assert_eq!(all.big, 1);
    }

    #[tokio::test]
    async fn test_query_by_symbol() {
        let db = Database::in_memory().await.unwrap();
        let repo = BreakoutRepository::new(db.pool());

        repo.append(&[event("BTCUSDT", 2, "BIG"), event("ETHUSDT", 1, "MINI")])
            .await
            .unwrap();

        let eth = repo.query(Some("ETHUSDT"), None).await.unwrap();
        assert_eq!(eth.len(), 1);
        assert_eq!(eth[0].kind, "MINI");
        assert_eq!(eth[0].volume_multiplier, 6.0);
    }
}
