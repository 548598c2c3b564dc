//! Storage gateway: the write/read contract the miner depends on, and its
//! SQLite implementation over the persistence crate.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use persistence::repository::{
    BreakoutEventRecord, BreakoutRepository, EventKindCounts, FeatureRepository,
    FeatureVectorRecord, ObservationRecord, ObservationRepository, RunStatsRecord,
    RunStatsRepository, SummaryRepository, SymbolActivity,
};
use persistence::Database;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::features::{FeaturePayload, FeatureRow, FeatureVector};
use crate::types::{BreakoutEvent, ScoredBar};

/// Aggregate counters for one orchestration run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub run_id: String,
    pub symbols_processed: usize,
    pub errors: usize,
    pub elapsed_seconds: f64,
    pub observations_written: usize,
    pub events_found: usize,
    pub feature_vectors_written: usize,
}

impl RunStats {
    /// Processed share of attempted symbols, in percent
    pub fn success_rate(&self) -> f64 {
        let attempted = self.symbols_processed + self.errors;
        if attempted == 0 {
            return 0.0;
        }
        self.symbols_processed as f64 / attempted as f64 * 100.0
    }
}

/// Raw aggregates behind the market summary
#[derive(Debug, Clone, Default)]
pub struct MarketActivity {
    pub symbols: Vec<SymbolActivity>,
    pub events: EventKindCounts,
}

#[async_trait]
pub trait MiningStore: Send + Sync {
    async fn append_observations(
        &self,
        symbol: &str,
        exchange: &str,
        series: &[ScoredBar],
    ) -> PipelineResult<usize>;

    async fn append_breakout_events(&self, events: &[BreakoutEvent]) -> PipelineResult<usize>;

    async fn append_feature_vectors(&self, vectors: &[FeatureVector]) -> PipelineResult<usize>;

    async fn record_run_stats(&self, stats: &RunStats) -> PipelineResult<()>;

    /// Ordered by (symbol, timestamp)
    async fn query_observations(
        &self,
        symbol: Option<&str>,
        since_days: Option<u32>,
    ) -> PipelineResult<Vec<ObservationRecord>>;

    async fn query_feature_vectors(
        &self,
        symbol: Option<&str>,
        since_days: Option<u32>,
    ) -> PipelineResult<Vec<FeatureRow>>;

    async fn query_breakout_events(
        &self,
        symbol: Option<&str>,
        since_days: Option<u32>,
    ) -> PipelineResult<Vec<BreakoutEventRecord>>;

    /// Most recent runs first
    async fn recent_runs(&self, limit: usize) -> PipelineResult<Vec<RunStatsRecord>>;

    /// Highest-volume symbols and event counts over the trailing window
    async fn market_activity(&self, top_n: usize, window_hours: u32)
        -> PipelineResult<MarketActivity>;
}

pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

fn observation_record(symbol: &str, exchange: &str, s: &ScoredBar) -> ObservationRecord {
    let aug = &s.bar;
    let bar = &aug.bar;
    ObservationRecord {
        id: None,
        symbol: symbol.to_string(),
        timestamp: bar.timestamp.timestamp_millis(),
        open: bar.open_f64(),
        high: bar.high_f64(),
        low: bar.low_f64(),
        close: bar.close_f64(),
        volume: bar.volume_f64(),
        rsi: aug.rsi,
        macd: aug.macd,
        macd_signal: aug.macd_signal,
        macd_histogram: aug.macd_histogram,
        bb_upper: aug.bb_upper,
        bb_middle: aug.bb_middle,
        bb_lower: aug.bb_lower,
        bb_width: aug.bb_width,
        bb_position: aug.bb_position,
        support: aug.support,
        resistance: aug.resistance,
        return_1: aug.return_1,
        return_24: aug.return_24,
        volatility: aug.volatility,
        trend_strength: aug.trend_strength,
        volume_mean: aug.volume_mean,
        volume_ratio: aug.volume_ratio,
        breakout_score: s.breakout.score,
        tier_2x: s.breakout.tier_2x,
        tier_3x: s.breakout.tier_3x,
        tier_5x: s.breakout.tier_5x,
        exchange: exchange.to_string(),
    }
}

fn event_record(e: &BreakoutEvent) -> BreakoutEventRecord {
    BreakoutEventRecord {
        id: None,
        symbol: e.symbol.clone(),
        timestamp: e.timestamp.timestamp_millis(),
        kind: e.kind.as_str().to_string(),
        volume_multiplier: e.volume_multiplier,
        price_impact_1: e.price_impact_1,
        price_impact_24: e.price_impact_24,
        follow_through: e.follow_through,
        confidence: e.confidence,
        exchange: e.exchange.clone(),
    }
}

fn feature_record(v: &FeatureVector) -> PipelineResult<FeatureVectorRecord> {
    Ok(FeatureVectorRecord {
        id: None,
        symbol: v.symbol.clone(),
        timestamp: v.timestamp.timestamp_millis(),
        payload: v.features.encode()?,
        breakout_next: v.labels.breakout_next,
        breakout_within_24: v.labels.breakout_within_24,
        return_next: v.labels.return_next,
        return_24: v.labels.return_24,
        horizon_bars: v.labels.horizon_bars as i64,
    })
}

fn feature_row(r: FeatureVectorRecord) -> PipelineResult<FeatureRow> {
    let timestamp = DateTime::<Utc>::from_timestamp_millis(r.timestamp).ok_or_else(|| {
        PipelineError::InvalidSeries(format!("stored timestamp out of range: {}", r.timestamp))
    })?;
    Ok(FeatureRow {
        id: r.id.unwrap_or_default(),
        symbol: r.symbol,
        timestamp,
        features: FeaturePayload::decode(&r.payload)?,
        breakout_next: r.breakout_next,
        breakout_within_24: r.breakout_within_24,
        return_next: r.return_next,
        return_24: r.return_24,
        horizon_bars: r.horizon_bars,
    })
}

#[async_trait]
impl MiningStore for SqliteStore {
    async fn append_observations(
        &self,
        symbol: &str,
        exchange: &str,
        series: &[ScoredBar],
    ) -> PipelineResult<usize> {
        let records: Vec<ObservationRecord> = series
            .iter()
            .map(|s| observation_record(symbol, exchange, s))
            .collect();
        let written = ObservationRepository::new(self.db.pool())
            .append(&records)
            .await?;
        debug!(symbol, written, "Observations appended");
        Ok(written)
    }

    async fn append_breakout_events(&self, events: &[BreakoutEvent]) -> PipelineResult<usize> {
        let records: Vec<BreakoutEventRecord> = events.iter().map(event_record).collect();
        Ok(BreakoutRepository::new(self.db.pool())
            .append(&records)
            .await?)
    }

    async fn append_feature_vectors(&self, vectors: &[FeatureVector]) -> PipelineResult<usize> {
        let records = vectors
            .iter()
            .map(feature_record)
            .collect::<PipelineResult<Vec<_>>>()?;
        Ok(FeatureRepository::new(self.db.pool())
            .append(&records)
            .await?)
    }

    async fn record_run_stats(&self, stats: &RunStats) -> PipelineResult<()> {
        let record = RunStatsRecord {
            id: None,
            run_id: stats.run_id.clone(),
            symbols_processed: stats.symbols_processed as i64,
            errors: stats.errors as i64,
            elapsed_seconds: stats.elapsed_seconds,
            success_rate: stats.success_rate(),
            observations_written: stats.observations_written as i64,
            events_found: stats.events_found as i64,
            feature_vectors_written: stats.feature_vectors_written as i64,
            created_at: None,
        };
        RunStatsRepository::new(self.db.pool())
            .record(&record)
            .await?;
        Ok(())
    }

    async fn query_observations(
        &self,
        symbol: Option<&str>,
        since_days: Option<u32>,
    ) -> PipelineResult<Vec<ObservationRecord>> {
        let since = since_days.map(persistence::cutoff_millis);
        Ok(ObservationRepository::new(self.db.pool())
            .query(symbol, since)
            .await?)
    }

    async fn query_feature_vectors(
        &self,
        symbol: Option<&str>,
        since_days: Option<u32>,
    ) -> PipelineResult<Vec<FeatureRow>> {
        let since = since_days.map(persistence::cutoff_millis);
        FeatureRepository::new(self.db.pool())
            .query(symbol, since)
            .await?
            .into_iter()
            .map(feature_row)
            .collect()
    }

    async fn query_breakout_events(
        &self,
        symbol: Option<&str>,
        since_days: Option<u32>,
    ) -> PipelineResult<Vec<BreakoutEventRecord>> {
        let since = since_days.map(persistence::cutoff_millis);
        Ok(BreakoutRepository::new(self.db.pool())
            .query(symbol, since)
            .await?)
    }

    async fn recent_runs(&self, limit: usize) -> PipelineResult<Vec<RunStatsRecord>> {
        Ok(RunStatsRepository::new(self.db.pool())
            .recent(limit as i64)
            .await?)
    }

    async fn market_activity(
        &self,
        top_n: usize,
        window_hours: u32,
    ) -> PipelineResult<MarketActivity> {
        let since = persistence::cutoff_millis_hours(window_hours);
        let symbols = SummaryRepository::new(self.db.pool())
            .top_symbols_by_volume(since, top_n as i64)
            .await?;
        let events = BreakoutRepository::new(self.db.pool())
            .count_by_kind(since)
            .await?;
        Ok(MarketActivity { symbols, events })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{run_pipeline, PipelineConfig};
    use crate::types::Bar;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    async fn store() -> SqliteStore {
        SqliteStore::new(Arc::new(Database::in_memory().await.unwrap()))
    }

    /// Hourly bars ending one hour ago, so day-window queries include them
    fn recent_bars(n: usize, spike_at: Option<usize>) -> Vec<Bar> {
        let now = DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap();
        let start = now - Duration::hours(n as i64 + 1);
        (0..n)
            .map(|i| {
                let close = dec!(100) + rust_decimal::Decimal::from(i as i64);
                Bar {
                    symbol: "ETHUSDT".to_string(),
                    timestamp: start + Duration::hours(i as i64),
                    open: close,
                    high: close + dec!(1),
                    low: close - dec!(1),
                    close,
                    volume: if Some(i) == spike_at { dec!(600) } else { dec!(100) },
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_round_trips_all_tables() {
        let store = store().await;
        let bars = recent_bars(60, Some(40));
        let out = run_pipeline(&bars, "binance", &PipelineConfig::default()).unwrap();

        let n = store
            .append_observations("ETHUSDT", "binance", &out.scored)
            .await
            .unwrap();
        assert_eq!(n, 60);
        assert_eq!(store.append_breakout_events(&out.events).await.unwrap(), 1);
        assert_eq!(
            store.append_feature_vectors(&out.features).await.unwrap(),
            26
        );

        let observations = store
            .query_observations(Some("ETHUSDT"), Some(7))
            .await
            .unwrap();
        assert_eq!(observations.len(), 60);
        assert_eq!(observations[40].breakout_score, Some(100.0));
        assert!(observations[40].tier_5x);
        assert_eq!(observations[0].rsi, None);

        let rows = store.query_feature_vectors(None, None).await.unwrap();
        assert_eq!(rows.len(), 26);
        assert_eq!(rows[0].features, out.features[0].features);
        assert_eq!(rows[0].timestamp, out.features[0].timestamp);
        assert_eq!(rows[0].horizon_bars, 24);

        let events = store
            .query_breakout_events(Some("ETHUSDT"), Some(7))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "MEGA");
        assert_eq!(events[0].timestamp, out.events[0].timestamp.timestamp_millis());
        assert!(store
            .query_breakout_events(Some("BTCUSDT"), None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_observations_are_both_kept() {
        let store = store().await;
        let bars = recent_bars(1, None);
        let out = run_pipeline(&bars, "binance", &PipelineConfig::default()).unwrap();

        store
            .append_observations("ETHUSDT", "binance", &out.scored)
            .await
            .unwrap();
        store
            .append_observations("ETHUSDT", "binance", &out.scored)
            .await
            .unwrap();

        let rows = store
            .query_observations(Some("ETHUSDT"), Some(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].close, rows[1].close);
        assert_eq!(rows[0].timestamp, rows[1].timestamp);
    }

    #[tokio::test]
    async fn test_market_activity_counts_events() {
        let store = store().await;
        let bars = recent_bars(30, Some(25));
        let out = run_pipeline(&bars, "binance", &PipelineConfig::default()).unwrap();
        store
            .append_observations("ETHUSDT", "binance", &out.scored)
            .await
            .unwrap();
        store.append_breakout_events(&out.events).await.unwrap();

        let activity = store.market_activity(5, 48).await.unwrap();
        assert_eq!(activity.symbols.len(), 1);
        assert_eq!(activity.symbols[0].symbol, "ETHUSDT");
        assert_eq!(activity.events.mega, 1);
        assert_eq!(activity.events.big, 0);
    }

    #[test]
    fn test_success_rate() {
        let stats = RunStats {
            symbols_processed: 3,
            errors: 1,
            ..Default::default()
        };
        assert_eq!(stats.success_rate(), 75.0);
        assert_eq!(RunStats::default().success_rate(), 0.0);
    }
}
