//! Market summary: a read-only projection over stored observations and events

use chrono::{DateTime, Utc};
use persistence::repository::{EventKindCounts, SymbolActivity};
use serde::{Deserialize, Serialize};

use crate::error::PipelineResult;
use crate::store::{MarketActivity, MiningStore};

/// Breakout status derived from a symbol's average score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakoutStatus {
    Mega,
    Big,
    Mini,
    Building,
}

impl BreakoutStatus {
    pub fn from_score(score: Option<f64>) -> Self {
        match score {
            Some(s) if s >= 95.0 => BreakoutStatus::Mega,
            Some(s) if s >= 85.0 => BreakoutStatus::Big,
            Some(s) if s >= 70.0 => BreakoutStatus::Mini,
            _ => BreakoutStatus::Building,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolSummary {
    pub symbol: String,
    pub latest_price: f64,
    /// Summed volume over the window
    pub volume: f64,
    pub avg_breakout_score: Option<f64>,
    pub avg_rsi: Option<f64>,
    pub avg_macd: Option<f64>,
    pub status: BreakoutStatus,
    pub observations: i64,
    pub last_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSummary {
    pub generated_at: DateTime<Utc>,
    pub window_hours: u32,
    pub symbols_tracked: usize,
    pub symbols: Vec<SymbolSummary>,
    pub total_volume: f64,
    /// Mean of the per-symbol average scores that are defined
    pub avg_breakout_score: Option<f64>,
    /// Symbol with the highest average score
    pub most_active: Option<String>,
    pub events: EventKindCounts,
}

fn symbol_summary(a: SymbolActivity) -> SymbolSummary {
    SymbolSummary {
        status: BreakoutStatus::from_score(a.avg_breakout_score),
        last_timestamp: DateTime::<Utc>::from_timestamp_millis(a.last_timestamp)
            .unwrap_or_default(),
        symbol: a.symbol,
        latest_price: a.latest_price,
        volume: a.total_volume,
        avg_breakout_score: a.avg_breakout_score,
        avg_rsi: a.avg_rsi,
        avg_macd: a.avg_macd,
        observations: a.observations,
    }
}

/// Assemble the summary from raw aggregates
pub fn summarize(activity: MarketActivity, window_hours: u32) -> MarketSummary {
    let symbols: Vec<SymbolSummary> = activity.symbols.into_iter().map(symbol_summary).collect();

    let total_volume = symbols.iter().map(|s| s.volume).sum();
    let scores: Vec<(&str, f64)> = symbols
        .iter()
        .filter_map(|s| s.avg_breakout_score.map(|v| (s.symbol.as_str(), v)))
        .collect();
    let avg_breakout_score =
        (!scores.is_empty()).then(|| scores.iter().map(|(_, v)| v).sum::<f64>() / scores.len() as f64);
    let most_active = scores
        .iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(s, _)| s.to_string());

    MarketSummary {
        generated_at: Utc::now(),
        window_hours,
        symbols_tracked: symbols.len(),
        total_volume,
        avg_breakout_score,
        most_active,
        events: activity.events,
        symbols,
    }
}

/// Top `top_n` symbols by volume over the trailing `window_hours`
pub async fn build_market_summary(
    store: &dyn MiningStore,
    top_n: usize,
    window_hours: u32,
) -> PipelineResult<MarketSummary> {
    let activity = store.market_activity(top_n, window_hours).await?;
    Ok(summarize(activity, window_hours))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{run_pipeline, PipelineConfig};
    use crate::store::SqliteStore;
    use crate::types::Bar;
    use chrono::Duration;
    use persistence::Database;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn activity(symbol: &str, volume: f64, score: Option<f64>) -> SymbolActivity {
        SymbolActivity {
            symbol: symbol.to_string(),
            latest_price: 1.0,
            total_volume: volume,
            avg_breakout_score: score,
            avg_rsi: Some(50.0),
            avg_macd: Some(0.0),
            last_timestamp: 1_700_000_000_000,
            observations: 24,
        }
    }

    #[test]
    fn test_status_thresholds() {
        assert_eq!(BreakoutStatus::from_score(Some(95.0)), BreakoutStatus::Mega);
        assert_eq!(BreakoutStatus::from_score(Some(85.0)), BreakoutStatus::Big);
        assert_eq!(BreakoutStatus::from_score(Some(70.0)), BreakoutStatus::Mini);
        assert_eq!(BreakoutStatus::from_score(Some(69.9)), BreakoutStatus::Building);
        assert_eq!(BreakoutStatus::from_score(None), BreakoutStatus::Building);
    }

    #[test]
    fn test_totals_match_rows() {
        let summary = summarize(
            MarketActivity {
                symbols: vec![
                    activity("BTCUSDT", 300.0, Some(10.0)),
                    activity("ETHUSDT", 200.0, Some(90.0)),
                    activity("NEWUSDT", 100.0, None),
                ],
                events: EventKindCounts {
                    mega: 1,
                    big: 2,
                    mini: 3,
                },
            },
            24,
        );

        assert_eq!(summary.symbols_tracked, 3);
        assert_eq!(summary.total_volume, 600.0);
        assert_eq!(summary.avg_breakout_score, Some(50.0));
        assert_eq!(summary.most_active.as_deref(), Some("ETHUSDT"));
        assert_eq!(summary.symbols[1].status, BreakoutStatus::Big);
        assert_eq!(summary.events.big, 2);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["symbols"][2]["status"], "BUILDING");
    }

    #[tokio::test]
    async fn test_builds_from_store() {
        let store = SqliteStore::new(Arc::new(Database::in_memory().await.unwrap()));
        let start = Utc::now() - Duration::hours(30);
        let bars: Vec<Bar> = (0..30)
            .map(|i| {
                let close = Decimal::from(10 + i);
                Bar {
                    symbol: "ADAUSDT".to_string(),
                    timestamp: start + Duration::hours(i),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: Decimal::from(if i == 28 { 500 } else { 100 }),
                }
            })
            .collect();
        let out = run_pipeline(&bars, "binance", &PipelineConfig::default()).unwrap();
        store
            .append_observations("ADAUSDT", "binance", &out.scored)
            .await
            .unwrap();
        store.append_breakout_events(&out.events).await.unwrap();

        let summary = build_market_summary(&store, 10, 24).await.unwrap();
        assert_eq!(summary.symbols_tracked, 1);
        let ada = &summary.symbols[0];
        assert_eq!(ada.latest_price, 39.0);
        assert!(ada.observations <= 24);
        assert_eq!(summary.events.mega, 1);
    }
}
