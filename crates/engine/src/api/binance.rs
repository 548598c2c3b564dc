//! Binance-compatible public kline client (no authentication required)
//!
//! Works against `api.binance.com`, the `data-api.binance.vision` mirror and
//! any exchange exposing the same `/api/v3/klines` shape.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tracing::{debug, info};

use super::BarProvider;
use crate::error::ProviderError;
use crate::types::Bar;

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";
pub const VISION_BASE_URL: &str = "https://data-api.binance.vision";
const MAX_KLINES_PER_REQUEST: u32 = 1000;

/// Binance-compatible market data client
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    name: String,
    base_url: String,
}

/// Raw kline data from Binance API (array of arrays)
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct RawKline(
    i64,    // 0: Open time
    String, // 1: Open
    String, // 2: High
    String, // 3: Low
    String, // 4: Close
    String, // 5: Volume
    i64,    // 6: Close time
    String, // 7: Quote asset volume
    u64,    // 8: Number of trades
    String, // 9: Taker buy base
    String, // 10: Taker buy quote
    String, // 11: Ignore
);

impl Default for BinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BinanceClient {
    /// Create a client against api.binance.com
    pub fn new() -> Self {
        Self::with_base_url("binance", DEFAULT_BASE_URL)
    }

    /// Create a client for any Binance-compatible host. `name` is the
    /// provenance tag stored with every observation.
    pub fn with_base_url(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch one page of klines for a symbol
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Bar>> {
        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}",
            self.base_url, symbol, interval
        );

        if let Some(start) = start_time {
            url.push_str(&format!("&startTime={}", start));
        }
        if let Some(end) = end_time {
            url.push_str(&format!("&endTime={}", end));
        }

        let limit = limit.unwrap_or(500).min(MAX_KLINES_PER_REQUEST);
        url.push_str(&format!("&limit={}", limit));

        debug!(symbol, interval, provider = %self.name, "Fetching klines");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} API error {}: {}", self.name, status, body);
        }

        let raw_klines: Vec<RawKline> = response.json().await?;
        let bars = bars_from_raw(symbol, raw_klines);

        debug!(count = bars.len(), "Fetched klines");
        Ok(bars)
    }

    /// Fetch klines with automatic pagination for ranges > 1000 bars
    pub async fn get_klines_paginated(
        &self,
        symbol: &str,
        interval: &str,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<Bar>> {
        let mut all_bars: Vec<Bar> = Vec::new();
        let mut current_start = start_time;

        info!(symbol, interval, provider = %self.name, "Fetching paginated klines");

        loop {
            if current_start >= end_time {
                break;
            }

            let bars = self
                .get_klines(
                    symbol,
                    interval,
                    Some(current_start),
                    Some(end_time),
                    Some(MAX_KLINES_PER_REQUEST),
                )
                .await?;

            let Some(last) = bars.last() else {
                break;
            };

            // Move start to after the last candle's open time
            current_start = last.timestamp.timestamp_millis() + 1;
            let short_page = bars.len() < MAX_KLINES_PER_REQUEST as usize;
            all_bars.extend(bars);
            if short_page {
                break;
            }

            // Small delay to respect rate limits
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }

        // Mirrors occasionally repeat the boundary candle
        all_bars.dedup_by_key(|b| b.timestamp);

        info!(total = all_bars.len(), "Paginated kline fetch complete");
        Ok(all_bars)
    }
}

fn bars_from_raw(symbol: &str, raw: Vec<RawKline>) -> Vec<Bar> {
    raw.into_iter()
        .filter_map(|raw| {
            Some(Bar {
                symbol: symbol.to_string(),
                timestamp: DateTime::<Utc>::from_timestamp_millis(raw.0)?,
                open: Decimal::from_str(&raw.1).ok()?,
                high: Decimal::from_str(&raw.2).ok()?,
                low: Decimal::from_str(&raw.3).ok()?,
                close: Decimal::from_str(&raw.4).ok()?,
                volume: Decimal::from_str(&raw.5).ok()?,
            })
        })
        .collect()
}

#[async_trait]
impl BarProvider for BinanceClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_bars(
        &self,
        symbol: &str,
        interval: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Bar>, ProviderError> {
        self.get_klines_paginated(
            symbol,
            interval,
            since.timestamp_millis(),
            Utc::now().timestamp_millis(),
        )
        .await
        .map_err(|e| ProviderError::unavailable(&self.name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parses_kline_rows() {
        let body = r#"[
            [1700000000000, "37000.10", "37100.00", "36950.5", "37050.00", "123.456",
             1700003599999, "4567890.1", 1500, "60.1", "2222.2", "0"],
            [1700003600000, "bad", "37100.00", "36950.5", "37050.00", "1",
             1700007199999, "0", 1, "0", "0", "0"]
        ]"#;
        let raw: Vec<RawKline> = serde_json::from_str(body).unwrap();
        let bars = bars_from_raw("BTCUSDT", raw);

        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].symbol, "BTCUSDT");
        assert_eq!(bars[0].timestamp.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(bars[0].open, dec!(37000.10));
        assert_eq!(bars[0].volume, dec!(123.456));
    }

    #[test]
    fn test_base_url_is_normalized() {
        let client = BinanceClient::with_base_url("vision", "https://data-api.binance.vision/");
        assert_eq!(client.base_url(), VISION_BASE_URL);
        assert_eq!(client.name(), "vision");
    }
}
