//! CoinGecko public markets endpoint, used to pick which symbols to mine

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, info};

use super::SymbolDirectory;
use crate::error::ProviderError;

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com";
/// The endpoint caps `per_page` at 250
const MAX_PER_PAGE: usize = 250;
const QUOTE_ASSET: &str = "USDT";

#[derive(Clone)]
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketCoin {
    pub id: String,
    pub symbol: String,
    #[serde(default)]
    pub market_cap: Option<f64>,
}

impl Default for CoinGeckoClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl CoinGeckoClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Coins ordered by market cap, descending
    pub async fn get_markets(&self, per_page: usize) -> Result<Vec<MarketCoin>> {
        let url = format!(
            "{}/api/v3/coins/markets?vs_currency=usd&order=market_cap_desc&per_page={}&page=1&sparkline=false",
            self.base_url,
            per_page.clamp(1, MAX_PER_PAGE)
        );

        debug!(per_page, "Fetching CoinGecko markets");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("CoinGecko API error {}: {}", status, body);
        }

        Ok(response.json().await?)
    }
}

/// Map coins to `<BASE>USDT` pairs in rank order, skipping the quote asset
/// itself and repeated tickers.
pub fn symbols_from_markets(coins: &[MarketCoin], limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    coins
        .iter()
        .map(|c| c.symbol.trim().to_uppercase())
        .filter(|base| !base.is_empty() && base != QUOTE_ASSET)
        .filter(|base| seen.insert(base.clone()))
        .map(|base| format!("{base}{QUOTE_ASSET}"))
        .take(limit)
        .collect()
}

#[async_trait]
impl SymbolDirectory for CoinGeckoClient {
    async fn list_candidate_symbols(&self, limit: usize) -> Result<Vec<String>, ProviderError> {
        // Over-fetch a little: some entries are dropped by the mapping
        let coins = self
            .get_markets(limit + 10)
            .await
            .map_err(|e| ProviderError::unavailable("coingecko", e))?;
        let symbols = symbols_from_markets(&coins, limit);
        info!(count = symbols.len(), "Candidate symbols listed");
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbols_from_markets() {
        let body = r#"[
            {"id": "bitcoin", "symbol": "btc", "market_cap": 1.3e12},
            {"id": "tether", "symbol": "usdt", "market_cap": 1.1e11},
            {"id": "ethereum", "symbol": "eth", "market_cap": 4.0e11},
            {"id": "bridged-ether", "symbol": "eth", "market_cap": null},
            {"id": "solana", "symbol": "sol"}
        ]"#;
        let coins: Vec<MarketCoin> = serde_json::from_str(body).unwrap();

        assert_eq!(
            symbols_from_markets(&coins, 10),
            vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]
        );
        assert_eq!(symbols_from_markets(&coins, 2), vec!["BTCUSDT", "ETHUSDT"]);
    }
}
