//! External market-data collaborators

pub mod binance;
pub mod coingecko;

pub use binance::BinanceClient;
pub use coingecko::CoinGeckoClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ProviderError;
use crate::types::Bar;

/// Source of OHLCV bars for a symbol
#[async_trait]
pub trait BarProvider: Send + Sync {
    /// Provenance tag stored with everything mined from this provider
    fn name(&self) -> &str;

    /// Bars from `since` up to now, oldest first. Empty when the provider has
    /// no data for the symbol.
    async fn fetch_bars(
        &self,
        symbol: &str,
        interval: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Bar>, ProviderError>;
}

/// Ranked list of symbols worth mining
#[async_trait]
pub trait SymbolDirectory: Send + Sync {
    /// Up to `limit` pair symbols, largest market cap first
    async fn list_candidate_symbols(&self, limit: usize) -> Result<Vec<String>, ProviderError>;
}
