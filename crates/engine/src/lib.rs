//! Breakout Miner Engine — indicators, volume-breakout scoring, feature mining
//!
//! Provides:
//! - Indicator engine over OHLCV series (RSI, MACD, Bollinger, levels, volatility)
//! - Volume-breakout scorer and MINI/BIG/MEGA event detection
//! - Feature windower emitting supervised vectors with forward labels
//! - Storage gateway over the SQLite persistence crate
//! - Mining orchestrator with provider fallback and scheduling
//! - Binance-compatible kline client and CoinGecko symbol directory

pub mod api;
pub mod breakout;
pub mod error;
pub mod features;
pub mod indicators;
pub mod miner;
pub mod pipeline;
pub mod report;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use api::{BarProvider, BinanceClient, CoinGeckoClient, SymbolDirectory};
pub use breakout::{detect_breakouts, score_bar, score_breakouts, BreakoutConfig};
pub use error::{PipelineError, PipelineResult, ProviderError};
pub use features::{
    build_features, FeatureConfig, FeatureLabels, FeaturePayload, FeatureRow, FeatureVector,
};
pub use indicators::{compute_indicators, IndicatorConfig};
pub use miner::{
    ExpeditionRequest, Miner, MinerConfig, MiningProgress, MiningSnapshot, MiningStatus,
    RunResult, Schedule, SymbolOutcome,
};
pub use pipeline::{run_pipeline, PipelineConfig, PipelineOutput};
pub use report::{build_market_summary, BreakoutStatus, MarketSummary, SymbolSummary};
pub use store::{MarketActivity, MiningStore, RunStats, SqliteStore};
pub use types::*;
