//! Error taxonomy for the mining pipeline

use persistence::DbError;
use thiserror::Error;

/// Failure of an external bar provider or symbol directory
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("no provider returned bars for {symbol}")]
    Exhausted { symbol: String },
}

impl ProviderError {
    pub fn unavailable(provider: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed input: empty, mixed symbols or out-of-order timestamps
    #[error("invalid series: {0}")]
    InvalidSeries(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(#[from] ProviderError),

    #[error("persistence failure: {0}")]
    Persistence(#[from] DbError),

    #[error("feature payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
