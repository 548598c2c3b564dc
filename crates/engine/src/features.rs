//! Feature windower
//!
//! Slides over a scored series and emits one supervised-learning vector per
//! interior bar: ten trailing/current scalars plus forward-looking labels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::indicators::{pct_change, ratio};
use crate::types::ScoredBar;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Shorter series produce no vectors
    pub min_series_len: usize,
    /// Trailing bars required before the first vector (also the long mean window)
    pub long_window: usize,
    pub short_window: usize,
    /// Forward bars required after the last vector (also the long label horizon)
    pub horizon: usize,
    /// Score a future bar must exceed to count as a breakout label
    pub breakout_threshold: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            min_series_len: 50,
            long_window: 10,
            short_window: 5,
            horizon: 24,
            breakout_threshold: 70.0,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.short_window == 0 || self.short_window > self.long_window {
            return Err(PipelineError::InvalidConfig(format!(
                "short_window ({}) must be in 1..=long_window ({})",
                self.short_window, self.long_window
            )));
        }
        if self.horizon == 0 {
            return Err(PipelineError::InvalidConfig("horizon must be > 0".into()));
        }
        Ok(())
    }

    /// Indices that receive a vector on a series of `len` bars
    pub fn interior(&self, len: usize) -> std::ops::Range<usize> {
        if len < self.min_series_len {
            return 0..0;
        }
        let end = len.saturating_sub(self.horizon);
        self.long_window..end.max(self.long_window)
    }
}

/// The ten engineered scalars. `None` encodes as JSON `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePayload {
    /// Mean fractional close-to-close return between the closes inside the window
    pub return_mean_5: Option<f64>,
    pub return_mean_10: Option<f64>,
    pub volume_ratio_mean_5: Option<f64>,
    pub volume_ratio_mean_10: Option<f64>,
    pub rsi: Option<f64>,
    pub bb_position: Option<f64>,
    /// 1 when the MACD line is above its signal, else 0
    pub macd_crossover: Option<f64>,
    pub breakout_score: Option<f64>,
    pub volatility: Option<f64>,
    pub trend_strength: Option<f64>,
}

impl FeaturePayload {
    pub fn encode(&self) -> PipelineResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureLabels {
    pub breakout_next: bool,
    /// The horizon bar (i + horizon, clamped to the last bar) breaks out
    pub breakout_within_24: bool,
    /// % change to the next close, 0 at the series end
    pub return_next: f64,
    /// % change to the horizon close
    pub return_24: f64,
    /// Bars actually covered by the horizon labels; below 24 only when clamped
    pub horizon_bars: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub features: FeaturePayload,
    pub labels: FeatureLabels,
}

/// A stored feature vector with its payload decoded into flat columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub id: i64,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub features: FeaturePayload,
    pub breakout_next: bool,
    pub breakout_within_24: bool,
    pub return_next: f64,
    pub return_24: f64,
    pub horizon_bars: i64,
}

/// Lazily build vectors for every interior index. Restartable: calling again
/// on the same input yields the same sequence.
pub fn build_features<'a>(
    series: &'a [ScoredBar],
    config: &'a FeatureConfig,
) -> impl Iterator<Item = FeatureVector> + 'a {
    let range = config.interior(series.len());
    if range.is_empty() {
        debug!(
            bars = series.len(),
            required = config.min_series_len,
            "Series too short for feature vectors"
        );
    }
    range.map(move |i| feature_at(series, i, config))
}

fn feature_at(series: &[ScoredBar], i: usize, config: &FeatureConfig) -> FeatureVector {
    let current = &series[i];
    let aug = &current.bar;

    let short = &series[i - config.short_window..i];
    let long = &series[i - config.long_window..i];

    let macd_crossover = match (aug.macd, aug.macd_signal) {
        (Some(line), Some(signal)) => Some(if line > signal { 1.0 } else { 0.0 }),
        _ => None,
    };

    let features = FeaturePayload {
        return_mean_5: window_return_mean(short),
        return_mean_10: window_return_mean(long),
        volume_ratio_mean_5: mean_of(short, |b| b.bar.volume_ratio),
        volume_ratio_mean_10: mean_of(long, |b| b.bar.volume_ratio),
        rsi: aug.rsi,
        bb_position: aug.bb_position,
        macd_crossover,
        breakout_score: current.breakout.score,
        volatility: aug.volatility,
        trend_strength: aug.trend_strength,
    };

    let is_breakout = |b: &ScoredBar| {
        b.breakout
            .score
            .is_some_and(|s| s > config.breakout_threshold)
    };

    let last = series.len() - 1;
    let h = (i + config.horizon).min(last);
    let close = current.close();

    let next = series.get(i + 1);
    let labels = FeatureLabels {
        breakout_next: next.is_some_and(is_breakout),
        breakout_within_24: h > i && is_breakout(&series[h]),
        return_next: next
            .and_then(|n| pct_change(close, n.close()))
            .unwrap_or(0.0),
        return_24: if h > i {
            pct_change(close, series[h].close()).unwrap_or(0.0)
        } else {
            0.0
        },
        horizon_bars: h - i,
    };

    FeatureVector {
        symbol: aug.bar.symbol.clone(),
        timestamp: aug.bar.timestamp,
        features,
        labels,
    }
}

/// Mean of the fractional returns between consecutive closes of `bars`
fn window_return_mean(bars: &[ScoredBar]) -> Option<f64> {
    let returns: Vec<f64> = bars
        .windows(2)
        .filter_map(|w| ratio(w[1].close() - w[0].close(), w[0].close()))
        .collect();
    (!returns.is_empty()).then(|| returns.iter().sum::<f64>() / returns.len() as f64)
}

/// Mean over the defined values; `None` when none are defined
fn mean_of(bars: &[ScoredBar], field: impl Fn(&ScoredBar) -> Option<f64>) -> Option<f64> {
    let (sum, n) = bars
        .iter()
        .filter_map(field)
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}
