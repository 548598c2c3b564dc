//! Indicator engine
//!
//! Turns an ordered bar series into `AugmentedBar`s. Every indicator is fed
//! bar-by-bar, so the value at index `i` only ever sees bars `0..=i`; the
//! volume baseline is built from bars strictly before `i`.
//!
//! Streaming indicators (RSI, MACD, Bollinger, SMA, rolling min/max) come from
//! the `ta` crate. Their early outputs are masked until the indicator's
//! lookback is satisfied.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use ta::indicators::{
    BollingerBands, Maximum, Minimum, MovingAverageConvergenceDivergence, RelativeStrengthIndex,
    SimpleMovingAverage,
};
use ta::Next;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{AugmentedBar, Bar};

/// Magnitudes at or below this are treated as zero in guarded divisions
pub(crate) const EPSILON: f64 = 1e-12;

/// Window sizes for every derived field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bb_period: usize,
    /// Band half-width in standard deviations
    pub bb_multiplier: f64,
    /// Support/resistance lookback
    pub level_window: usize,
    pub volatility_window: usize,
    /// SMA period used for trend strength
    pub trend_window: usize,
    /// Number of prior bars averaged into the volume baseline
    pub volume_window: usize,
    /// Horizon of the long return (`return_24`)
    pub long_return_bars: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bb_period: 20,
            bb_multiplier: 2.0,
            level_window: 20,
            volatility_window: 20,
            trend_window: 10,
            volume_window: 20,
            long_return_bars: 24,
        }
    }
}

impl IndicatorConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        let windows = [
            ("rsi_period", self.rsi_period),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
            ("bb_period", self.bb_period),
            ("level_window", self.level_window),
            ("trend_window", self.trend_window),
            ("volume_window", self.volume_window),
            ("long_return_bars", self.long_return_bars),
        ];
        if let Some((name, _)) = windows.iter().find(|(_, w)| *w == 0) {
            return Err(PipelineError::InvalidConfig(format!("{name} must be > 0")));
        }
        if self.volatility_window < 2 {
            return Err(PipelineError::InvalidConfig(
                "volatility_window must be >= 2".into(),
            ));
        }
        if self.macd_fast >= self.macd_slow {
            return Err(PipelineError::InvalidConfig(format!(
                "macd_fast ({}) must be < macd_slow ({})",
                self.macd_fast, self.macd_slow
            )));
        }
        if !self.bb_multiplier.is_finite() || self.bb_multiplier <= 0.0 {
            return Err(PipelineError::InvalidConfig(
                "bb_multiplier must be positive".into(),
            ));
        }
        Ok(())
    }

    /// First index at which the MACD signal line is reported
    pub fn macd_warmup(&self) -> usize {
        self.macd_slow + self.macd_signal - 2
    }
}

/// Check the series invariants: non-empty, one symbol, strictly increasing
/// timestamps, non-negative volume.
pub fn validate_series(series: &[Bar]) -> PipelineResult<()> {
    let first = series
        .first()
        .ok_or_else(|| PipelineError::InvalidSeries("empty series".into()))?;

    for (i, bar) in series.iter().enumerate() {
        if bar.symbol != first.symbol {
            return Err(PipelineError::InvalidSeries(format!(
                "mixed symbols at index {i}: {} vs {}",
                bar.symbol, first.symbol
            )));
        }
        if bar.volume.is_sign_negative() && !bar.volume.is_zero() {
            return Err(PipelineError::InvalidSeries(format!(
                "negative volume at index {i}"
            )));
        }
        if i > 0 && bar.timestamp <= series[i - 1].timestamp {
            return Err(PipelineError::InvalidSeries(format!(
                "timestamps not strictly increasing at index {i} ({} after {})",
                bar.timestamp,
                series[i - 1].timestamp
            )));
        }
    }
    Ok(())
}

/// Compute every indicator for the series. Output has the same length as input.
pub fn compute_indicators(
    series: &[Bar],
    config: &IndicatorConfig,
) -> PipelineResult<Vec<AugmentedBar>> {
    config.validate()?;
    validate_series(series)?;

    let mut rsi = ta_checked(RelativeStrengthIndex::new(config.rsi_period))?;
    let mut macd = ta_checked(MovingAverageConvergenceDivergence::new(
        config.macd_fast,
        config.macd_slow,
        config.macd_signal,
    ))?;
    let mut bands = ta_checked(BollingerBands::new(config.bb_period, config.bb_multiplier))?;
    let mut lows = ta_checked(Minimum::new(config.level_window))?;
    let mut highs = ta_checked(Maximum::new(config.level_window))?;
    let mut trend_sma = ta_checked(SimpleMovingAverage::new(config.trend_window))?;

    let mut returns = RollingWindow::new(config.volatility_window);
    let mut prior_volumes = RollingWindow::new(config.volume_window);
    let mut prev_sma: Option<f64> = None;

    let macd_warmup = config.macd_warmup();
    let mut out = Vec::with_capacity(series.len());

    for (i, bar) in series.iter().enumerate() {
        let close = bar.close_f64();
        let volume = bar.volume_f64();

        let rsi_val = rsi.next(close);
        let macd_out = macd.next(close);
        let bb = bands.next(close);
        let support = lows.next(bar.low_f64());
        let resistance = highs.next(bar.high_f64());
        let sma = trend_sma.next(close);

        let mut aug = AugmentedBar::bare(bar.clone());

        if i >= config.rsi_period {
            aug.rsi = finite(rsi_val);
        }

        if i >= macd_warmup {
            aug.macd = finite(macd_out.macd);
            aug.macd_signal = finite(macd_out.signal);
            aug.macd_histogram = finite(macd_out.histogram);
        }

        if i + 1 >= config.bb_period {
            aug.bb_upper = finite(bb.upper);
            aug.bb_middle = finite(bb.average);
            aug.bb_lower = finite(bb.lower);
            let spread = bb.upper - bb.lower;
            aug.bb_width = ratio(spread, bb.average);
            if spread.abs() > EPSILON * bb.average.abs().max(1.0) {
                aug.bb_position = ratio(close - bb.lower, spread);
            }
        }

        if i + 1 >= config.level_window {
            aug.support = finite(support);
            aug.resistance = finite(resistance);
        }

        if i >= 1 {
            let prev_close = series[i - 1].close_f64();
            aug.return_1 = pct_change(prev_close, close);
            if let Some(r) = ratio(close - prev_close, prev_close) {
                returns.push(r);
            }
        }
        if i >= config.long_return_bars {
            aug.return_24 = pct_change(series[i - config.long_return_bars].close_f64(), close);
        }

        if returns.is_full() {
            aug.volatility = returns.sample_std().and_then(finite);
        }

        if i + 1 >= config.trend_window {
            if let Some(prev) = prev_sma {
                aug.trend_strength = ratio(sma - prev, prev).map(f64::abs);
            }
            prev_sma = Some(sma);
        }

        // Baseline from prior bars only, then admit the current volume
        if prior_volumes.is_full() {
            if let Some(mean) = prior_volumes.mean() {
                aug.volume_mean = finite(mean);
                aug.volume_ratio = ratio(volume, mean);
            }
        }
        prior_volumes.push(volume);

        out.push(aug);
    }

    debug!(
        symbol = %series[0].symbol,
        bars = out.len(),
        "Indicators computed"
    );
    Ok(out)
}

fn ta_checked<T, E: std::fmt::Debug>(built: Result<T, E>) -> PipelineResult<T> {
    built.map_err(|e| PipelineError::InvalidConfig(format!("{e:?}")))
}

/// `num / den`, undefined when the denominator is ~0 or the result non-finite
pub(crate) fn ratio(num: f64, den: f64) -> Option<f64> {
    if den.abs() <= EPSILON {
        return None;
    }
    finite(num / den)
}

/// Percent change from `from` to `to`
pub(crate) fn pct_change(from: f64, to: f64) -> Option<f64> {
    ratio(to - from, from).map(|r| r * 100.0)
}

pub(crate) fn finite(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}

/// Fixed-capacity trailing window of samples
struct RollingWindow {
    capacity: usize,
    values: VecDeque<f64>,
}

impl RollingWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity + 1),
        }
    }

    fn push(&mut self, value: f64) {
        self.values.push_back(value);
        if self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    /// Sample (n - 1) standard deviation
    fn sample_std(&self) -> Option<f64> {
        let n = self.values.len();
        if n < 2 {
            return None;
        }
        let mean = self.mean()?;
        let var = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        Some(var.max(0.0).sqrt())
    }
}
