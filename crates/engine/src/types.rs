//! Value types flowing through the mining pipeline

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single OHLCV observation for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    /// Bar open time (UTC)
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    pub fn open_f64(&self) -> f64 {
        self.open.to_f64().unwrap_or(0.0)
    }

    pub fn close_f64(&self) -> f64 {
        self.close.to_f64().unwrap_or(0.0)
    }

    pub fn high_f64(&self) -> f64 {
        self.high.to_f64().unwrap_or(0.0)
    }

    pub fn low_f64(&self) -> f64 {
        self.low.to_f64().unwrap_or(0.0)
    }

    pub fn volume_f64(&self) -> f64 {
        self.volume.to_f64().unwrap_or(0.0)
    }
}

/// A bar plus every derived indicator. `None` means "not enough history yet"
/// (or a guarded division), never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentedBar {
    pub bar: Bar,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub bb_width: Option<f64>,
    pub bb_position: Option<f64>,
    pub support: Option<f64>,
    pub resistance: Option<f64>,
    /// % change of close vs. the previous bar
    pub return_1: Option<f64>,
    /// % change of close vs. 24 bars earlier
    pub return_24: Option<f64>,
    /// Sample std-dev of fractional 1-bar returns
    pub volatility: Option<f64>,
    pub trend_strength: Option<f64>,
    /// Mean volume of the bars strictly before this one
    pub volume_mean: Option<f64>,
    pub volume_ratio: Option<f64>,
}

impl AugmentedBar {
    /// A bar with every derived field undefined
    pub fn bare(bar: Bar) -> Self {
        Self {
            bar,
            rsi: None,
            macd: None,
            macd_signal: None,
            macd_histogram: None,
            bb_upper: None,
            bb_middle: None,
            bb_lower: None,
            bb_width: None,
            bb_position: None,
            support: None,
            resistance: None,
            return_1: None,
            return_24: None,
            volatility: None,
            trend_strength: None,
            volume_mean: None,
            volume_ratio: None,
        }
    }
}

/// Volume-breakout score for one bar
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakoutScore {
    /// 0..=100, `None` while the volume baseline is undefined
    pub score: Option<f64>,
    pub tier_2x: bool,
    pub tier_3x: bool,
    pub tier_5x: bool,
}

/// An augmented bar reported together with its breakout score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredBar {
    pub bar: AugmentedBar,
    pub breakout: BreakoutScore,
}

impl ScoredBar {
    pub fn close(&self) -> f64 {
        self.bar.bar.close_f64()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.bar.bar.timestamp
    }
}

/// Severity bucket of a breakout event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Mini,
    Big,
    Mega,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Mini => "MINI",
            EventKind::Big => "BIG",
            EventKind::Mega => "MEGA",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bar whose breakout score crossed the event threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakoutEvent {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub volume_multiplier: f64,
    /// % change vs. the previous bar (0 without history)
    pub price_impact_1: f64,
    /// % change vs. 24 bars earlier (0 without history)
    pub price_impact_24: f64,
    pub follow_through: f64,
    pub confidence: f64,
    /// Provenance: which bar provider produced the series
    pub exchange: String,
}
