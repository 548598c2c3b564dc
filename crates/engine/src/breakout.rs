//! Volume-breakout scoring and event detection

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::indicators::{pct_change, EPSILON};
use crate::types::{AugmentedBar, BreakoutEvent, BreakoutScore, EventKind, ScoredBar};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakoutConfig {
    /// Volume multiples of the rolling mean for the 2x/3x/5x tiers
    pub tier_2x: f64,
    pub tier_3x: f64,
    pub tier_5x: f64,
    /// Slope of the interpolated band between 1x and the 2x tier
    pub interpolation_slope: f64,
    /// Events require a score strictly above this
    pub event_threshold: f64,
    /// Score at or above which an event is MEGA
    pub mega_score: f64,
    /// Score at or above which an event is BIG
    pub big_score: f64,
    /// Look-back for the long price impact
    pub impact_bars: usize,
    /// Only scan the trailing N bars for events. `None` scans the full series.
    pub event_window: Option<usize>,
}

impl Default for BreakoutConfig {
    fn default() -> Self {
        Self {
            tier_2x: 2.0,
            tier_3x: 3.0,
            tier_5x: 5.0,
            interpolation_slope: 40.0,
            event_threshold: 70.0,
            mega_score: 95.0,
            big_score: 85.0,
            impact_bars: 24,
            event_window: None,
        }
    }
}

impl BreakoutConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if !(1.0 < self.tier_2x && self.tier_2x < self.tier_3x && self.tier_3x < self.tier_5x) {
            return Err(PipelineError::InvalidConfig(format!(
                "tier multipliers must increase above 1: {}/{}/{}",
                self.tier_2x, self.tier_3x, self.tier_5x
            )));
        }
        if !(self.big_score <= self.mega_score) {
            return Err(PipelineError::InvalidConfig(
                "big_score must not exceed mega_score".into(),
            ));
        }
        if self.impact_bars == 0 {
            return Err(PipelineError::InvalidConfig("impact_bars must be > 0".into()));
        }
        if self.event_window == Some(0) {
            return Err(PipelineError::InvalidConfig("event_window must be > 0".into()));
        }
        Ok(())
    }
}

/// Score one bar from its volume ratio. First match wins:
///
/// | ratio      | score                  |
/// |------------|------------------------|
/// | >= 5       | 100                    |
/// | >= 3       | 85                     |
/// | >= 2       | 70                     |
/// | > 1        | min(100, 40 * ratio)   |
/// | otherwise  | 0                      |
pub fn score_bar(bar: &AugmentedBar, config: &BreakoutConfig) -> BreakoutScore {
    let (Some(mean), Some(ratio)) = (bar.volume_mean, bar.volume_ratio) else {
        return BreakoutScore::default();
    };
    if mean <= EPSILON {
        return BreakoutScore::default();
    }

    let score = if ratio >= config.tier_5x {
        100.0
    } else if ratio >= config.tier_3x {
        85.0
    } else if ratio >= config.tier_2x {
        70.0
    } else if ratio > 1.0 {
        (config.interpolation_slope * ratio).min(100.0)
    } else {
        0.0
    };

    BreakoutScore {
        score: Some(score),
        tier_2x: ratio >= config.tier_2x,
        tier_3x: ratio >= config.tier_3x,
        tier_5x: ratio >= config.tier_5x,
    }
}

/// Attach a breakout score to every bar
pub fn score_breakouts(bars: Vec<AugmentedBar>, config: &BreakoutConfig) -> Vec<ScoredBar> {
    bars.into_iter()
        .map(|bar| {
            let breakout = score_bar(&bar, config);
            ScoredBar { bar, breakout }
        })
        .collect()
}

fn classify(score: f64, config: &BreakoutConfig) -> EventKind {
    if score >= config.mega_score {
        EventKind::Mega
    } else if score >= config.big_score {
        EventKind::Big
    } else {
        EventKind::Mini
    }
}

/// Emit an event for every bar whose score exceeds the threshold, in
/// timestamp order.
pub fn detect_breakouts(
    series: &[ScoredBar],
    exchange: &str,
    config: &BreakoutConfig,
) -> Vec<BreakoutEvent> {
    let start = config
        .event_window
        .map(|w| series.len().saturating_sub(w))
        .unwrap_or(0);

    let mut events = Vec::new();
    for i in start..series.len() {
        let current = &series[i];
        let Some(score) = current.breakout.score else {
            continue;
        };
        if score <= config.event_threshold {
            continue;
        }

        let close = current.close();
        let price_impact_1 = i
            .checked_sub(1)
            .and_then(|p| pct_change(series[p].close(), close))
            .unwrap_or(0.0);
        let price_impact_24 = i
            .checked_sub(config.impact_bars)
            .and_then(|p| pct_change(series[p].close(), close))
            .unwrap_or(0.0);

        let volume_multiplier = match current.bar.volume_mean {
            Some(mean) if mean > EPSILON => current.bar.bar.volume_f64() / mean,
            _ => 1.0,
        };

        let event = BreakoutEvent {
            symbol: current.bar.bar.symbol.clone(),
            timestamp: current.timestamp(),
            kind: classify(score, config),
            volume_multiplier,
            price_impact_1,
            price_impact_24,
            follow_through: (10.0 * price_impact_1.abs()).min(100.0),
            confidence: score.min(100.0),
            exchange: exchange.to_string(),
        };
        debug!(
            symbol = %event.symbol,
            kind = %event.kind,
            multiplier = format!("{:.2}", volume_multiplier),
            "Breakout detected"
        );
        events.push(event);
    }
    events
}
