//! Bars in, scored series + events + feature vectors out

use serde::{Deserialize, Serialize};

use crate::breakout::{detect_breakouts, score_breakouts, BreakoutConfig};
use crate::error::PipelineResult;
use crate::features::{build_features, FeatureConfig, FeatureVector};
use crate::indicators::{compute_indicators, IndicatorConfig};
use crate::types::{Bar, BreakoutEvent, ScoredBar};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub breakout: BreakoutConfig,
    #[serde(default)]
    pub features: FeatureConfig,
}

impl PipelineConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        self.indicators.validate()?;
        self.breakout.validate()?;
        self.features.validate()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub scored: Vec<ScoredBar>,
    pub events: Vec<BreakoutEvent>,
    pub features: Vec<FeatureVector>,
}

/// Run one symbol's series through indicators, scoring, event detection and
/// feature windowing.
pub fn run_pipeline(
    bars: &[Bar],
    exchange: &str,
    config: &PipelineConfig,
) -> PipelineResult<PipelineOutput> {
    config.validate()?;
    let augmented = compute_indicators(bars, &config.indicators)?;
    let scored = score_breakouts(augmented, &config.breakout);
    let events = detect_breakouts(&scored, exchange, &config.breakout);
    let features = build_features(&scored, &config.features).collect();

    Ok(PipelineOutput {
        scored,
        events,
        features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::indicators::tests::make_bars;
    use crate::types::EventKind;

    #[test]
    fn test_single_spike_end_to_end() {
        let mut volumes = vec![100.0; 100];
        volumes[50] = 600.0;
        let closes: Vec<f64> = (0..100)
            .map(|i| 100.0 + 5.0 * ((i as f64) * 0.3).sin())
            .collect();
        let bars = make_bars(&closes, &volumes);

        let out = run_pipeline(&bars, "binance", &PipelineConfig::default()).unwrap();
        assert_eq!(out.scored.len(), 100);
        assert_eq!(out.features.len(), 66);

        let spike = &out.scored[50].breakout;
        assert_eq!(spike.score, Some(100.0));
        assert!(spike.tier_2x && spike.tier_3x && spike.tier_5x);

        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].kind, EventKind::Mega);
        assert_eq!(out.events[0].timestamp, bars[50].timestamp);
    }

    #[test]
    fn test_flat_series_is_quiet() {
        let bars = make_bars(&vec![100.0; 60], &vec![100.0; 60]);
        let out = run_pipeline(&bars, "binance", &PipelineConfig::default()).unwrap();

        for s in &out.scored[34..] {
            let rsi = s.bar.rsi.unwrap();
            assert!((rsi - 50.0).abs() < 1e-6, "rsi was {rsi}");
            let hist = s.bar.macd_histogram.unwrap();
            assert!(hist.abs() < 1e-9);
            assert!(s.bar.bb_width.unwrap().abs() < 1e-9);
            assert_eq!(s.breakout.score, Some(0.0));
        }
        assert!(out.events.is_empty());
        assert_eq!(out.features.len(), 26);
    }

    #[test]
    fn test_invalid_series_propagates() {
        let err = run_pipeline(&[], "binance", &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSeries(_)));
    }
}
