use serde::{Deserialize, Serialize};

use crate::config::RouterConfig;
use crate::state_machine::Strategy;
use crate::tier::Tier;

/// Grid intensity observed for a job, read once when mapping starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonSignal {
    pub location: String,
    /// gCO2/kWh.
    pub intensity: f64,
    /// The intensity at which a tier's per-token cost applies unscaled.
    pub reference_intensity: f64,
}

impl CarbonSignal {
    pub fn new(location: impl Into<String>, intensity: f64, reference_intensity: f64) -> Self {
        Self {
            location: location.into(),
            intensity: intensity.max(0.0),
            reference_intensity,
        }
    }

    /// Multiplier applied to a tier's per-token cost.
    pub fn normalized_factor(&self) -> f64 {
        if self.reference_intensity <= 0.0 {
            return 1.0;
        }
        self.intensity / self.reference_intensity
    }
}

/// How far a chunk may climb, and what confidence stops the climb.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EscalationPolicy {
    pub max_tier: Tier,
    pub confidence_threshold: f64,
}

impl EscalationPolicy {
    /// Whether a result at `tier` with `confidence` should be retried one tier up.
    pub fn should_escalate(&self, tier: Tier, confidence: f64) -> bool {
        confidence < self.confidence_threshold && tier < self.max_tier
    }
}

/// Maps a strategy and the observed carbon signal to tiers.
///
/// | strategy | initial tier | ceiling |
/// |---|---|---|
/// | eco | Light | Medium |
/// | balanced | Light above the high-carbon threshold, else Medium | Large |
/// | quality | Large | Large |
#[derive(Debug, Clone)]
pub struct CarbonRouter {
    config: RouterConfig,
}

impl CarbonRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    pub fn select_initial_tier(&self, strategy: Strategy, signal: &CarbonSignal) -> Tier {
        match strategy {
            Strategy::Eco => Tier::Light,
            Strategy::Balanced if signal.intensity > self.config.high_carbon_threshold => {
                Tier::Light
            }
            Strategy::Balanced => Tier::Medium,
            Strategy::Quality => Tier::Large,
        }
    }

    pub fn escalation_policy(&self, strategy: Strategy) -> EscalationPolicy {
        match strategy {
            Strategy::Eco => EscalationPolicy {
                max_tier: Tier::Medium,
                confidence_threshold: self.config.eco_confidence,
            },
            Strategy::Balanced => EscalationPolicy {
                max_tier: Tier::Large,
                confidence_threshold: self.config.balanced_confidence,
            },
            Strategy::Quality => EscalationPolicy {
                max_tier: Tier::Large,
                confidence_threshold: self.config.quality_confidence,
            },
        }
    }
}

impl Default for CarbonRouter {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}
