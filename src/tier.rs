//! Summarization tiers and their capability table.
//!
//! Tiers are ordered `Light < Medium < Large`, so escalation is a plain
//! comparison and "never de-escalate" is `next > current`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Grams CO2e per token at the reference grid intensity.
const LIGHT_COST_PER_TOKEN: f64 = 0.000_005;
const MEDIUM_COST_PER_TOKEN: f64 = 0.000_05;
const LARGE_COST_PER_TOKEN: f64 = 0.000_5;

/// One of three interchangeable summarization capabilities.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Light,
    Medium,
    Large,
}

/// Static capability entry for a tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierProfile {
    /// Relative carbon cost, grams CO2e per token at reference intensity.
    pub cost_per_token: f64,
    /// Minimum confidence this tier is expected to reach on ordinary text.
    pub quality_floor: f64,
    /// How many leading sentences the offline extractive backend keeps.
    pub extractive_sentences: usize,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Light, Tier::Medium, Tier::Large];

    pub fn profile(self) -> TierProfile {
        match self {
            Tier::Light => TierProfile {
                cost_per_token: LIGHT_COST_PER_TOKEN,
                quality_floor: 0.4,
                extractive_sentences: 1,
            },
            Tier::Medium => TierProfile {
                cost_per_token: MEDIUM_COST_PER_TOKEN,
                quality_floor: 0.6,
                extractive_sentences: 2,
            },
            Tier::Large => TierProfile {
                cost_per_token: LARGE_COST_PER_TOKEN,
                quality_floor: 0.8,
                extractive_sentences: 3,
            },
        }
    }

    pub fn cost_per_token(self) -> f64 {
        self.profile().cost_per_token
    }

    /// The next tier up, or `None` at `Large`.
    pub fn next(self) -> Option<Tier> {
        match self {
            Tier::Light => Some(Tier::Medium),
            Tier::Medium => Some(Tier::Large),
            Tier::Large => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Light => "light",
            Tier::Medium => "medium",
            Tier::Large => "large",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Tier::Light),
            "medium" => Ok(Tier::Medium),
            "large" => Ok(Tier::Large),
            other => Err(format!("unknown tier '{other}'")),
        }
    }
}

/// Rough token estimate: four characters per token, never zero.
pub fn token_count(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_ordered() {
        assert!(Tier::Light < Tier::Medium);
        assert!(Tier::Medium < Tier::Large);
        assert_eq!(Tier::ALL.iter().max(), Some(&Tier::Large));
    }

    #[test]
    fn next_walks_up_and_stops() {
        assert_eq!(Tier::Light.next(), Some(Tier::Medium));
        assert_eq!(Tier::Medium.next(), Some(Tier::Large));
        assert_eq!(Tier::Large.next(), None);
    }

    #[test]
    fn cost_grows_with_tier() {
        assert!(Tier::Light.cost_per_token() < Tier::Medium.cost_per_token());
        assert!(Tier::Medium.cost_per_token() < Tier::Large.cost_per_token());
    }

    #[test]
    fn parse_and_display() {
        assert_eq!("Medium".parse::<Tier>().unwrap(), Tier::Medium);
        assert_eq!(Tier::Large.to_string(), "large");
        assert!("huge".parse::<Tier>().is_err());
    }

    #[test]
    fn token_count_rounds_up() {
        assert_eq!(token_count(""), 1);
        assert_eq!(token_count("abcd"), 1);
        assert_eq!(token_count("abcde"), 2);
        assert_eq!(token_count(&"x".repeat(4000)), 1000);
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&Tier::Medium).unwrap();
        assert_eq!(json, "\"medium\"");
    }
}
