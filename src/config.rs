//! Configuration loaded from `ecoroute.toml`.
//!
//! [`EcorouteConfig`] holds every tunable parameter. Missing sections and
//! fields fall back to defaults, so an absent or partial file is valid.
//! The `ANTHROPIC_API_KEY` environment variable takes precedence over the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::tier::Tier;

pub const DEFAULT_CONFIG_FILE: &str = "ecoroute.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EcorouteConfig {
    pub models: ModelsConfig,
    pub router: RouterConfig,
    pub pipeline: PipelineConfig,
    pub carbon: CarbonConfig,
    pub rag: RagConfig,
    pub storage_dir: StorageDir,
}

/// Model backends for each tier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// API key for the messages endpoint. Empty means offline extractive mode.
    pub api_key: String,
    pub base_url: String,
    pub light: String,
    pub medium: String,
    pub large: String,
    pub max_tokens: u32,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.anthropic.com/v1/messages".to_string(),
            light: "claude-haiku-4-5-20251001".to_string(),
            medium: "claude-sonnet-4-5-20250929".to_string(),
            large: "claude-opus-4-6".to_string(),
            max_tokens: 1024,
        }
    }
}

impl ModelsConfig {
    pub fn model_for(&self, tier: Tier) -> &str {
        match tier {
            Tier::Light => &self.light,
            Tier::Medium => &self.medium,
            Tier::Large => &self.large,
        }
    }
}

/// Carbon router thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Grid intensity (gCO2/kWh) above which `balanced` starts at Light.
    pub high_carbon_threshold: f64,
    pub eco_confidence: f64,
    pub balanced_confidence: f64,
    pub quality_confidence: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            high_carbon_threshold: 500.0,
            eco_confidence: 0.5,
            balanced_confidence: 0.6,
            quality_confidence: 0.7,
        }
    }
}

/// Per-job execution limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Chunk tasks allowed in flight at once within one job.
    pub max_concurrent_chunks: usize,
    pub model_timeout_secs: u64,
    pub stage_timeout_secs: u64,
    /// Upper bound on a chunk's length, in characters.
    pub max_chunk_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_chunks: 8,
            model_timeout_secs: 60,
            stage_timeout_secs: 900,
            max_chunk_chars: 2000,
        }
    }
}

impl PipelineConfig {
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

/// Grid intensity settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CarbonConfig {
    /// Compute location the signal is read for.
    pub location: String,
    /// Intensity (gCO2/kWh) at which tier costs are quoted; divides the observed signal.
    pub reference_intensity: f64,
    /// Used for locations missing from `intensities`.
    pub default_intensity: f64,
    pub intensities: BTreeMap<String, f64>,
}

impl Default for CarbonConfig {
    fn default() -> Self {
        let intensities = [
            ("local", 700.0),
            ("US-VA", 420.0),
            ("IE", 300.0),
            ("US-OR", 250.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            location: "local".to_string(),
            reference_intensity: 450.0,
            default_intensity: 350.0,
            intensities,
        }
    }
}

/// Draft-verify query settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub top_k: usize,
    pub support_threshold: f64,
    pub citation_chars: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            support_threshold: 0.6,
            citation_chars: 150,
        }
    }
}

/// Root directory of the on-disk result and vector stores.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct StorageDir(pub PathBuf);

impl Default for StorageDir {
    fn default() -> Self {
        Self(PathBuf::from(".ecoroute"))
    }
}

impl EcorouteConfig {
    /// Loads `ecoroute.toml` from the current directory, or defaults if absent.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str::<EcorouteConfig>(&contents)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.is_empty() {
                config.models.api_key = key;
            }
        }

        Ok(config)
    }
}
