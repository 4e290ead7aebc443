use std::collections::BTreeMap;

use tracing::debug;

use super::{CarbonSignalSource, ServiceFuture};
use crate::config::CarbonConfig;

/// Grid intensities from a fixed per-location table.
pub struct StaticSignalSource {
    intensities: BTreeMap<String, f64>,
    default_intensity: f64,
}

impl StaticSignalSource {
    pub fn new(intensities: BTreeMap<String, f64>, default_intensity: f64) -> Self {
        Self {
            intensities,
            default_intensity,
        }
    }

    pub fn from_config(config: &CarbonConfig) -> Self {
        Self::new(config.intensities.clone(), config.default_intensity)
    }

    /// Every location reports the same intensity.
    pub fn fixed(intensity: f64) -> Self {
        Self::new(BTreeMap::new(), intensity)
    }

    fn lookup(&self, location: &str) -> f64 {
        match self.intensities.get(location) {
            Some(v) => *v,
            None => {
                debug!(location, "no intensity on record, using default");
                self.default_intensity
            }
        }
    }
}

impl CarbonSignalSource for StaticSignalSource {
    fn current_intensity<'a>(&'a self, location: &'a str) -> ServiceFuture<'a, f64> {
        Box::pin(async move { Ok(self.lookup(location)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn known_location_uses_table() {
        let source = StaticSignalSource::from_config(&CarbonConfig::default());
        assert_eq!(source.current_intensity("US-OR").await.unwrap(), 250.0);
        assert_eq!(source.current_intensity("local").await.unwrap(), 700.0);
    }

    #[tokio::test]
    async fn unknown_location_uses_default() {
        let source = StaticSignalSource::from_config(&CarbonConfig::default());
        assert_eq!(source.current_intensity("mars").await.unwrap(), 350.0);
    }

    #[tokio::test]
    async fn fixed_source() {
        let source = StaticSignalSource::fixed(123.0);
        assert_eq!(source.current_intensity("anywhere").await.unwrap(), 123.0);
    }
}
