//! Engine configuration.
//!
//! One explicit [`EngineConfig`] is constructed per run and passed into each
//! stage. There is no global state; every stage is testable in isolation
//! with a hand-built config.

use crate::{EngineError, EntityType, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Bounds for the valuation outlier filter.
///
/// This is a statistical-cleanliness policy applied after the correctness
/// guards: a computed ratio `r` is published only if `min < r <= max`.
/// Null ratios pass through untouched; they carry the no-data signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutlierPolicy {
    /// Exclusive lower bound
    pub min: f64,
    /// Inclusive upper bound
    pub max: f64,
}

impl Default for OutlierPolicy {
    fn default() -> Self {
        Self { min: 0.0, max: 100.0 }
    }
}

impl OutlierPolicy {
    /// Whether a computed ratio is inside the published range.
    pub fn contains(&self, value: f64) -> bool {
        value > self.min && value <= self.max
    }
}

/// Full configuration for one engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding input tables (`<entity>_facts`, `daily_market`,
    /// optional `universe`), parquet or csv.
    pub data_dir: PathBuf,
    /// Directory receiving output datasets.
    pub out_dir: PathBuf,
    /// Entity types to process this run.
    pub entities: Vec<EntityType>,
    /// Outlier bounds for published valuation series.
    pub outlier: OutlierPolicy,
    /// Per-entity formula registry files (JSON). Entities without an entry
    /// use the built-in default registry.
    pub registry_files: HashMap<EntityType, PathBuf>,
    /// Explicit schema mapping: source metric codes rewritten to canonical
    /// vocabulary codes before the pivot. Codes outside the vocabulary and
    /// not mapped here are reported as drift, never guessed at.
    pub metric_aliases: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            out_dir: PathBuf::from("out"),
            entities: EntityType::ALL.to_vec(),
            outlier: OutlierPolicy::default(),
            registry_files: HashMap::new(),
            metric_aliases: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file, then validate it.
    pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Check structural validity of the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.outlier.min >= self.outlier.max {
            return Err(EngineError::InvalidConfig(format!(
                "outlier bounds must satisfy min < max, got ({}, {}]",
                self.outlier.min, self.outlier.max
            )));
        }
        if self.entities.is_empty() {
            return Err(EngineError::InvalidConfig(
                "no entity types configured".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_outlier_bounds_rejected() {
        let config = EngineConfig {
            outlier: OutlierPolicy { min: 50.0, max: 10.0 },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_outlier_bounds_are_half_open() {
        let policy = OutlierPolicy::default();
        assert!(!policy.contains(0.0)); // exclusive lower
        assert!(policy.contains(100.0)); // inclusive upper
        assert!(policy.contains(0.001));
        assert!(!policy.contains(100.001));
        assert!(!policy.contains(-5.0));
    }

    #[test]
    fn test_json_roundtrip() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.entities, config.entities);
        assert_eq!(back.outlier, config.outlier);
    }
}
