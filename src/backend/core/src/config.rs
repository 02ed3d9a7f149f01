//! Configuration management.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::resolve::ConflictStrategy;

/// Main store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Strategy used for aggregate kinds with no explicit entry.
    #[serde(default)]
    pub default_strategy: ConflictStrategy,

    /// Conflict strategy per aggregate kind.
    #[serde(default)]
    pub strategies: HashMap<String, ConflictStrategy>,

    /// How old the oldest parked event must be before the weak strategy
    /// runs a batched resolution.
    #[serde(default = "default_delay_threshold", with = "humantime_serde")]
    pub delay_threshold: Duration,

    /// What the store does when resolution itself loses a version race.
    #[serde(default)]
    pub race_policy: VersionRacePolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_strategy: ConflictStrategy::default(),
            strategies: HashMap::new(),
            delay_threshold: default_delay_threshold(),
            race_policy: VersionRacePolicy::default(),
        }
    }
}

/// Follow-up policy for a version race surfaced by resolution.
///
/// Strategies never retry internally; this policy belongs to the invoking
/// layer alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase", tag = "policy")]
pub enum VersionRacePolicy {
    /// Propagate the conflict to the caller immediately.
    Surface,

    /// Reload the aggregate and re-drive resolution, up to the limit.
    Reresolve { max_attempts: u32 },
}

impl Default for VersionRacePolicy {
    fn default() -> Self {
        Self::Surface
    }
}

fn default_delay_threshold() -> Duration {
    Duration::from_secs(30)
}

impl StoreConfig {
    /// Strategy configured for an aggregate kind.
    pub fn strategy_for(&self, kind: &str) -> ConflictStrategy {
        self.strategies
            .get(kind)
            .copied()
            .unwrap_or(self.default_strategy)
    }

    /// Load configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("STRAND").separator("__"))
            .build()?;

        let cfg: StoreConfig = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("STRAND").separator("__"))
            .build()?;

        let cfg: StoreConfig = config.try_deserialize()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.default_strategy, ConflictStrategy::Strong);
        assert_eq!(config.delay_threshold, Duration::from_secs(30));
        assert_eq!(config.race_policy, VersionRacePolicy::Surface);
    }

    #[test]
    fn test_strategy_for_falls_back_to_default() {
        let mut config = StoreConfig::default();
        config
            .strategies
            .insert("audit".to_string(), ConflictStrategy::Ignore);

        assert_eq!(config.strategy_for("audit"), ConflictStrategy::Ignore);
        assert_eq!(config.strategy_for("order"), ConflictStrategy::Strong);
    }

    #[test]
    fn test_load_from_empty_environment() {
        // Every field has a serde default, so a bare environment loads.
        let config = StoreConfig::load().unwrap();
        assert_eq!(config.default_strategy, ConflictStrategy::Strong);
    }

    #[test]
    fn test_deserialize_from_toml() {
        let raw = r#"
            default_strategy = "strong"
            delay_threshold = "45s"

            [strategies]
            audit = "ignore"
            metrics = "weak"

            [race_policy]
            policy = "reresolve"
            max_attempts = 3
        "#;

        let config: StoreConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.delay_threshold, Duration::from_secs(45));
        assert_eq!(config.strategy_for("metrics"), ConflictStrategy::Weak);
        assert_eq!(
            config.race_policy,
            VersionRacePolicy::Reresolve { max_attempts: 3 }
        );
    }
}
