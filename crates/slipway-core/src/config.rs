//! slipway.toml configuration parser.
//!
//! Every field has a default, so an empty file (or no file at all) yields
//! the stock timings: 3 concurrent orders, 5-minute slot-ready timeout,
//! 30s warmup, 12 verification samples, 30s metric snapshots.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlipwayConfig {
    pub scheduler: SchedulerSettings,
    pub orchestrator: OrchestratorSettings,
    pub rollback: RollbackSettings,
    pub metrics: MetricsSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Orders allowed in `processing` at once.
    pub max_concurrent_orders: usize,
    /// Queued orders beyond this are rejected.
    pub max_queue_size: usize,
    /// Largest replica count a single order may request.
    pub max_replicas: u32,
    /// Seed for the running average used in start estimates.
    pub default_processing_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_orders: 3,
            max_queue_size: 100,
            max_replicas: 50,
            default_processing_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub slot_ready_timeout_secs: u64,
    pub slot_ready_poll_secs: u64,
    pub warmup_secs: u64,
    pub test_duration_secs: u64,
    pub health_check_interval_secs: u64,
    pub rollback_threshold: f64,
    pub health_check_path: String,
    /// Pause after switching traffic before re-sampling.
    pub switch_hold_secs: u64,
    /// Delay before the previous slot is scaled to zero.
    pub scale_down_grace_secs: u64,
    pub canary_steps: Vec<u8>,
    pub canary_hold_secs: u64,
    /// `hold` verdicts tolerated per canary step before timing out.
    pub max_canary_holds: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            slot_ready_timeout_secs: 300,
            slot_ready_poll_secs: 10,
            warmup_secs: 30,
            test_duration_secs: 120,
            health_check_interval_secs: 10,
            rollback_threshold: 0.05,
            health_check_path: "/health".to_string(),
            switch_hold_secs: 30,
            scale_down_grace_secs: 300,
            canary_steps: vec![10, 25, 50, 75, 100],
            canary_hold_secs: 30,
            max_canary_holds: 10,
        }
    }
}

impl OrchestratorSettings {
    pub fn slot_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.slot_ready_timeout_secs)
    }

    pub fn slot_ready_poll(&self) -> Duration {
        Duration::from_secs(self.slot_ready_poll_secs.max(1))
    }

    pub fn switch_hold(&self) -> Duration {
        Duration::from_secs(self.switch_hold_secs)
    }

    pub fn scale_down_grace(&self) -> Duration {
        Duration::from_secs(self.scale_down_grace_secs)
    }

    pub fn canary_hold(&self) -> Duration {
        Duration::from_secs(self.canary_hold_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackSettings {
    /// Automatic trigger polling interval.
    pub monitor_interval_secs: u64,
    /// Automatic monitors clear themselves after this long.
    pub monitor_max_lifetime_secs: u64,
    /// Poll interval of the verify-health step.
    pub health_poll_secs: u64,
}

impl Default for RollbackSettings {
    fn default() -> Self {
        Self {
            monitor_interval_secs: 30,
            monitor_max_lifetime_secs: 3600,
            health_poll_secs: 5,
        }
    }
}

impl RollbackSettings {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    pub fn monitor_max_lifetime(&self) -> Duration {
        Duration::from_secs(self.monitor_max_lifetime_secs)
    }

    pub fn health_poll(&self) -> Duration {
        Duration::from_secs(self.health_poll_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub snapshot_interval_secs: u64,
    /// Ring size per deployment.
    pub max_snapshots: usize,
    /// Install the stock alert rules for every monitored deployment.
    pub default_rules: bool,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            snapshot_interval_secs: 30,
            max_snapshots: 1000,
            default_rules: true,
        }
    }
}

impl MetricsSettings {
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs.max(1))
    }
}

impl SlipwayConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: SlipwayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject settings the subsystems cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.max_concurrent_orders == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_concurrent_orders must be at least 1".into(),
            ));
        }
        let threshold = self.orchestrator.rollback_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "orchestrator.rollback_threshold must be within 0.0..=1.0, got {threshold}"
            )));
        }
        let steps = &self.orchestrator.canary_steps;
        if steps.is_empty() || steps.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::Invalid(
                "orchestrator.canary_steps must be non-empty and strictly increasing".into(),
            ));
        }
        if steps.last().copied() != Some(100) {
            return Err(ConfigError::Invalid(
                "orchestrator.canary_steps must end at 100".into(),
            ));
        }
        if self.metrics.max_snapshots == 0 {
            return Err(ConfigError::Invalid(
                "metrics.max_snapshots must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = SlipwayConfig::parse("").unwrap();
        assert_eq!(config.scheduler.max_concurrent_orders, 3);
        assert_eq!(config.orchestrator.canary_steps, vec![10, 25, 50, 75, 100]);
        assert_eq!(config.orchestrator.slot_ready_timeout(), Duration::from_secs(300));
        assert_eq!(config.rollback.monitor_max_lifetime(), Duration::from_secs(3600));
        assert_eq!(config.metrics.max_snapshots, 1000);
    }

    #[test]
    fn partial_sections_override() {
        let toml = r#"
[scheduler]
max_concurrent_orders = 5

[orchestrator]
warmup_secs = 10
rollback_threshold = 0.02
"#;
        let config = SlipwayConfig::parse(toml).unwrap();
        assert_eq!(config.scheduler.max_concurrent_orders, 5);
        assert_eq!(config.scheduler.max_queue_size, 100);
        assert_eq!(config.orchestrator.warmup_secs, 10);
        assert_eq!(config.orchestrator.rollback_threshold, 0.02);
        assert_eq!(config.orchestrator.switch_hold_secs, 30);
    }

    #[test]
    fn rejects_bad_canary_steps() {
        let toml = "[orchestrator]\ncanary_steps = [10, 50, 25, 100]\n";
        assert!(matches!(
            SlipwayConfig::parse(toml),
            Err(ConfigError::Invalid(_))
        ));

        let toml = "[orchestrator]\ncanary_steps = [10, 50]\n";
        assert!(matches!(
            SlipwayConfig::parse(toml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let toml = "[scheduler]\nmax_concurrent_orders = 0\n";
        assert!(SlipwayConfig::parse(toml).is_err());
    }

    #[test]
    fn roundtrips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slipway.toml");
        let mut config = SlipwayConfig::default();
        config.metrics.snapshot_interval_secs = 15;
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = SlipwayConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
