use crate::error::{Result, RolloutError};
use crate::types::deployment::serde_duration_ms;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// Immutable per-run description of how targets are rolled out.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeploymentStrategyConfig {
    /// Deploy every target at once. Used when no strategy is given.
    #[default]
    Parallel,
    Rolling(RollingConfig),
    BlueGreen(BlueGreenConfig),
    Canary(CanaryConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Parallel,
    Rolling,
    BlueGreen,
    Canary,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyKind::Parallel => "parallel",
            StrategyKind::Rolling => "rolling",
            StrategyKind::BlueGreen => "blue-green",
            StrategyKind::Canary => "canary",
        };
        f.write_str(s)
    }
}

impl DeploymentStrategyConfig {
    pub fn kind(&self) -> StrategyKind {
        match self {
            DeploymentStrategyConfig::Parallel => StrategyKind::Parallel,
            DeploymentStrategyConfig::Rolling(_) => StrategyKind::Rolling,
            DeploymentStrategyConfig::BlueGreen(_) => StrategyKind::BlueGreen,
            DeploymentStrategyConfig::Canary(_) => StrategyKind::Canary,
        }
    }

    /// Target ids this strategy names explicitly. Parallel and rolling act on
    /// every registered target and name none.
    pub fn referenced_targets(&self) -> Vec<&str> {
        match self {
            DeploymentStrategyConfig::Parallel | DeploymentStrategyConfig::Rolling(_) => vec![],
            DeploymentStrategyConfig::BlueGreen(cfg) => cfg
                .active
                .iter()
                .chain(cfg.green.iter())
                .map(String::as_str)
                .collect(),
            DeploymentStrategyConfig::Canary(cfg) => cfg
                .canary_targets
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(cfg.baseline_target.as_str()))
                .collect(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            DeploymentStrategyConfig::Parallel => Ok(()),
            DeploymentStrategyConfig::Rolling(cfg) => cfg.validate(),
            DeploymentStrategyConfig::BlueGreen(cfg) => cfg.validate(),
            DeploymentStrategyConfig::Canary(cfg) => cfg.validate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingConfig {
    pub batch_size: usize,
    #[serde(rename = "batch_delay_ms", with = "serde_duration_ms", default)]
    pub batch_delay: Duration,
    #[serde(default)]
    pub rollback_on_failure: bool,
    /// Health-gate every batch after it is provisioned.
    #[serde(default)]
    pub verify_health: bool,
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            batch_delay: Duration::from_secs(30),
            rollback_on_failure: true,
            verify_health: false,
        }
    }
}

impl RollingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(RolloutError::InvalidStrategy(
                "rolling batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueGreenConfig {
    /// Targets currently serving traffic.
    pub active: Vec<String>,
    /// Shadow targets that receive the new version.
    pub green: Vec<String>,
    #[serde(rename = "health_check_grace_period_ms", with = "serde_duration_ms", default)]
    pub health_check_grace_period: Duration,
    /// Tear down the former active set once traffic has moved.
    #[serde(default)]
    pub destroy_standby: bool,
}

impl BlueGreenConfig {
    pub fn validate(&self) -> Result<()> {
        if self.green.is_empty() {
            return Err(RolloutError::InvalidStrategy(
                "blue-green requires at least one green target".to_string(),
            ));
        }
        if self.active.len() != self.green.len() {
            return Err(RolloutError::InvalidStrategy(format!(
                "blue-green active and green sets must be the same size ({} != {})",
                self.active.len(),
                self.green.len()
            )));
        }
        ensure_unique("blue-green", self.active.iter().chain(self.green.iter()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryConfig {
    pub canary_targets: Vec<String>,
    pub baseline_target: String,
    pub initial_traffic_percent: f64,
    pub traffic_increment_step: f64,
    pub max_traffic_percent: f64,
    #[serde(rename = "step_duration_ms", with = "serde_duration_ms")]
    pub step_duration: Duration,
    pub success_threshold: f64,
    pub error_threshold: f64,
    #[serde(default)]
    pub auto_promote: bool,
    #[serde(default = "default_true")]
    pub auto_rollback: bool,
    #[serde(rename = "monitor_duration_ms", with = "serde_duration_ms")]
    pub monitor_duration: Duration,
    /// Canary is worse than baseline when its success rate drops below
    /// `baseline success rate * baseline_success_tolerance`.
    #[serde(default = "default_success_tolerance")]
    pub baseline_success_tolerance: f64,
    /// Canary is worse than baseline when its error rate exceeds
    /// `baseline error rate * baseline_error_multiplier`.
    #[serde(default = "default_error_multiplier")]
    pub baseline_error_multiplier: f64,
}

fn default_true() -> bool {
    true
}

fn default_success_tolerance() -> f64 {
    0.95
}

fn default_error_multiplier() -> f64 {
    1.5
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            canary_targets: Vec::new(),
            baseline_target: String::new(),
            initial_traffic_percent: 5.0,
            traffic_increment_step: 5.0,
            max_traffic_percent: 50.0,
            step_duration: Duration::from_secs(60),
            success_threshold: 0.95,
            error_threshold: 0.05,
            auto_promote: false,
            auto_rollback: true,
            monitor_duration: Duration::from_secs(30 * 60),
            baseline_success_tolerance: default_success_tolerance(),
            baseline_error_multiplier: default_error_multiplier(),
        }
    }
}

impl CanaryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.canary_targets.is_empty() {
            return Err(invalid("canary requires at least one canary target"));
        }
        if self.baseline_target.is_empty() {
            return Err(invalid("canary requires a baseline target"));
        }
        if self.canary_targets.contains(&self.baseline_target) {
            return Err(invalid(format!(
                "baseline target {} cannot also be a canary",
                self.baseline_target
            )));
        }
        ensure_unique("canary", self.canary_targets.iter())?;

        for (name, value) in [
            ("initial_traffic_percent", self.initial_traffic_percent),
            ("traffic_increment_step", self.traffic_increment_step),
            ("max_traffic_percent", self.max_traffic_percent),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(invalid(format!("{name} must be within 0..=100, got {value}")));
            }
        }
        for (name, value) in [
            ("success_threshold", self.success_threshold),
            ("error_threshold", self.error_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(format!("{name} must be within 0..=1, got {value}")));
            }
        }
        if self.initial_traffic_percent > self.max_traffic_percent {
            return Err(invalid(format!(
                "initial_traffic_percent {} exceeds max_traffic_percent {}",
                self.initial_traffic_percent, self.max_traffic_percent
            )));
        }
        if self.traffic_increment_step <= 0.0
            && self.initial_traffic_percent < self.max_traffic_percent
        {
            return Err(invalid(
                "traffic_increment_step must be positive to reach max_traffic_percent",
            ));
        }
        if self.step_duration.is_zero() {
            return Err(invalid("step_duration must be greater than zero"));
        }
        if self.monitor_duration.is_zero() {
            return Err(invalid("monitor_duration must be greater than zero"));
        }
        if !(self.baseline_success_tolerance > 0.0 && self.baseline_success_tolerance <= 1.0) {
            return Err(invalid("baseline_success_tolerance must be within (0, 1]"));
        }
        if self.baseline_error_multiplier < 1.0 {
            return Err(invalid("baseline_error_multiplier must be at least 1.0"));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> RolloutError {
    RolloutError::InvalidStrategy(reason.into())
}

fn ensure_unique<'a>(strategy: &str, ids: impl Iterator<Item = &'a String>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(invalid(format!("{strategy} lists target {id} more than once")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canary() -> CanaryConfig {
        CanaryConfig {
            canary_targets: vec!["canary-1".to_string()],
            baseline_target: "baseline".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn default_is_parallel() {
        assert_eq!(
            DeploymentStrategyConfig::default().kind(),
            StrategyKind::Parallel
        );
    }

    #[test]
    fn rolling_rejects_zero_batch_size() {
        let cfg = RollingConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(RolloutError::InvalidStrategy(_))
        ));
    }

    #[test]
    fn blue_green_requires_equal_disjoint_sets() {
        let unequal = BlueGreenConfig {
            active: vec!["blue-a".into(), "blue-b".into()],
            green: vec!["green-a".into()],
            health_check_grace_period: Duration::ZERO,
            destroy_standby: false,
        };
        assert!(unequal.validate().is_err());

        let overlapping = BlueGreenConfig {
            active: vec!["slot".into()],
            green: vec!["slot".into()],
            health_check_grace_period: Duration::ZERO,
            destroy_standby: false,
        };
        assert!(overlapping.validate().is_err());

        let ok = BlueGreenConfig {
            active: vec!["blue".into()],
            green: vec!["green".into()],
            health_check_grace_period: Duration::ZERO,
            destroy_standby: true,
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn canary_percentages_and_thresholds_are_bounded() {
        assert!(canary().validate().is_ok());

        let mut cfg = canary();
        cfg.max_traffic_percent = 120.0;
        assert!(cfg.validate().is_err());

        let mut cfg = canary();
        cfg.error_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = canary();
        cfg.initial_traffic_percent = 60.0;
        cfg.max_traffic_percent = 20.0;
        assert!(cfg.validate().is_err());

        let mut cfg = canary();
        cfg.traffic_increment_step = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn canary_baseline_cannot_be_a_canary() {
        let mut cfg = canary();
        cfg.baseline_target = "canary-1".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn strategy_is_tagged_by_kind() {
        let yaml = r#"
kind: rolling
batch_size: 2
batch_delay_ms: 500
rollback_on_failure: true
"#;
        let strategy: DeploymentStrategyConfig = serde_yaml::from_str(yaml).unwrap();
        match strategy {
            DeploymentStrategyConfig::Rolling(cfg) => {
                assert_eq!(cfg.batch_size, 2);
                assert_eq!(cfg.batch_delay, Duration::from_millis(500));
                assert!(cfg.rollback_on_failure);
                assert!(!cfg.verify_health);
            }
            other => panic!("expected rolling, got {other:?}"),
        }
    }

    #[test]
    fn canary_defaults_carry_baseline_multipliers() {
        let yaml = r#"
kind: canary
canary_targets: [canary-1]
baseline_target: primary
initial_traffic_percent: 5
traffic_increment_step: 5
max_traffic_percent: 20
step_duration_ms: 1000
success_threshold: 0.95
error_threshold: 0.05
monitor_duration_ms: 60000
"#;
        let strategy: DeploymentStrategyConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(strategy.referenced_targets(), vec!["canary-1", "primary"]);

        let DeploymentStrategyConfig::Canary(cfg) = strategy else {
            panic!("expected canary");
        };
        assert_eq!(cfg.baseline_success_tolerance, 0.95);
        assert_eq!(cfg.baseline_error_multiplier, 1.5);
        assert!(cfg.auto_rollback);
        assert!(!cfg.auto_promote);
    }
}
