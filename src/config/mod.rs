//! Rollout configuration files.
//!
//! A rollout file names the targets, the strategy and the external tools
//! used to provision targets and shift traffic. YAML and JSON are both
//! accepted.

use crate::error::{Result, RolloutError};
use crate::health::HttpHealthConfig;
use crate::provision::CommandBackendConfig;
use crate::traffic::CommandTrafficConfig;
use crate::types::deployment::serde_duration;
use crate::types::{DeploymentStrategyConfig, DeploymentTarget, TargetRole};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
    Auto,
}

/// Tunables of the orchestrator itself, independent of the strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    #[serde(rename = "provision_timeout_secs", with = "serde_duration")]
    pub provision_timeout: Duration,
    #[serde(rename = "health_check_timeout_secs", with = "serde_duration")]
    pub health_check_timeout: Duration,
    #[serde(rename = "health_monitor_interval_secs", with = "serde_duration")]
    pub health_monitor_interval: Duration,
    /// Health-check every deployed target once after a successful run.
    pub post_deploy_health_check: bool,
    /// Error rate above which a target whose endpoints pass is `Degraded`.
    pub degraded_error_rate: f64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            provision_timeout: Duration::from_secs(30 * 60),
            health_check_timeout: Duration::from_secs(10),
            health_monitor_interval: Duration::from_secs(30),
            post_deploy_health_check: true,
            degraded_error_rate: 0.05,
        }
    }
}

impl OrchestratorSettings {
    pub fn validate(&self) -> Result<()> {
        if self.provision_timeout.is_zero() {
            return Err(RolloutError::Configuration(
                "provision_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.health_check_timeout.is_zero() {
            return Err(RolloutError::Configuration(
                "health_check_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.health_monitor_interval.is_zero() {
            return Err(RolloutError::Configuration(
                "health_monitor_interval_secs must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.degraded_error_rate) {
            return Err(RolloutError::Configuration(format!(
                "degraded_error_rate must be within 0..=1, got {}",
                self.degraded_error_rate
            )));
        }
        Ok(())
    }
}

/// One target as declared in a rollout file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub id: String,
    #[serde(default)]
    pub role: TargetRole,
    /// Passed to the provisioning backend as `{param.<name>}`.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Endpoints known before the first deploy, e.g. of a live baseline.
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
}

impl TargetSpec {
    pub fn to_target(&self) -> DeploymentTarget {
        let mut target = DeploymentTarget::new(self.id.clone()).with_role(self.role);
        target.labels = self.labels.clone();
        target.endpoints = self.endpoints.clone();
        target
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutConfig {
    pub targets: Vec<TargetSpec>,
    #[serde(default)]
    pub strategy: DeploymentStrategyConfig,
    #[serde(default)]
    pub settings: OrchestratorSettings,
    pub provisioner: CommandBackendConfig,
    #[serde(default)]
    pub health: HttpHealthConfig,
    #[serde(default)]
    pub traffic: Option<CommandTrafficConfig>,
}

impl RolloutConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let format = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => ConfigFormat::Json,
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Auto,
        };
        debug!("Loading rollout config from {}", path.display());
        Self::parse(&content, format)
    }

    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        let format = match format {
            ConfigFormat::Auto => detect_format(content),
            format => format,
        };

        let config: RolloutConfig = match format {
            ConfigFormat::Json => serde_json::from_str(content)?,
            _ => serde_yaml::from_str(content)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(RolloutError::Configuration(
                "at least one target is required".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for target in &self.targets {
            if target.id.trim().is_empty() {
                return Err(RolloutError::Configuration(
                    "target ids cannot be empty".to_string(),
                ));
            }
            if !ids.insert(target.id.as_str()) {
                return Err(RolloutError::Configuration(format!(
                    "duplicate target id: {}",
                    target.id
                )));
            }
        }

        for id in self.strategy.referenced_targets() {
            if !ids.contains(id) {
                return Err(RolloutError::Configuration(format!(
                    "strategy references unknown target: {id}"
                )));
            }
        }

        self.strategy.validate()?;
        self.settings.validate()
    }

    pub fn deployment_targets(&self) -> Vec<DeploymentTarget> {
        self.targets.iter().map(TargetSpec::to_target).collect()
    }
}

fn detect_format(content: &str) -> ConfigFormat {
    let trimmed = content.trim_start();
    if trimmed.starts_with('{') {
        ConfigFormat::Json
    } else {
        ConfigFormat::Yaml
    }
}
