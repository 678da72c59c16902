use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// One provisionable unit: a region, an environment slot, or a canary slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub id: String,
    pub role: TargetRole,
    pub status: TargetStatus,
    pub health: HealthStatus,
    pub endpoints: HashMap<String, String>,
    pub metrics: TargetMetrics,
    /// Last traffic weight applied to this target, in `0.0..=1.0`.
    pub traffic_weight: f64,
    pub labels: HashMap<String, String>,
    pub last_deployed: Option<DateTime<Utc>>,
    pub last_health_checked: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl DeploymentTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: TargetRole::Primary,
            status: TargetStatus::Pending,
            health: HealthStatus::Unknown,
            endpoints: HashMap::new(),
            metrics: TargetMetrics::default(),
            traffic_weight: 0.0,
            labels: HashMap::new(),
            last_deployed: None,
            last_health_checked: None,
            last_error: None,
        }
    }

    pub fn with_role(mut self, role: TargetRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_endpoint(mut self, name: impl Into<String>, address: impl Into<String>) -> Self {
        self.endpoints.insert(name.into(), address.into());
        self
    }

    /// Health is only meaningful once the target is deployed.
    pub fn is_healthy(&self) -> bool {
        self.status == TargetStatus::Deployed && self.health == HealthStatus::Healthy
    }

    /// Failed and rolling-back targets must never receive traffic.
    pub fn may_receive_traffic(&self) -> bool {
        !matches!(self.status, TargetStatus::Failed | TargetStatus::RollingBack)
    }
}

/// Lifecycle of the provisioning action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetStatus {
    Pending,
    Deploying,
    Deployed,
    Failed,
    RollingBack,
    RolledBack,
}

impl TargetStatus {
    /// `Failed` and `RolledBack` end a target's participation in a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TargetStatus::Failed | TargetStatus::RolledBack)
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetStatus::Pending => "pending",
            TargetStatus::Deploying => "deploying",
            TargetStatus::Deployed => "deployed",
            TargetStatus::Failed => "failed",
            TargetStatus::RollingBack => "rolling-back",
            TargetStatus::RolledBack => "rolled-back",
        };
        f.write_str(s)
    }
}

/// Runtime correctness, tracked independently of `TargetStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Degraded,
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Traffic role of a target between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetRole {
    #[default]
    Primary,
    Standby,
    Canary,
}

impl fmt::Display for TargetRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetRole::Primary => "primary",
            TargetRole::Standby => "standby",
            TargetRole::Canary => "canary",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetMetrics {
    #[serde(with = "serde_duration_ms")]
    pub latency: Duration,
    pub error_rate: f64,
    pub request_count: u64,
    pub availability: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for TargetMetrics {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            error_rate: 0.0,
            request_count: 0,
            availability: 1.0,
            last_updated: None,
        }
    }
}

/// What a provisioning backend is asked to converge a target to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    pub target_id: String,
    pub version: String,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl DesiredState {
    pub fn new(target_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            version: version.into(),
            parameters: HashMap::new(),
        }
    }
}

/// Output of one provisioning action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub success: bool,
    pub outputs: HashMap<String, serde_json::Value>,
    pub resources: Vec<ResourceStatus>,
    #[serde(with = "serde_duration_ms")]
    pub duration: Duration,
    pub error: Option<String>,
}

impl DeploymentResult {
    pub fn succeeded(outputs: HashMap<String, serde_json::Value>, duration: Duration) -> Self {
        Self {
            success: true,
            outputs,
            resources: Vec::new(),
            duration,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            outputs: HashMap::new(),
            resources: Vec::new(),
            duration,
            error: Some(error.into()),
        }
    }

    /// Outputs that name an address the health checker can probe.
    ///
    /// Keys `endpoint` and `url`, or keys ending in `_endpoint` / `_url`, with a
    /// string value. Everything else (ARNs, ids) is left opaque.
    pub fn endpoints(&self) -> HashMap<String, String> {
        endpoints_from_outputs(&self.outputs)
    }
}

pub fn endpoints_from_outputs(
    outputs: &HashMap<String, serde_json::Value>,
) -> HashMap<String, String> {
    outputs
        .iter()
        .filter(|(key, _)| is_endpoint_key(key))
        .filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_string())))
        .collect()
}

fn is_endpoint_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key == "endpoint" || key == "url" || key.ends_with("_endpoint") || key.ends_with("_url")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub resource_type: String,
    pub name: String,
    pub status: String,
}

pub(crate) mod serde_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

pub(crate) mod serde_duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
