//! Endpoint health checking and per-target aggregation.

pub mod error;
pub mod http;

pub use error::HealthCheckError;
pub use http::{HttpHealthChecker, HttpHealthConfig};

use crate::types::{DeploymentTarget, HealthStatus};
use async_trait::async_trait;
use futures::future::join_all;
use std::time::Duration;
use tracing::debug;

/// Probes a single endpoint. Timeouts and transport failures are reported
/// the same way as a failed check.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self, endpoint: &str) -> Result<(), HealthCheckError>;
}

/// Outcome of checking every endpoint of one target.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub target_id: String,
    pub health: HealthStatus,
    pub error: Option<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.health == HealthStatus::Healthy
    }
}

/// Check all endpoints of `target` concurrently.
///
/// The target is healthy only if every endpoint passes. The first failure in
/// endpoint-name order is attached to the report. A target without endpoints
/// reports `Unknown`.
pub async fn check_target(
    checker: &dyn HealthChecker,
    target: &DeploymentTarget,
    timeout: Duration,
) -> HealthReport {
    if target.endpoints.is_empty() {
        return HealthReport {
            target_id: target.id.clone(),
            health: HealthStatus::Unknown,
            error: Some("no endpoints registered".to_string()),
        };
    }

    let mut endpoints: Vec<(&String, &String)> = target.endpoints.iter().collect();
    endpoints.sort_by(|a, b| a.0.cmp(b.0));

    let checks = endpoints.iter().map(|(name, address)| async move {
        let outcome = match tokio::time::timeout(timeout, checker.check(address)).await {
            Ok(result) => result,
            Err(_) => Err(HealthCheckError::Timeout {
                endpoint: address.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };
        (*name, outcome)
    });

    let first_failure = join_all(checks)
        .await
        .into_iter()
        .find_map(|(name, outcome)| outcome.err().map(|e| format!("endpoint {name}: {e}")));

    match first_failure {
        Some(error) => {
            debug!("Target {} unhealthy: {}", target.id, error);
            HealthReport {
                target_id: target.id.clone(),
                health: HealthStatus::Unhealthy,
                error: Some(error),
            }
        }
        None => HealthReport {
            target_id: target.id.clone(),
            health: HealthStatus::Healthy,
            error: None,
        },
    }
}
