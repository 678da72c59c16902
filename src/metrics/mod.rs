//! Runtime metrics used by the canary comparison.

use crate::types::{DeploymentTarget, TargetMetrics};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("No metrics available for target {target}")]
    Unavailable { target: String },
}

/// Supplies the current request metrics of a target.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn collect(&self, target: &DeploymentTarget) -> Result<TargetMetrics, MetricsError>;
}

/// Reads the metrics already stored on the target, as pushed through
/// `Orchestrator::record_metrics` by an external collector.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordedMetrics;

#[async_trait]
impl MetricsSource for RecordedMetrics {
    async fn collect(&self, target: &DeploymentTarget) -> Result<TargetMetrics, MetricsError> {
        Ok(target.metrics.clone())
    }
}
