use crate::types::CanaryMetrics;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("Provisioning failed for target {target}: {reason}")]
    Provisioning { target: String, reason: String },

    #[error("Health check failed for target {target}: {reason}")]
    HealthCheck { target: String, reason: String },

    #[error("Health gate failed during {stage}: {}", format_failures(.failures))]
    HealthGate {
        stage: String,
        failures: Vec<(String, String)>,
    },

    #[error("Traffic change failed during {operation}: {reason}")]
    Traffic { operation: String, reason: String },

    #[error("Canary {target} breached thresholds: {reason}")]
    CanaryBreach {
        target: String,
        reason: String,
        metrics: Option<Box<CanaryMetrics>>,
    },

    #[error("Batch {batch}/{total} failed: {source}")]
    BatchFailed {
        batch: usize,
        total: usize,
        source: AggregateError,
    },

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("Target not found: {id}")]
    TargetNotFound { id: String },

    #[error("Invalid strategy configuration: {0}")]
    InvalidStrategy(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Rollout cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RolloutError {
    /// Id of the target an error is about, when it concerns exactly one.
    pub fn target(&self) -> Option<&str> {
        match self {
            RolloutError::Provisioning { target, .. }
            | RolloutError::HealthCheck { target, .. }
            | RolloutError::CanaryBreach { target, .. } => Some(target),
            RolloutError::TargetNotFound { id } => Some(id),
            _ => None,
        }
    }
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(target, reason)| format!("{target}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Every failure seen by one batch of concurrent per-target tasks.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<RolloutError>,
}

impl AggregateError {
    pub fn new(errors: Vec<RolloutError>) -> Self {
        Self { errors }
    }

    pub fn push(&mut self, error: RolloutError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[RolloutError] {
        &self.errors
    }

    /// Ids of the targets that failed, in the order their errors were collected.
    pub fn failed_targets(&self) -> Vec<&str> {
        self.errors.iter().filter_map(RolloutError::target).collect()
    }

    /// `Ok(())` when nothing failed, otherwise the aggregate itself.
    pub fn into_result(self) -> std::result::Result<(), AggregateError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} target(s) failed: ", self.errors.len())?;
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

pub type Result<T> = std::result::Result<T, RolloutError>;
