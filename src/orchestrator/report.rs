use crate::types::{
    DeploymentStrategyConfig, DeploymentTarget, HealthStatus, StrategyKind, TargetStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one successful `Orchestrator::deploy` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentReport {
    pub run_id: String,
    pub strategy: StrategyKind,
    pub version: String,
    /// sha256 of the strategy configuration the run executed.
    pub config_hash: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Every registered target as of the end of the run.
    pub targets: Vec<DeploymentTarget>,
}

impl DeploymentReport {
    pub fn duration(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }

    pub fn count_status(&self, status: TargetStatus) -> usize {
        self.targets.iter().filter(|t| t.status == status).count()
    }

    pub fn count_health(&self, health: HealthStatus) -> usize {
        self.targets.iter().filter(|t| t.health == health).count()
    }
}

pub(crate) fn config_hash(strategy: &DeploymentStrategyConfig) -> String {
    use sha2::{Digest, Sha256};
    let serialized = serde_json::to_string(strategy).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RollingConfig;

    #[test]
    fn hash_tracks_configuration() {
        let parallel = config_hash(&DeploymentStrategyConfig::Parallel);
        assert_eq!(parallel.len(), 64);
        assert_eq!(parallel, config_hash(&DeploymentStrategyConfig::Parallel));

        let rolling = config_hash(&DeploymentStrategyConfig::Rolling(RollingConfig::default()));
        assert_ne!(parallel, rolling);
    }
}
