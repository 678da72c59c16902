//! Thread-safe store of deployment targets shared by strategy executors and
//! the background health monitor.
//!
//! Every method takes the lock for a single field update and releases it
//! before returning, so no caller ever holds the registry across a network
//! call.

use crate::error::{Result, RolloutError};
use crate::types::{DeploymentTarget, HealthStatus, TargetMetrics, TargetRole, TargetStatus};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
pub struct TargetRegistry {
    inner: RwLock<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    targets: HashMap<String, DeploymentTarget>,
    /// Registration order, used by strategies that walk the whole fleet.
    order: Vec<String>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targets(targets: impl IntoIterator<Item = DeploymentTarget>) -> Self {
        let mut state = RegistryState::default();
        for target in targets {
            if !state.targets.contains_key(&target.id) {
                state.order.push(target.id.clone());
            }
            state.targets.insert(target.id.clone(), target);
        }
        Self {
            inner: RwLock::new(state),
        }
    }

    /// Insert a target or replace the record with the same id, keeping its
    /// original registration position.
    pub async fn upsert(&self, target: DeploymentTarget) {
        let mut state = self.inner.write().await;
        if !state.targets.contains_key(&target.id) {
            state.order.push(target.id.clone());
        }
        state.targets.insert(target.id.clone(), target);
    }

    pub async fn get(&self, id: &str) -> Result<DeploymentTarget> {
        let state = self.inner.read().await;
        state
            .targets
            .get(id)
            .cloned()
            .ok_or_else(|| RolloutError::TargetNotFound { id: id.to_string() })
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.read().await.targets.contains_key(id)
    }

    /// Copies of every target in registration order.
    pub async fn list(&self) -> Vec<DeploymentTarget> {
        let state = self.inner.read().await;
        state
            .order
            .iter()
            .filter_map(|id| state.targets.get(id).cloned())
            .collect()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.inner.read().await.order.clone()
    }

    /// Deep copy keyed by id; mutating it never touches the registry.
    pub async fn snapshot(&self) -> HashMap<String, DeploymentTarget> {
        self.inner.read().await.targets.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.targets.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.targets.is_empty()
    }

    /// Set status, health and error in one atomic update.
    pub async fn set_state(
        &self,
        id: &str,
        status: TargetStatus,
        health: HealthStatus,
        error: Option<String>,
    ) -> Result<()> {
        self.update(id, |target| {
            apply_status(target, status, error);
            target.health = health;
        })
        .await
    }

    /// Move a target to `status`. Health resets to `Unknown` whenever the
    /// target leaves `Deployed`, since it is only meaningful there.
    pub async fn set_status(
        &self,
        id: &str,
        status: TargetStatus,
        error: Option<String>,
    ) -> Result<()> {
        self.update(id, |target| {
            apply_status(target, status, error);
            if status != TargetStatus::Deployed {
                target.health = HealthStatus::Unknown;
            }
        })
        .await
    }

    /// Record a health observation.
    ///
    /// Only applies while the target is `Deployed`; returns `false` when the
    /// observation was dropped because a strategy moved the target on in
    /// the meantime.
    pub async fn set_health(
        &self,
        id: &str,
        health: HealthStatus,
        error: Option<String>,
    ) -> Result<bool> {
        let mut state = self.inner.write().await;
        let target = state
            .targets
            .get_mut(id)
            .ok_or_else(|| RolloutError::TargetNotFound { id: id.to_string() })?;

        if target.status != TargetStatus::Deployed {
            debug!(
                "Dropping health observation for {} in status {}",
                id, target.status
            );
            return Ok(false);
        }

        target.health = health;
        target.last_health_checked = Some(Utc::now());
        if error.is_some() || health == HealthStatus::Healthy {
            target.last_error = error;
        }
        Ok(true)
    }

    pub async fn set_endpoints(&self, id: &str, endpoints: HashMap<String, String>) -> Result<()> {
        self.update(id, |target| target.endpoints = endpoints).await
    }

    pub async fn set_metrics(&self, id: &str, metrics: TargetMetrics) -> Result<()> {
        self.update(id, |target| {
            target.metrics = metrics;
            if target.metrics.last_updated.is_none() {
                target.metrics.last_updated = Some(Utc::now());
            }
        })
        .await
    }

    pub async fn set_role(&self, id: &str, role: TargetRole) -> Result<()> {
        self.update(id, |target| target.role = role).await
    }

    pub async fn set_traffic_weight(&self, id: &str, weight: f64) -> Result<()> {
        self.update(id, |target| target.traffic_weight = weight.clamp(0.0, 1.0))
            .await
    }

    async fn update<F>(&self, id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut DeploymentTarget),
    {
        let mut state = self.inner.write().await;
        let target = state
            .targets
            .get_mut(id)
            .ok_or_else(|| RolloutError::TargetNotFound { id: id.to_string() })?;
        apply(target);
        Ok(())
    }
}

fn apply_status(target: &mut DeploymentTarget, status: TargetStatus, error: Option<String>) {
    if status == TargetStatus::Deployed {
        target.last_deployed = Some(Utc::now());
    }
    target.status = status;
    target.last_error = error;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TargetRegistry {
        TargetRegistry::with_targets(vec![
            DeploymentTarget::new("us-east-1"),
            DeploymentTarget::new("eu-west-1"),
            DeploymentTarget::new("ap-south-1"),
        ])
    }

    #[tokio::test]
    async fn list_preserves_registration_order() {
        let registry = registry();
        registry
            .upsert(DeploymentTarget::new("eu-west-1").with_role(TargetRole::Standby))
            .await;

        let ids: Vec<String> = registry.list().await.into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["us-east-1", "eu-west-1", "ap-south-1"]);
        assert_eq!(
            registry.get("eu-west-1").await.unwrap().role,
            TargetRole::Standby
        );
    }

    #[tokio::test]
    async fn get_unknown_target_is_not_found() {
        let registry = registry();
        assert!(matches!(
            registry.get("sa-east-1").await,
            Err(RolloutError::TargetNotFound { .. })
        ));
        assert!(registry.set_status("sa-east-1", TargetStatus::Deployed, None).await.is_err());
    }

    #[tokio::test]
    async fn health_is_ignored_unless_deployed() {
        let registry = registry();
        let applied = registry
            .set_health("us-east-1", HealthStatus::Healthy, None)
            .await
            .unwrap();
        assert!(!applied);
        assert_eq!(
            registry.get("us-east-1").await.unwrap().health,
            HealthStatus::Unknown
        );

        registry
            .set_status("us-east-1", TargetStatus::Deployed, None)
            .await
            .unwrap();
        let applied = registry
            .set_health("us-east-1", HealthStatus::Healthy, None)
            .await
            .unwrap();
        assert!(applied);

        let target = registry.get("us-east-1").await.unwrap();
        assert!(target.is_healthy());
        assert!(target.last_health_checked.is_some());
        assert!(target.last_deployed.is_some());
    }

    #[tokio::test]
    async fn leaving_deployed_resets_health() {
        let registry = registry();
        registry
            .set_state("us-east-1", TargetStatus::Deployed, HealthStatus::Healthy, None)
            .await
            .unwrap();
        registry
            .set_status(
                "us-east-1",
                TargetStatus::RollingBack,
                Some("canary breach".to_string()),
            )
            .await
            .unwrap();

        let target = registry.get("us-east-1").await.unwrap();
        assert_eq!(target.health, HealthStatus::Unknown);
        assert_eq!(target.last_error.as_deref(), Some("canary breach"));
    }

    #[tokio::test]
    async fn snapshot_is_detached_from_registry() {
        let registry = registry();
        let first = registry.snapshot().await;
        let second = registry.snapshot().await;
        assert_eq!(first, second);

        let mut copy = registry.snapshot().await;
        copy.get_mut("us-east-1").unwrap().status = TargetStatus::Failed;
        copy.remove("eu-west-1");

        let after = registry.snapshot().await;
        assert_eq!(after, first);
        assert_eq!(after["us-east-1"].status, TargetStatus::Pending);
    }

    #[tokio::test]
    async fn traffic_weight_is_clamped() {
        let registry = registry();
        registry.set_traffic_weight("us-east-1", 1.7).await.unwrap();
        assert_eq!(registry.get("us-east-1").await.unwrap().traffic_weight, 1.0);
        registry.set_traffic_weight("us-east-1", -0.2).await.unwrap();
        assert_eq!(registry.get("us-east-1").await.unwrap().traffic_weight, 0.0);
    }
}
