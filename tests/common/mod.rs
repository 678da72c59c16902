#![allow(dead_code)]

use async_trait::async_trait;
use rollout_orchestrator::health::{HealthCheckError, HealthChecker};
use rollout_orchestrator::metrics::{MetricsError, MetricsSource};
use rollout_orchestrator::provision::{ProvisionError, ProvisioningBackend};
use rollout_orchestrator::traffic::InMemoryTrafficManager;
use rollout_orchestrator::{
    DeploymentResult, DeploymentTarget, DesiredState, Orchestrator, OrchestratorSettings,
    TargetMetrics,
};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn endpoint_of(id: &str) -> String {
    format!("http://{id}.test")
}

/// Provisioner that succeeds unless told otherwise, publishing one endpoint
/// per target.
#[derive(Default)]
pub struct FakeProvisioner {
    failing: Mutex<HashSet<String>>,
    failing_destroy: Mutex<HashSet<String>>,
    delay: Duration,
    deploys: Mutex<Vec<String>>,
    destroys: Mutex<Vec<String>>,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail_deploy(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn fail_destroy(&self, id: &str) {
        self.failing_destroy.lock().unwrap().insert(id.to_string());
    }

    pub fn deploys(&self) -> Vec<String> {
        self.deploys.lock().unwrap().clone()
    }

    pub fn destroys(&self) -> Vec<String> {
        let mut destroys = self.destroys.lock().unwrap().clone();
        destroys.sort();
        destroys
    }
}

#[async_trait]
impl ProvisioningBackend for FakeProvisioner {
    async fn initialize(&self, _desired: &DesiredState) -> Result<(), ProvisionError> {
        Ok(())
    }

    async fn deploy(&self, desired: &DesiredState) -> Result<DeploymentResult, ProvisionError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.deploys.lock().unwrap().push(desired.target_id.clone());

        if self.failing.lock().unwrap().contains(&desired.target_id) {
            return Ok(DeploymentResult::failed(
                "simulated apply failure",
                self.delay,
            ));
        }
        let outputs = HashMap::from([
            ("endpoint".to_string(), json!(endpoint_of(&desired.target_id))),
            ("instance_count".to_string(), json!(2)),
        ]);
        Ok(DeploymentResult::succeeded(outputs, self.delay))
    }

    async fn destroy(&self, target_id: &str) -> Result<DeploymentResult, ProvisionError> {
        self.destroys.lock().unwrap().push(target_id.to_string());
        if self.failing_destroy.lock().unwrap().contains(target_id) {
            return Err(ProvisionError::Unavailable(format!(
                "cannot reach state backend for {target_id}"
            )));
        }
        Ok(DeploymentResult::succeeded(HashMap::new(), Duration::ZERO))
    }

    async fn outputs(
        &self,
        target_id: &str,
    ) -> Result<HashMap<String, serde_json::Value>, ProvisionError> {
        Ok(HashMap::from([(
            "endpoint".to_string(),
            json!(endpoint_of(target_id)),
        )]))
    }
}

/// Health checker that fails the endpoints it is told to fail.
#[derive(Default)]
pub struct FakeHealthChecker {
    unhealthy: Mutex<HashSet<String>>,
    checks: AtomicUsize,
    delay: Duration,
}

impl FakeHealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail(&self, endpoint: &str) {
        self.unhealthy.lock().unwrap().insert(endpoint.to_string());
    }

    pub fn recover(&self, endpoint: &str) {
        self.unhealthy.lock().unwrap().remove(endpoint);
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthChecker for FakeHealthChecker {
    async fn check(&self, endpoint: &str) -> Result<(), HealthCheckError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.unhealthy.lock().unwrap().contains(endpoint) {
            Err(HealthCheckError::Failed(format!(
                "{endpoint} returned 503"
            )))
        } else {
            Ok(())
        }
    }
}

/// Metrics source with fixed per-target values; targets without a value
/// report perfect metrics.
#[derive(Default)]
pub struct ScriptedMetrics {
    values: Mutex<HashMap<String, TargetMetrics>>,
    unavailable: Mutex<HashSet<String>>,
}

impl ScriptedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: &str, availability: f64, error_rate: f64) {
        let metrics = TargetMetrics {
            availability,
            error_rate,
            request_count: 1_000,
            latency: Duration::from_millis(80),
            ..TargetMetrics::default()
        };
        self.values.lock().unwrap().insert(id.to_string(), metrics);
    }

    pub fn make_unavailable(&self, id: &str) {
        self.unavailable.lock().unwrap().insert(id.to_string());
    }
}

#[async_trait]
impl MetricsSource for ScriptedMetrics {
    async fn collect(&self, target: &DeploymentTarget) -> Result<TargetMetrics, MetricsError> {
        if self.unavailable.lock().unwrap().contains(&target.id) {
            return Err(MetricsError::Unavailable {
                target: target.id.clone(),
            });
        }
        Ok(self
            .values
            .lock()
            .unwrap()
            .get(&target.id)
            .cloned()
            .unwrap_or_default())
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub provisioner: Arc<FakeProvisioner>,
    pub health: Arc<FakeHealthChecker>,
    pub traffic: Arc<InMemoryTrafficManager>,
    pub metrics: Arc<ScriptedMetrics>,
}

impl Harness {
    pub fn new(targets: Vec<DeploymentTarget>) -> Self {
        Self::with_provisioner(targets, FakeProvisioner::new())
    }

    pub fn with_provisioner(targets: Vec<DeploymentTarget>, provisioner: FakeProvisioner) -> Self {
        Self::with_fakes(targets, provisioner, FakeHealthChecker::new())
    }

    pub fn with_fakes(
        targets: Vec<DeploymentTarget>,
        provisioner: FakeProvisioner,
        health: FakeHealthChecker,
    ) -> Self {
        let provisioner = Arc::new(provisioner);
        let health = Arc::new(health);
        let traffic = Arc::new(InMemoryTrafficManager::new());
        let metrics = Arc::new(ScriptedMetrics::new());

        let settings = OrchestratorSettings {
            health_check_timeout: Duration::from_millis(500),
            ..OrchestratorSettings::default()
        };
        let orchestrator = Orchestrator::new(
            targets,
            provisioner.clone(),
            health.clone(),
            traffic.clone(),
        )
        .with_metrics(metrics.clone())
        .with_settings(settings);

        Self {
            orchestrator,
            provisioner,
            health,
            traffic,
            metrics,
        }
    }
}

pub fn targets(ids: &[&str]) -> Vec<DeploymentTarget> {
    ids.iter().map(|id| DeploymentTarget::new(*id)).collect()
}
