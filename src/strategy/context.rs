use crate::config::OrchestratorSettings;
use crate::error::{AggregateError, Result, RolloutError};
use crate::health::{self, HealthChecker, HealthReport};
use crate::metrics::MetricsSource;
use crate::provision::ProvisioningBackend;
use crate::registry::TargetRegistry;
use crate::traffic::TrafficManager;
use crate::types::{
    endpoints_from_outputs, DeploymentResult, DesiredState, HealthStatus, TargetStatus,
};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything a strategy executor needs for one run.
///
/// The registry is the only shared mutable state; the collaborators are
/// called without holding it.
#[derive(Clone)]
pub struct RunContext {
    pub(crate) run_id: String,
    pub(crate) version: String,
    pub(crate) registry: Arc<TargetRegistry>,
    pub(crate) provisioner: Arc<dyn ProvisioningBackend>,
    pub(crate) health: Arc<dyn HealthChecker>,
    pub(crate) traffic: Arc<dyn TrafficManager>,
    pub(crate) metrics: Arc<dyn MetricsSource>,
    pub(crate) settings: OrchestratorSettings,
    pub(crate) cancel: CancellationToken,
}

impl RunContext {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &dyn MetricsSource {
        self.metrics.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(RolloutError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep unless the run is cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(RolloutError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Provision one target: `Pending -> Deploying -> Deployed | Failed`.
    ///
    /// Provisioning is never interrupted by cancellation; a half-applied
    /// infrastructure change is worse than a slow stop.
    pub async fn deploy_target(&self, id: &str) -> Result<()> {
        let target = self.registry.get(id).await?;
        self.registry
            .set_status(id, TargetStatus::Deploying, None)
            .await?;

        let desired = DesiredState {
            target_id: id.to_string(),
            version: self.version.clone(),
            parameters: target.labels.clone(),
        };

        let reason = match self.provision(&desired).await {
            Ok(result) if result.success => {
                let mut endpoints = result.endpoints();
                if result.outputs.is_empty() {
                    endpoints = self.fetch_endpoints(id).await;
                }
                if !endpoints.is_empty() {
                    self.registry.set_endpoints(id, endpoints).await?;
                }
                self.registry
                    .set_status(id, TargetStatus::Deployed, None)
                    .await?;
                info!(
                    "Deployed version {} to {} in {:?}",
                    self.version, id, result.duration
                );
                return Ok(());
            }
            Ok(result) => result
                .error
                .unwrap_or_else(|| "backend reported failure".to_string()),
            Err(reason) => reason,
        };

        error!("Provisioning failed for {}: {}", id, reason);
        self.registry
            .set_status(id, TargetStatus::Failed, Some(reason.clone()))
            .await?;
        Err(RolloutError::Provisioning {
            target: id.to_string(),
            reason,
        })
    }

    /// Deploy every target concurrently and wait for all of them. Every
    /// failure is collected; none short-circuits the others.
    pub async fn deploy_batch(&self, ids: &[String]) -> std::result::Result<(), AggregateError> {
        debug!("Dispatching {} provisioning task(s)", ids.len());
        let results = join_all(ids.iter().map(|id| self.deploy_target(id))).await;
        AggregateError::new(results.into_iter().filter_map(|r| r.err()).collect()).into_result()
    }

    /// Tear down one target as part of a rollback:
    /// `RollingBack -> RolledBack`, or `Failed` when the teardown itself fails.
    pub async fn rollback_target(&self, id: &str, reason: &str) -> Result<()> {
        self.registry
            .set_status(id, TargetStatus::RollingBack, Some(reason.to_string()))
            .await?;

        let outcome = match tokio::time::timeout(
            self.settings.provision_timeout,
            self.provisioner.destroy(id),
        )
        .await
        {
            Ok(Ok(result)) if result.success => Ok(()),
            Ok(Ok(result)) => Err(result
                .error
                .unwrap_or_else(|| "backend reported failure".to_string())),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(timeout_message("destroy", self.settings.provision_timeout)),
        };

        match outcome {
            Ok(()) => {
                info!("Rolled back {}", id);
                self.registry
                    .set_status(id, TargetStatus::RolledBack, Some(reason.to_string()))
                    .await
            }
            Err(failure) => {
                let message = format!("rollback failed: {failure}");
                self.registry
                    .set_status(id, TargetStatus::Failed, Some(message.clone()))
                    .await?;
                Err(RolloutError::Provisioning {
                    target: id.to_string(),
                    reason: message,
                })
            }
        }
    }

    /// Roll back every target concurrently. Failures are logged and
    /// returned, never retried.
    pub async fn rollback_batch(&self, ids: &[String], reason: &str) -> Vec<RolloutError> {
        let results = join_all(ids.iter().map(|id| self.rollback_target(id, reason))).await;
        let failures: Vec<RolloutError> = results.into_iter().filter_map(|r| r.err()).collect();
        for failure in &failures {
            warn!("Rollback incomplete: {}", failure);
        }
        failures
    }

    /// Check and record the health of one target.
    pub async fn check_health(&self, id: &str) -> Result<HealthReport> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(RolloutError::Cancelled),
            report = observe_health(
                &self.registry,
                self.health.as_ref(),
                &self.settings,
                id,
            ) => report,
        }
    }

    /// Block until every target in `ids` is healthy, or fail with every
    /// target that was not.
    pub async fn health_gate(&self, ids: &[String], stage: &str) -> Result<()> {
        let reports = join_all(ids.iter().map(|id| self.check_health(id))).await;

        let mut failures = Vec::new();
        for (id, report) in ids.iter().zip(reports) {
            match report {
                Ok(report) if report.is_healthy() => {}
                Ok(report) => failures.push((
                    id.clone(),
                    report
                        .error
                        .unwrap_or_else(|| format!("health is {}", report.health)),
                )),
                Err(RolloutError::Cancelled) => return Err(RolloutError::Cancelled),
                Err(e) => failures.push((id.clone(), e.to_string())),
            }
        }

        if failures.is_empty() {
            info!("Health gate passed for {} target(s) during {}", ids.len(), stage);
            Ok(())
        } else {
            warn!(
                "Health gate failed for {}/{} target(s) during {}",
                failures.len(),
                ids.len(),
                stage
            );
            Err(RolloutError::HealthGate {
                stage: stage.to_string(),
                failures,
            })
        }
    }

    /// Route `weight` of traffic to `id`. Targets that are failed or rolling
    /// back may only be set to zero.
    pub async fn set_weight(&self, id: &str, weight: f64) -> Result<()> {
        let operation = format!("set weight of {id} to {weight:.3}");
        if weight > 0.0 {
            let target = self.registry.get(id).await?;
            if !target.may_receive_traffic() {
                return Err(RolloutError::Traffic {
                    operation,
                    reason: format!("target is {}", target.status),
                });
            }
        }

        self.traffic
            .set_weight(id, weight)
            .await
            .map_err(|e| RolloutError::Traffic {
                operation,
                reason: e.to_string(),
            })?;
        self.registry.set_traffic_weight(id, weight).await
    }

    /// Atomic cutover of all traffic from `from` to `to`.
    pub async fn switch_all(&self, from: &[String], to: &[String]) -> Result<()> {
        let operation = format!("switch traffic from {from:?} to {to:?}");
        for id in to {
            let target = self.registry.get(id).await?;
            if !target.may_receive_traffic() {
                return Err(RolloutError::Traffic {
                    operation,
                    reason: format!("target {id} is {}", target.status),
                });
            }
        }

        self.traffic
            .switch_all(from, to)
            .await
            .map_err(|e| RolloutError::Traffic {
                operation,
                reason: e.to_string(),
            })?;

        for id in from {
            self.registry.set_traffic_weight(id, 0.0).await?;
        }
        let share = 1.0 / to.len().max(1) as f64;
        for id in to {
            self.registry.set_traffic_weight(id, share).await?;
        }
        Ok(())
    }

    async fn provision(&self, desired: &DesiredState) -> std::result::Result<DeploymentResult, String> {
        let attempt = async {
            self.provisioner.initialize(desired).await?;
            self.provisioner.deploy(desired).await
        };
        match tokio::time::timeout(self.settings.provision_timeout, attempt).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(timeout_message("deploy", self.settings.provision_timeout)),
        }
    }

    async fn fetch_endpoints(&self, id: &str) -> std::collections::HashMap<String, String> {
        match tokio::time::timeout(self.settings.provision_timeout, self.provisioner.outputs(id))
            .await
        {
            Ok(Ok(outputs)) => endpoints_from_outputs(&outputs),
            Ok(Err(e)) => {
                warn!("Could not read outputs for {}: {}", id, e);
                Default::default()
            }
            Err(_) => {
                warn!("Reading outputs for {} timed out", id);
                Default::default()
            }
        }
    }
}

/// Probe one target and store the observation in the registry.
///
/// A target whose endpoints all pass but whose recorded error rate exceeds
/// `degraded_error_rate` is reported `Degraded`.
pub(crate) async fn observe_health(
    registry: &TargetRegistry,
    checker: &dyn HealthChecker,
    settings: &OrchestratorSettings,
    id: &str,
) -> Result<HealthReport> {
    let target = registry.get(id).await?;
    let mut report = health::check_target(checker, &target, settings.health_check_timeout).await;

    if report.health == HealthStatus::Healthy
        && target.metrics.error_rate > settings.degraded_error_rate
    {
        report.health = HealthStatus::Degraded;
        report.error = Some(format!(
            "error rate {:.3} above {:.3}",
            target.metrics.error_rate, settings.degraded_error_rate
        ));
    }

    registry
        .set_health(id, report.health, report.error.clone())
        .await?;
    Ok(report)
}

fn timeout_message(operation: &str, timeout: Duration) -> String {
    format!("{operation} timed out after {}s", timeout.as_secs())
}
