//! Top-level façade: owns the target registry, runs strategies and exposes
//! read-only status snapshots.

pub mod monitor;
pub mod report;

pub use monitor::HealthMonitor;
pub use report::DeploymentReport;

use crate::config::{OrchestratorSettings, RolloutConfig};
use crate::error::{Result, RolloutError};
use crate::health::{HealthChecker, HttpHealthChecker};
use crate::metrics::{MetricsSource, RecordedMetrics};
use crate::provision::{CommandBackend, ProvisioningBackend};
use crate::registry::TargetRegistry;
use crate::strategy::context::observe_health;
use crate::strategy::{self, RunContext, StrategyTable};
use crate::traffic::{CommandTrafficManager, InMemoryTrafficManager, TrafficManager};
use crate::types::{
    BlueGreenConfig, DeploymentStrategyConfig, DeploymentTarget, TargetMetrics, TargetStatus,
};
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub struct Orchestrator {
    registry: Arc<TargetRegistry>,
    provisioner: Arc<dyn ProvisioningBackend>,
    health: Arc<dyn HealthChecker>,
    traffic: Arc<dyn TrafficManager>,
    metrics: Arc<dyn MetricsSource>,
    settings: OrchestratorSettings,
    strategies: StrategyTable,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        targets: impl IntoIterator<Item = DeploymentTarget>,
        provisioner: Arc<dyn ProvisioningBackend>,
        health: Arc<dyn HealthChecker>,
        traffic: Arc<dyn TrafficManager>,
    ) -> Self {
        Self {
            registry: Arc::new(TargetRegistry::with_targets(targets)),
            provisioner,
            health,
            traffic,
            metrics: Arc::new(RecordedMetrics),
            settings: OrchestratorSettings::default(),
            strategies: StrategyTable::with_standard_executors(),
            cancel: CancellationToken::new(),
        }
    }

    /// Build an orchestrator that drives the command-line tools named in a
    /// rollout file. Without a traffic command, weights are only recorded
    /// in memory.
    pub fn from_config(config: &RolloutConfig) -> Self {
        let traffic: Arc<dyn TrafficManager> = match &config.traffic {
            Some(traffic) => Arc::new(CommandTrafficManager::new(traffic.clone())),
            None => Arc::new(InMemoryTrafficManager::new()),
        };

        Self::new(
            config.deployment_targets(),
            Arc::new(CommandBackend::new(config.provisioner.clone())),
            Arc::new(HttpHealthChecker::new(config.health.clone())),
            traffic,
        )
        .with_settings(config.settings.clone())
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSource>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_strategies(mut self, strategies: StrategyTable) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Roll `version` out with `strategy`.
    ///
    /// On failure the error summarizes the run; `status()` still reflects
    /// how far it got.
    pub async fn deploy(
        &self,
        strategy: &DeploymentStrategyConfig,
        version: &str,
    ) -> Result<DeploymentReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "rollout",
            run_id = %run_id,
            strategy = %strategy.kind(),
            version = %version
        );
        self.run(run_id, strategy, version).instrument(span).await
    }

    async fn run(
        &self,
        run_id: String,
        strategy: &DeploymentStrategyConfig,
        version: &str,
    ) -> Result<DeploymentReport> {
        strategy.validate()?;
        if self.registry.is_empty().await {
            return Err(RolloutError::Configuration(
                "no targets registered".to_string(),
            ));
        }
        for id in strategy.referenced_targets() {
            if !self.registry.contains(id).await {
                return Err(RolloutError::TargetNotFound { id: id.to_string() });
            }
        }

        let started_at = Utc::now();
        info!(
            "Starting {} rollout of version {} to {} target(s)",
            strategy.kind(),
            version,
            self.registry.len().await
        );

        let ctx = self.context(run_id.clone(), version);
        if let Err(e) = self.strategies.execute(&ctx, strategy).await {
            error!("Rollout failed: {}", e);
            return Err(e);
        }

        if self.settings.post_deploy_health_check {
            self.check_deployed().await;
        }

        let report = DeploymentReport {
            run_id,
            strategy: strategy.kind(),
            version: version.to_string(),
            config_hash: report::config_hash(strategy),
            started_at,
            completed_at: Utc::now(),
            targets: self.registry.list().await,
        };
        info!(
            "Rollout completed: {} deployed, {} healthy",
            report.count_status(TargetStatus::Deployed),
            report.targets.iter().filter(|t| t.is_healthy()).count()
        );
        Ok(report)
    }

    /// Move traffic back from a blue-green run's green set to its former
    /// active set.
    pub async fn revert_blue_green(&self, config: &BlueGreenConfig) -> Result<()> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("revert", run_id = %run_id);
        let ctx = self.context(run_id, "");
        strategy::revert_blue_green(&ctx, config)
            .instrument(span)
            .await
    }

    /// Deep copy of every target, keyed by id.
    pub async fn status(&self) -> HashMap<String, DeploymentTarget> {
        self.registry.snapshot().await
    }

    /// Ids of targets that are deployed and healthy, in registration order.
    pub async fn healthy_targets(&self) -> Vec<String> {
        self.registry
            .list()
            .await
            .into_iter()
            .filter(DeploymentTarget::is_healthy)
            .map(|t| t.id)
            .collect()
    }

    pub async fn register_target(&self, target: DeploymentTarget) {
        self.registry.upsert(target).await;
    }

    /// Store externally collected metrics for a target.
    pub async fn record_metrics(&self, id: &str, metrics: TargetMetrics) -> Result<()> {
        self.registry.set_metrics(id, metrics).await
    }

    /// Start re-checking every deployed target each `interval`, alongside
    /// any run in progress. A zero interval falls back to the configured one.
    pub fn start_health_monitoring(&self, interval: Duration) -> HealthMonitor {
        let interval = if interval.is_zero() {
            self.settings.health_monitor_interval
        } else {
            interval
        };
        HealthMonitor::spawn(
            self.registry.clone(),
            self.health.clone(),
            self.settings.clone(),
            interval.max(Duration::from_millis(1)),
            self.cancel.child_token(),
        )
    }

    /// Stop starting new work. Provisioning calls already dispatched finish;
    /// sleeps, health checks and monitors end with `Cancelled`.
    pub fn cancel(&self) {
        warn!("Cancellation requested");
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn context(&self, run_id: String, version: &str) -> RunContext {
        RunContext {
            run_id,
            version: version.to_string(),
            registry: self.registry.clone(),
            provisioner: self.provisioner.clone(),
            health: self.health.clone(),
            traffic: self.traffic.clone(),
            metrics: self.metrics.clone(),
            settings: self.settings.clone(),
            cancel: self.cancel.clone(),
        }
    }

    async fn check_deployed(&self) {
        let deployed: Vec<String> = self
            .registry
            .list()
            .await
            .into_iter()
            .filter(|t| t.status == TargetStatus::Deployed)
            .map(|t| t.id)
            .collect();

        let reports = join_all(deployed.iter().map(|id| {
            observe_health(&self.registry, self.health.as_ref(), &self.settings, id)
        }))
        .await;

        for (id, report) in deployed.iter().zip(reports) {
            match report {
                Ok(report) if report.is_healthy() => {}
                Ok(report) => warn!("Target {} is {} after rollout", id, report.health),
                Err(e) => warn!("Post-rollout health check of {} failed: {}", id, e),
            }
        }
    }
}
