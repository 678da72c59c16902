use crate::config::OrchestratorSettings;
use crate::health::HealthChecker;
use crate::registry::TargetRegistry;
use crate::strategy::context::observe_health;
use crate::types::TargetStatus;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle to the background health-monitoring loop.
///
/// The loop stops when `stop` is called, when the owning orchestrator is
/// cancelled, or when the handle is dropped.
pub struct HealthMonitor {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    pub(crate) fn spawn(
        registry: Arc<TargetRegistry>,
        checker: Arc<dyn HealthChecker>,
        settings: OrchestratorSettings,
        interval: Duration,
        token: CancellationToken,
    ) -> Self {
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            run(registry, checker, settings, interval, loop_token).await;
        });
        Self {
            token,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the loop and wait for an in-progress sweep to be abandoned.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Health monitor task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(
    registry: Arc<TargetRegistry>,
    checker: Arc<dyn HealthChecker>,
    settings: OrchestratorSettings,
    interval: Duration,
    token: CancellationToken,
) {
    info!("Health monitor started with interval {:?}", interval);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = sweep(&registry, checker.as_ref(), &settings) => {}
        }
    }
    info!("Health monitor stopped");
}

/// Re-check every `Deployed` target once.
async fn sweep(
    registry: &TargetRegistry,
    checker: &dyn HealthChecker,
    settings: &OrchestratorSettings,
) {
    let deployed: Vec<String> = registry
        .list()
        .await
        .into_iter()
        .filter(|t| t.status == TargetStatus::Deployed)
        .map(|t| t.id)
        .collect();
    if deployed.is_empty() {
        return;
    }

    debug!("Health sweep over {} deployed target(s)", deployed.len());
    let reports = join_all(
        deployed
            .iter()
            .map(|id| observe_health(registry, checker, settings, id)),
    )
    .await;

    for (id, report) in deployed.iter().zip(reports) {
        match report {
            Ok(report) if report.is_healthy() => {}
            Ok(report) => warn!(
                "Target {} is {}: {}",
                id,
                report.health,
                report.error.as_deref().unwrap_or("no detail")
            ),
            Err(e) => debug!("Skipped health update for {}: {}", id, e),
        }
    }
}
