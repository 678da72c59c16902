use crate::error::{Result, RolloutError};
use crate::strategy::{mismatch, RunContext, StrategyExecutor};
use crate::types::{
    CanaryConfig, CanaryMetrics, DeploymentStrategyConfig, HealthStatus, StrategyKind,
    TargetRole, TargetStatus,
};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Ramps traffic onto canary targets while comparing them with a baseline.
pub struct CanaryExecutor;

#[async_trait]
impl StrategyExecutor for CanaryExecutor {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Canary
    }

    async fn execute(&self, ctx: &RunContext, strategy: &DeploymentStrategyConfig) -> Result<()> {
        let DeploymentStrategyConfig::Canary(config) = strategy else {
            return Err(mismatch(self.kind(), strategy));
        };
        config.validate()?;
        for id in config
            .canary_targets
            .iter()
            .chain(std::iter::once(&config.baseline_target))
        {
            if !ctx.registry().contains(id).await {
                return Err(RolloutError::TargetNotFound { id: id.clone() });
            }
        }
        ctx.ensure_not_cancelled()?;

        for id in &config.canary_targets {
            ctx.registry().set_role(id, TargetRole::Canary).await?;
        }
        info!(
            "Deploying canary target(s) {:?} against baseline {}",
            config.canary_targets, config.baseline_target
        );
        ctx.deploy_batch(&config.canary_targets)
            .await
            .map_err(RolloutError::Aggregate)?;

        monitor(ctx, config).await
    }
}

async fn monitor(ctx: &RunContext, config: &CanaryConfig) -> Result<()> {
    let started = Instant::now();
    let deadline = started + config.monitor_duration;
    let mut percent = config.initial_traffic_percent;
    ctx.ensure_not_cancelled()?;
    apply_percent(ctx, config, percent).await?;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            info!(
                "Canary monitoring window of {:?} ended at {:.1}% traffic",
                config.monitor_duration, percent
            );
            return Ok(());
        }

        // A partial step means the window closes before the next evaluation.
        if remaining < config.step_duration {
            ctx.sleep(remaining).await?;
            continue;
        }
        ctx.sleep(config.step_duration).await?;

        if let Some(breach) = evaluate_tick(ctx, config, percent, started.elapsed()).await? {
            return handle_breach(ctx, config, breach).await;
        }

        ctx.ensure_not_cancelled()?;
        if percent >= config.max_traffic_percent {
            if config.auto_promote {
                return promote(ctx, config).await;
            }
            debug!("Holding canary at {:.1}%", percent);
            continue;
        }

        percent = (percent + config.traffic_increment_step).min(config.max_traffic_percent);
        apply_percent(ctx, config, percent).await?;
    }
}

/// Route `percent` of traffic to the canaries, split evenly, and the rest
/// to the baseline.
async fn apply_percent(ctx: &RunContext, config: &CanaryConfig, percent: f64) -> Result<()> {
    let fraction = percent / 100.0;
    let share = fraction / config.canary_targets.len() as f64;
    for id in &config.canary_targets {
        ctx.set_weight(id, share).await?;
    }
    ctx.set_weight(&config.baseline_target, 1.0 - fraction)
        .await?;
    info!("Canary traffic at {:.1}%", percent);
    Ok(())
}

struct Breach {
    target: String,
    reason: String,
    metrics: Option<CanaryMetrics>,
}

impl Breach {
    fn into_error(self) -> RolloutError {
        RolloutError::CanaryBreach {
            target: self.target,
            reason: self.reason,
            metrics: self.metrics.map(Box::new),
        }
    }
}

/// Collect metrics and health for every canary. The first canary found in
/// breach ends the evaluation.
async fn evaluate_tick(
    ctx: &RunContext,
    config: &CanaryConfig,
    percent: f64,
    elapsed: Duration,
) -> Result<Option<Breach>> {
    let baseline = ctx.registry().get(&config.baseline_target).await?;
    let baseline_metrics = match ctx.metrics().collect(&baseline).await {
        Ok(metrics) => metrics,
        Err(e) => {
            return Ok(Some(Breach {
                target: config.baseline_target.clone(),
                reason: format!("baseline metrics unavailable: {e}"),
                metrics: None,
            }))
        }
    };
    ctx.registry()
        .set_metrics(&baseline.id, baseline_metrics.clone())
        .await?;

    for id in &config.canary_targets {
        let canary = ctx.registry().get(id).await?;
        let canary_metrics = match ctx.metrics().collect(&canary).await {
            Ok(metrics) => metrics,
            Err(e) => {
                return Ok(Some(Breach {
                    target: id.clone(),
                    reason: format!("metrics unavailable: {e}"),
                    metrics: None,
                }))
            }
        };
        ctx.registry()
            .set_metrics(id, canary_metrics.clone())
            .await?;

        let snapshot = CanaryMetrics {
            canary_target: id.clone(),
            baseline_target: baseline.id.clone(),
            canary_success_rate: canary_metrics.availability,
            baseline_success_rate: baseline_metrics.availability,
            canary_error_rate: canary_metrics.error_rate,
            baseline_error_rate: baseline_metrics.error_rate,
            canary_response_time: canary_metrics.latency,
            baseline_response_time: baseline_metrics.latency,
            traffic_percent: percent,
            elapsed,
        };
        debug!("{}", snapshot);

        let report = ctx.check_health(id).await?;
        if report.health == HealthStatus::Unhealthy {
            return Ok(Some(Breach {
                target: id.clone(),
                reason: format!(
                    "health check failed: {}",
                    report.error.unwrap_or_else(|| "unhealthy".to_string())
                ),
                metrics: Some(snapshot),
            }));
        }

        if let Some(reason) = evaluate_canary(&snapshot, config) {
            return Ok(Some(Breach {
                target: id.clone(),
                reason,
                metrics: Some(snapshot),
            }));
        }
    }

    Ok(None)
}

async fn handle_breach(ctx: &RunContext, config: &CanaryConfig, breach: Breach) -> Result<()> {
    warn!("Canary {} breached: {}", breach.target, breach.reason);

    if config.auto_rollback {
        for id in &config.canary_targets {
            ctx.set_weight(id, 0.0).await?;
        }
        ctx.set_weight(&config.baseline_target, 1.0).await?;

        for id in &config.canary_targets {
            ctx.registry()
                .set_status(id, TargetStatus::RollingBack, Some(breach.reason.clone()))
                .await?;
            ctx.registry()
                .set_status(id, TargetStatus::RolledBack, Some(breach.reason.clone()))
                .await?;
        }
        error!("Canary rolled back, all traffic returned to {}", config.baseline_target);
    } else if config.canary_targets.contains(&breach.target) {
        ctx.registry()
            .set_health(&breach.target, HealthStatus::Unhealthy, Some(breach.reason.clone()))
            .await?;
        warn!("Automatic rollback disabled, canary traffic left in place");
    }

    Err(breach.into_error())
}

async fn promote(ctx: &RunContext, config: &CanaryConfig) -> Result<()> {
    let baseline = vec![config.baseline_target.clone()];
    ctx.switch_all(&baseline, &config.canary_targets).await?;

    for id in &config.canary_targets {
        ctx.registry().set_role(id, TargetRole::Primary).await?;
    }
    ctx.registry()
        .set_role(&config.baseline_target, TargetRole::Standby)
        .await?;

    info!(
        "Promoted canary target(s) {:?} to 100% traffic",
        config.canary_targets
    );
    Ok(())
}

/// Why a canary snapshot breaches its thresholds, if it does.
///
/// Absolute thresholds are checked first, then the comparison with the
/// baseline scaled by `baseline_success_tolerance` and
/// `baseline_error_multiplier`.
pub fn evaluate_canary(metrics: &CanaryMetrics, config: &CanaryConfig) -> Option<String> {
    if metrics.canary_success_rate < config.success_threshold {
        return Some(format!(
            "success rate {:.3} below threshold {:.3}",
            metrics.canary_success_rate, config.success_threshold
        ));
    }
    if metrics.canary_error_rate > config.error_threshold {
        return Some(format!(
            "error rate {:.3} above threshold {:.3}",
            metrics.canary_error_rate, config.error_threshold
        ));
    }

    let min_success = metrics.baseline_success_rate * config.baseline_success_tolerance;
    if metrics.canary_success_rate < min_success {
        return Some(format!(
            "success rate {:.3} below baseline {:.3} x {:.2}",
            metrics.canary_success_rate,
            metrics.baseline_success_rate,
            config.baseline_success_tolerance
        ));
    }
    let max_error = metrics.baseline_error_rate * config.baseline_error_multiplier;
    if metrics.canary_error_rate > max_error {
        return Some(format!(
            "error rate {:.3} above baseline {:.3} x {:.2}",
            metrics.canary_error_rate,
            metrics.baseline_error_rate,
            config.baseline_error_multiplier
        ));
    }

    None
}

pub fn is_canary_healthy(metrics: &CanaryMetrics, config: &CanaryConfig) -> bool {
    evaluate_canary(metrics, config).is_none()
}
