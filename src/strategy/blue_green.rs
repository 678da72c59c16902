use crate::error::{Result, RolloutError};
use crate::strategy::{mismatch, RunContext, StrategyExecutor};
use crate::types::{
    BlueGreenConfig, DeploymentStrategyConfig, HealthStatus, StrategyKind, TargetRole,
    TargetStatus,
};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use tracing::{info, warn};

/// Deploys a shadow green set, gates it on health and cuts all traffic over
/// in one call.
pub struct BlueGreenExecutor;

#[async_trait]
impl StrategyExecutor for BlueGreenExecutor {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BlueGreen
    }

    async fn execute(&self, ctx: &RunContext, strategy: &DeploymentStrategyConfig) -> Result<()> {
        let DeploymentStrategyConfig::BlueGreen(config) = strategy else {
            return Err(mismatch(self.kind(), strategy));
        };
        config.validate()?;
        ensure_registered(ctx, config).await?;
        ctx.ensure_not_cancelled()?;

        info!(
            "Deploying green set {:?} alongside active set {:?}",
            config.green, config.active
        );
        for id in &config.green {
            ctx.registry().set_role(id, TargetRole::Standby).await?;
        }
        ctx.deploy_batch(&config.green)
            .await
            .map_err(RolloutError::Aggregate)?;

        if !config.health_check_grace_period.is_zero() {
            info!(
                "Waiting {:?} before health-checking the green set",
                config.health_check_grace_period
            );
            ctx.sleep(config.health_check_grace_period).await?;
        }
        ctx.health_gate(&config.green, "blue-green cutover").await?;

        ctx.switch_all(&config.active, &config.green).await?;
        info!("Switched traffic from {:?} to {:?}", config.active, config.green);

        for id in &config.green {
            ctx.registry().set_role(id, TargetRole::Primary).await?;
        }
        for id in &config.active {
            ctx.registry().set_role(id, TargetRole::Standby).await?;
        }

        if config.destroy_standby {
            destroy_standby(ctx, &config.active).await;
        }
        Ok(())
    }
}

/// Move traffic back from the green set to the former active set.
///
/// The former active set must still pass health checks; green targets end
/// `RolledBack` and keep their resources.
pub async fn revert_blue_green(ctx: &RunContext, config: &BlueGreenConfig) -> Result<()> {
    config.validate()?;
    ensure_registered(ctx, config).await?;
    ctx.ensure_not_cancelled()?;

    info!("Reverting traffic from {:?} to {:?}", config.green, config.active);
    ctx.health_gate(&config.active, "blue-green revert").await?;

    ctx.switch_all(&config.green, &config.active).await?;

    for id in &config.active {
        ctx.registry().set_role(id, TargetRole::Primary).await?;
    }
    for id in &config.green {
        ctx.registry().set_role(id, TargetRole::Standby).await?;
        ctx.registry()
            .set_status(id, TargetStatus::RollingBack, Some("reverted".to_string()))
            .await?;
        ctx.registry()
            .set_status(id, TargetStatus::RolledBack, Some("reverted".to_string()))
            .await?;
    }
    Ok(())
}

async fn ensure_registered(ctx: &RunContext, config: &BlueGreenConfig) -> Result<()> {
    for id in config.active.iter().chain(config.green.iter()) {
        if !ctx.registry().contains(id).await {
            return Err(RolloutError::TargetNotFound { id: id.clone() });
        }
    }
    Ok(())
}

/// Best-effort teardown of the new standby set. Its status is left as is
/// so the next run can redeploy it as the shadow set.
async fn destroy_standby(ctx: &RunContext, ids: &[String]) {
    let timeout = ctx.settings.provision_timeout;
    let results = join_all(ids.iter().map(|id| async move {
        let outcome = tokio::time::timeout(timeout, ctx.provisioner.destroy(id)).await;
        (id, outcome)
    }))
    .await;

    for (id, outcome) in results {
        match outcome {
            Ok(Ok(result)) if result.success => {
                info!("Destroyed standby {}", id);
                if let Err(e) = ctx.registry().set_endpoints(id, HashMap::new()).await {
                    warn!("Could not clear endpoints of {}: {}", id, e);
                }
                if let Err(e) = ctx
                    .registry()
                    .set_health(id, HealthStatus::Unknown, Some("destroyed".to_string()))
                    .await
                {
                    warn!("Could not update health of {}: {}", id, e);
                }
            }
            Ok(Ok(result)) => warn!(
                "Destroying standby {} failed: {}",
                id,
                result.error.unwrap_or_default()
            ),
            Ok(Err(e)) => warn!("Destroying standby {} failed: {}", id, e),
            Err(_) => warn!("Destroying standby {} timed out after {:?}", id, timeout),
        }
    }
}
