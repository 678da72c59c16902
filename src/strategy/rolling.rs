use crate::error::{AggregateError, Result, RolloutError};
use crate::strategy::{mismatch, RunContext, StrategyExecutor};
use crate::types::{DeploymentStrategyConfig, RollingConfig, StrategyKind};
use async_trait::async_trait;
use tracing::{info, warn};

/// Deploys the registered targets in consecutive fixed-size batches.
pub struct RollingExecutor;

#[async_trait]
impl StrategyExecutor for RollingExecutor {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Rolling
    }

    async fn execute(&self, ctx: &RunContext, strategy: &DeploymentStrategyConfig) -> Result<()> {
        let DeploymentStrategyConfig::Rolling(config) = strategy else {
            return Err(mismatch(self.kind(), strategy));
        };
        config.validate()?;

        let ids = ctx.registry().ids().await;
        let batches = partition(&ids, config.batch_size);
        let total = batches.len();
        info!(
            "Rolling out to {} target(s) in {} batch(es) of up to {}",
            ids.len(),
            total,
            config.batch_size
        );

        for (index, batch) in batches.iter().enumerate() {
            ctx.ensure_not_cancelled()?;
            info!("Starting batch {}/{}: {:?}", index + 1, total, batch);

            let failures = match run_batch(ctx, config, batch).await {
                Ok(()) => None,
                Err(RolloutError::Aggregate(failures)) => Some(failures),
                // Cancelled mid-batch: leave the batch running as provisioned.
                Err(other) => return Err(other),
            };
            if let Some(failures) = failures {
                if config.rollback_on_failure {
                    warn!("Batch {}/{} failed, rolling it back", index + 1, total);
                    ctx.rollback_batch(batch, &format!("batch {} failed", index + 1))
                        .await;
                } else {
                    warn!(
                        "Batch {}/{} failed, leaving its targets as they are",
                        index + 1,
                        total
                    );
                }
                return Err(RolloutError::BatchFailed {
                    batch: index + 1,
                    total,
                    source: failures,
                });
            }

            if index + 1 < total && !config.batch_delay.is_zero() {
                ctx.sleep(config.batch_delay).await?;
            }
        }

        info!("Rolling deployment finished");
        Ok(())
    }
}

/// Deploy and optionally verify one batch. Target failures come back as
/// `RolloutError::Aggregate`; cancellation passes through untouched.
async fn run_batch(ctx: &RunContext, config: &RollingConfig, batch: &[String]) -> Result<()> {
    ctx.deploy_batch(batch).await?;

    if !config.verify_health {
        return Ok(());
    }

    match ctx.health_gate(batch, "rolling batch").await {
        Ok(()) => Ok(()),
        Err(RolloutError::HealthGate { failures, .. }) => Err(AggregateError::new(
            failures
                .into_iter()
                .map(|(target, reason)| RolloutError::HealthCheck { target, reason })
                .collect(),
        )
        .into()),
        Err(RolloutError::Cancelled) => Err(RolloutError::Cancelled),
        Err(other) => Err(AggregateError::new(vec![other]).into()),
    }
}

/// Split `ids` into consecutive batches of `batch_size`; the last batch may
/// be smaller. A zero batch size is treated as one.
pub fn partition(ids: &[String], batch_size: usize) -> Vec<Vec<String>> {
    ids.chunks(batch_size.max(1)).map(<[String]>::to_vec).collect()
}
