use crate::error::{Result, RolloutError};
use crate::strategy::{mismatch, RunContext, StrategyExecutor};
use crate::types::{DeploymentStrategyConfig, StrategyKind};
use async_trait::async_trait;
use tracing::info;

/// Deploys every registered target at once and reports every failure.
pub struct ParallelExecutor;

#[async_trait]
impl StrategyExecutor for ParallelExecutor {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Parallel
    }

    async fn execute(&self, ctx: &RunContext, strategy: &DeploymentStrategyConfig) -> Result<()> {
        if !matches!(strategy, DeploymentStrategyConfig::Parallel) {
            return Err(mismatch(self.kind(), strategy));
        }
        ctx.ensure_not_cancelled()?;

        let ids = ctx.registry().ids().await;
        info!("Deploying {} target(s) in parallel", ids.len());

        ctx.deploy_batch(&ids).await.map_err(RolloutError::Aggregate)
    }
}
