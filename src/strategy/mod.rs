//! Strategy executors: one control-flow algorithm per strategy kind.

pub mod blue_green;
pub mod canary;
pub mod context;
pub mod parallel;
pub mod rolling;

pub use blue_green::{revert_blue_green, BlueGreenExecutor};
pub use canary::{evaluate_canary, is_canary_healthy, CanaryExecutor};
pub use context::RunContext;
pub use parallel::ParallelExecutor;
pub use rolling::{partition, RollingExecutor};

use crate::error::{Result, RolloutError};
use crate::types::{DeploymentStrategyConfig, StrategyKind};
use async_trait::async_trait;
use std::collections::HashMap;

/// Sequences provisioning, health checks and traffic changes for one kind
/// of strategy.
#[async_trait]
pub trait StrategyExecutor: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn execute(&self, ctx: &RunContext, strategy: &DeploymentStrategyConfig) -> Result<()>;
}

/// Dispatch table from strategy kind to executor.
pub struct StrategyTable {
    executors: HashMap<StrategyKind, Box<dyn StrategyExecutor>>,
}

impl StrategyTable {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// A table with the four built-in executors registered.
    pub fn with_standard_executors() -> Self {
        let mut table = Self::new();
        table.register(Box::new(ParallelExecutor));
        table.register(Box::new(RollingExecutor));
        table.register(Box::new(BlueGreenExecutor));
        table.register(Box::new(CanaryExecutor));
        table
    }

    /// Register an executor, replacing any previous one of the same kind.
    pub fn register(&mut self, executor: Box<dyn StrategyExecutor>) {
        self.executors.insert(executor.kind(), executor);
    }

    pub fn get(&self, kind: StrategyKind) -> Option<&dyn StrategyExecutor> {
        self.executors.get(&kind).map(|e| e.as_ref())
    }

    pub fn kinds(&self) -> Vec<StrategyKind> {
        self.executors.keys().copied().collect()
    }

    pub async fn execute(&self, ctx: &RunContext, strategy: &DeploymentStrategyConfig) -> Result<()> {
        let kind = strategy.kind();
        let executor = self.get(kind).ok_or_else(|| {
            RolloutError::InvalidStrategy(format!("no executor registered for {kind}"))
        })?;
        executor.execute(ctx, strategy).await
    }
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::with_standard_executors()
    }
}

/// Error for an executor handed a configuration of another kind.
pub(crate) fn mismatch(expected: StrategyKind, strategy: &DeploymentStrategyConfig) -> RolloutError {
    RolloutError::InvalidStrategy(format!(
        "{expected} executor cannot run a {} strategy",
        strategy.kind()
    ))
}
