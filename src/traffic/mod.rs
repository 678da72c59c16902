//! Traffic shifting between targets.

pub mod command;
pub mod error;

pub use command::{CommandTrafficConfig, CommandTrafficManager};
pub use error::TrafficError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

/// Controls what fraction of live traffic reaches each target.
///
/// Changes are not assumed to be idempotent or instantaneous; callers verify
/// the outcome through health checks.
#[async_trait]
pub trait TrafficManager: Send + Sync {
    /// Route `weight` (0..=1) of traffic to `target`.
    async fn set_weight(&self, target: &str, weight: f64) -> Result<(), TrafficError>;

    /// Move all traffic from `from` to `to` in one atomic cutover.
    async fn switch_all(&self, from: &[String], to: &[String]) -> Result<(), TrafficError>;
}

pub(crate) fn validate_weight(target: &str, weight: f64) -> Result<(), TrafficError> {
    if (0.0..=1.0).contains(&weight) {
        Ok(())
    } else {
        Err(TrafficError::InvalidWeight {
            target: target.to_string(),
            weight,
        })
    }
}

/// One applied traffic change, in the order it happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrafficChange {
    Weight { target: String, weight: f64 },
    Switch { from: Vec<String>, to: Vec<String> },
}

/// Keeps routing weights in memory.
///
/// Useful when the routing layer is driven elsewhere, for dry runs, and for
/// observing exactly which changes a rollout made.
#[derive(Debug, Default)]
pub struct InMemoryTrafficManager {
    state: RwLock<TrafficState>,
}

#[derive(Debug, Default)]
struct TrafficState {
    weights: HashMap<String, f64>,
    history: Vec<TrafficChange>,
}

impl InMemoryTrafficManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn weight(&self, target: &str) -> f64 {
        self.state
            .read()
            .await
            .weights
            .get(target)
            .copied()
            .unwrap_or(0.0)
    }

    pub async fn weights(&self) -> HashMap<String, f64> {
        self.state.read().await.weights.clone()
    }

    pub async fn history(&self) -> Vec<TrafficChange> {
        self.state.read().await.history.clone()
    }

    /// Number of `switch_all` cutovers applied so far.
    pub async fn switch_count(&self) -> usize {
        self.state
            .read()
            .await
            .history
            .iter()
            .filter(|change| matches!(change, TrafficChange::Switch { .. }))
            .count()
    }
}

#[async_trait]
impl TrafficManager for InMemoryTrafficManager {
    async fn set_weight(&self, target: &str, weight: f64) -> Result<(), TrafficError> {
        validate_weight(target, weight)?;
        let mut state = self.state.write().await;
        state.weights.insert(target.to_string(), weight);
        state.history.push(TrafficChange::Weight {
            target: target.to_string(),
            weight,
        });
        info!("Traffic weight for {} set to {:.3}", target, weight);
        Ok(())
    }

    async fn switch_all(&self, from: &[String], to: &[String]) -> Result<(), TrafficError> {
        if to.is_empty() {
            return Err(TrafficError::Rejected(
                "cannot switch traffic to an empty target set".to_string(),
            ));
        }
        let share = 1.0 / to.len() as f64;
        let mut state = self.state.write().await;
        for target in from {
            state.weights.insert(target.clone(), 0.0);
        }
        for target in to {
            state.weights.insert(target.clone(), share);
        }
        state.history.push(TrafficChange::Switch {
            from: from.to_vec(),
            to: to.to_vec(),
        });
        info!("Switched all traffic from {:?} to {:?}", from, to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_weights_and_history() {
        let traffic = InMemoryTrafficManager::new();
        traffic.set_weight("canary", 0.05).await.unwrap();
        traffic.set_weight("canary", 0.10).await.unwrap();

        assert_eq!(traffic.weight("canary").await, 0.10);
        assert_eq!(traffic.weight("unknown").await, 0.0);
        assert_eq!(traffic.history().await.len(), 2);
        assert_eq!(traffic.switch_count().await, 0);
    }

    #[tokio::test]
    async fn rejects_out_of_range_weight() {
        let traffic = InMemoryTrafficManager::new();
        assert!(matches!(
            traffic.set_weight("canary", 1.5).await,
            Err(TrafficError::InvalidWeight { .. })
        ));
        assert!(traffic.history().await.is_empty());
    }

    #[tokio::test]
    async fn switch_moves_everything() {
        let traffic = InMemoryTrafficManager::new();
        traffic.set_weight("blue-a", 0.5).await.unwrap();
        traffic.set_weight("blue-b", 0.5).await.unwrap();

        let from = vec!["blue-a".to_string(), "blue-b".to_string()];
        let to = vec!["green-a".to_string(), "green-b".to_string()];
        traffic.switch_all(&from, &to).await.unwrap();

        assert_eq!(traffic.weight("blue-a").await, 0.0);
        assert_eq!(traffic.weight("green-b").await, 0.5);
        assert_eq!(traffic.switch_count().await, 1);
    }
}
