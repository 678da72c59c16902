//! Rollout Orchestrator - progressive deployment across many targets
//!
//! This crate sequences provisioning, health checks and traffic changes to
//! roll a new version out to regions, environments or canary slices using
//! parallel, rolling, blue-green or canary strategies.

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod orchestrator;
pub mod process;
pub mod provision;
pub mod registry;
pub mod strategy;
pub mod traffic;
pub mod types;

pub use config::{OrchestratorSettings, RolloutConfig};
pub use error::{AggregateError, Result, RolloutError};
pub use orchestrator::{DeploymentReport, HealthMonitor, Orchestrator};
pub use registry::TargetRegistry;
pub use types::*;
