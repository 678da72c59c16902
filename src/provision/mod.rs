//! Provisioning backends: make a target match a desired version, or tear it
//! down.

pub mod command;
pub mod error;

pub use command::{CommandBackend, CommandBackendConfig};
pub use error::ProvisionError;

use crate::types::{DeploymentResult, DesiredState};
use async_trait::async_trait;
use std::collections::HashMap;

/// Turns a target's desired state into real infrastructure.
///
/// Results are interpreted only through `success` and `outputs`; everything
/// else passes through to the caller untouched.
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Prepare the backend for `desired` (workspace selection, plugin
    /// installation). Called before every `deploy`.
    async fn initialize(&self, desired: &DesiredState) -> Result<(), ProvisionError>;

    async fn deploy(&self, desired: &DesiredState) -> Result<DeploymentResult, ProvisionError>;

    async fn destroy(&self, target_id: &str) -> Result<DeploymentResult, ProvisionError>;

    async fn outputs(
        &self,
        target_id: &str,
    ) -> Result<HashMap<String, serde_json::Value>, ProvisionError>;
}
