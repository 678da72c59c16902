use crate::process::{self, CommandOutput};
use crate::provision::{ProvisionError, ProvisioningBackend};
use crate::types::{DeploymentResult, DesiredState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Command templates for a CLI-driven infrastructure tool.
///
/// Placeholders: `{target}`, `{version}` and `{param.<name>}` for every entry
/// in `parameters` or the desired state's parameters. `working_dir` may use
/// the same placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandBackendConfig {
    #[serde(default)]
    pub init: Option<String>,
    pub deploy: String,
    pub destroy: String,
    /// Must print a JSON object. `{"name": {"value": ...}}` entries are unwrapped.
    #[serde(default)]
    pub outputs: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

pub struct CommandBackend {
    config: CommandBackendConfig,
    /// Last desired state per target, so `destroy` and `outputs` expand the
    /// same `{version}` and `{param.<name>}` values as `deploy`.
    desired: RwLock<HashMap<String, DesiredState>>,
}

impl CommandBackend {
    pub fn new(config: CommandBackendConfig) -> Self {
        Self {
            config,
            desired: RwLock::new(HashMap::new()),
        }
    }

    fn vars_for(&self, target_id: &str, desired: Option<&DesiredState>) -> HashMap<String, String> {
        let mut vars: HashMap<String, String> = self
            .config
            .parameters
            .iter()
            .map(|(k, v)| (format!("param.{k}"), v.clone()))
            .collect();
        vars.insert("target".to_string(), target_id.to_string());

        if let Some(desired) = desired {
            for (k, v) in &desired.parameters {
                vars.insert(format!("param.{k}"), v.clone());
            }
            vars.insert("version".to_string(), desired.version.clone());
        }
        vars
    }

    async fn remembered_vars(&self, target_id: &str) -> HashMap<String, String> {
        let desired = self.desired.read().await;
        self.vars_for(target_id, desired.get(target_id))
    }

    async fn run(
        &self,
        template: &str,
        vars: &HashMap<String, String>,
    ) -> Result<CommandOutput, ProvisionError> {
        let command = process::expand(template, vars)?;
        let working_dir = match &self.config.working_dir {
            Some(dir) => Some(PathBuf::from(process::expand(dir, vars)?)),
            None => None,
        };
        Ok(process::run(&command, working_dir.as_deref()).await?)
    }

    async fn fetch_outputs(
        &self,
        target_id: &str,
        vars: &HashMap<String, String>,
    ) -> Result<HashMap<String, serde_json::Value>, ProvisionError> {
        let Some(template) = &self.config.outputs else {
            return Ok(HashMap::new());
        };

        let output = self.run(template, vars).await?;
        if !output.success {
            return Err(ProvisionError::CommandFailed {
                operation: "outputs".to_string(),
                target: target_id.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        parse_outputs(target_id, &output.stdout)
    }
}

#[async_trait]
impl ProvisioningBackend for CommandBackend {
    async fn initialize(&self, desired: &DesiredState) -> Result<(), ProvisionError> {
        self.desired
            .write()
            .await
            .insert(desired.target_id.clone(), desired.clone());

        let Some(template) = &self.config.init else {
            return Ok(());
        };

        let vars = self.vars_for(&desired.target_id, Some(desired));
        let output = self.run(template, &vars).await?;
        if !output.success {
            return Err(ProvisionError::CommandFailed {
                operation: "init".to_string(),
                target: desired.target_id.clone(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        debug!("Initialized backend for {}", desired.target_id);
        Ok(())
    }

    async fn deploy(&self, desired: &DesiredState) -> Result<DeploymentResult, ProvisionError> {
        info!(
            "Deploying version {} to target {}",
            desired.version, desired.target_id
        );

        let vars = self.vars_for(&desired.target_id, Some(desired));
        let output = self.run(&self.config.deploy, &vars).await?;

        if !output.success {
            warn!(
                "Deploy command for {} exited with code {}",
                desired.target_id, output.exit_code
            );
            return Ok(DeploymentResult::failed(
                format!(
                    "deploy exited with code {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
                output.duration,
            ));
        }

        let outputs = self.fetch_outputs(&desired.target_id, &vars).await?;
        Ok(DeploymentResult::succeeded(outputs, output.duration))
    }

    async fn destroy(&self, target_id: &str) -> Result<DeploymentResult, ProvisionError> {
        info!("Destroying target {}", target_id);

        let vars = self.remembered_vars(target_id).await;
        let output = self.run(&self.config.destroy, &vars).await?;

        if output.success {
            Ok(DeploymentResult::succeeded(HashMap::new(), output.duration))
        } else {
            Ok(DeploymentResult::failed(
                format!(
                    "destroy exited with code {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
                output.duration,
            ))
        }
    }

    async fn outputs(
        &self,
        target_id: &str,
    ) -> Result<HashMap<String, serde_json::Value>, ProvisionError> {
        let vars = self.remembered_vars(target_id).await;
        self.fetch_outputs(target_id, &vars).await
    }
}

/// Parse an outputs document, unwrapping `{"value": ...}` wrappers.
pub fn parse_outputs(
    target_id: &str,
    stdout: &str,
) -> Result<HashMap<String, serde_json::Value>, ProvisionError> {
    if stdout.trim().is_empty() {
        return Ok(HashMap::new());
    }

    let document: serde_json::Map<String, serde_json::Value> = serde_json::from_str(stdout)
        .map_err(|e| ProvisionError::InvalidOutputs {
            target: target_id.to_string(),
            reason: e.to_string(),
        })?;

    Ok(document
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::Object(mut wrapped) if wrapped.contains_key("value") => {
                    wrapped.remove("value").unwrap_or(serde_json::Value::Null)
                }
                other => other,
            };
            (key, value)
        })
        .collect())
}
