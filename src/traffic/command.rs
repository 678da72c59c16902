use crate::process;
use crate::traffic::{validate_weight, TrafficError, TrafficManager};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

/// Command templates for an external routing tool (DNS weights, load
/// balancer target groups, service mesh routes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandTrafficConfig {
    /// Placeholders: `{target}`, `{weight}` (0..1), `{percent}` (0..100).
    pub set_weight: String,
    /// Placeholders: `{from}` and `{to}`, comma-separated target ids.
    pub switch_all: String,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

pub struct CommandTrafficManager {
    config: CommandTrafficConfig,
}

impl CommandTrafficManager {
    pub fn new(config: CommandTrafficConfig) -> Self {
        Self { config }
    }

    async fn run(&self, template: &str, vars: HashMap<String, String>) -> Result<(), TrafficError> {
        let command = process::expand(template, &vars)?;
        let output = process::run(&command, self.config.working_dir.as_deref()).await?;
        if !output.success {
            return Err(TrafficError::CommandFailed {
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TrafficManager for CommandTrafficManager {
    async fn set_weight(&self, target: &str, weight: f64) -> Result<(), TrafficError> {
        validate_weight(target, weight)?;
        let vars = HashMap::from([
            ("target".to_string(), target.to_string()),
            ("weight".to_string(), format!("{weight:.4}")),
            ("percent".to_string(), format!("{:.2}", weight * 100.0)),
        ]);
        self.run(&self.config.set_weight, vars).await?;
        info!("Traffic weight for {} set to {:.3}", target, weight);
        Ok(())
    }

    async fn switch_all(&self, from: &[String], to: &[String]) -> Result<(), TrafficError> {
        let vars = HashMap::from([
            ("from".to_string(), from.join(",")),
            ("to".to_string(), to.join(",")),
        ]);
        self.run(&self.config.switch_all, vars).await?;
        info!("Switched all traffic from {:?} to {:?}", from, to);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn manager(set_weight: &str, switch_all: &str) -> CommandTrafficManager {
        CommandTrafficManager::new(CommandTrafficConfig {
            set_weight: set_weight.to_string(),
            switch_all: switch_all.to_string(),
            working_dir: None,
        })
    }

    #[tokio::test]
    async fn successful_commands_apply() {
        let traffic = manager("echo {target} {percent}", "echo {from} {to}");
        traffic.set_weight("canary", 0.25).await.unwrap();
        traffic
            .switch_all(&["blue".to_string()], &["green".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failing_command_is_an_error() {
        let traffic = manager("false", "false");
        assert!(matches!(
            traffic.set_weight("canary", 0.25).await,
            Err(TrafficError::CommandFailed { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_placeholder_never_runs() {
        let traffic = manager("echo {region}", "echo");
        assert!(matches!(
            traffic.set_weight("canary", 0.1).await,
            Err(TrafficError::Process(_))
        ));
    }
}
