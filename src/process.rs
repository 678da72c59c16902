//! Running operator-supplied command templates.
//!
//! Templates use `{name}` placeholders. Expansion fails on a placeholder with
//! no value, so a typo never reaches the infrastructure tool as a literal.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

static PLACEHOLDER: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_.]*)\}"));

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Unknown placeholder {{{name}}} in command template: {template}")]
    UnknownPlaceholder { name: String, template: String },

    #[error("Invalid command line {command}: {reason}")]
    InvalidCommand { command: String, reason: String },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Placeholder pattern failed to compile: {0}")]
    Pattern(String),
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Replace every `{name}` in `template` with its value from `vars`.
pub fn expand(template: &str, vars: &HashMap<String, String>) -> Result<String, ProcessError> {
    let pattern = PLACEHOLDER
        .as_ref()
        .map_err(|e| ProcessError::Pattern(e.to_string()))?;

    if let Some(missing) = pattern
        .captures_iter(template)
        .filter_map(|caps| caps.get(1))
        .find(|name| !vars.contains_key(name.as_str()))
    {
        return Err(ProcessError::UnknownPlaceholder {
            name: missing.as_str().to_string(),
            template: template.to_string(),
        });
    }

    Ok(pattern
        .replace_all(template, |caps: &regex::Captures| {
            caps.get(1)
                .and_then(|name| vars.get(name.as_str()))
                .cloned()
                .unwrap_or_default()
        })
        .into_owned())
}

/// Run a command line without a shell. Arguments are split with shell
/// quoting rules so values containing spaces can be quoted in the template.
pub async fn run(command_line: &str, working_dir: Option<&Path>) -> Result<CommandOutput, ProcessError> {
    let words = shell_words::split(command_line).map_err(|e| ProcessError::InvalidCommand {
        command: command_line.to_string(),
        reason: e.to_string(),
    })?;
    let (program, args) = words.split_first().ok_or_else(|| ProcessError::InvalidCommand {
        command: command_line.to_string(),
        reason: "empty command".to_string(),
    })?;

    debug!("Running command: {}", command_line);

    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    let start = Instant::now();
    let output = cmd.output().await.map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    Ok(CommandOutput {
        success: output.status.success(),
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn expands_known_placeholders() {
        let expanded = expand(
            "tofu apply -var version={version} -var-file={target}.tfvars -var tier={param.tier}",
            &vars(&[
                ("version", "v2.1.0"),
                ("target", "us-east-1"),
                ("param.tier", "gold"),
            ]),
        )
        .unwrap();
        assert_eq!(
            expanded,
            "tofu apply -var version=v2.1.0 -var-file=us-east-1.tfvars -var tier=gold"
        );
    }

    #[test]
    fn rejects_unknown_placeholders() {
        let err = expand("deploy {target} {verison}", &vars(&[("target", "t")])).unwrap_err();
        match err {
            ProcessError::UnknownPlaceholder { name, .. } => assert_eq!(name, "verison"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn json_braces_are_left_alone() {
        let expanded = expand(r#"echo '{"ok": true}' {target}"#, &vars(&[("target", "t")])).unwrap();
        assert_eq!(expanded, r#"echo '{"ok": true}' t"#);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_without_a_shell() {
        let output = run("echo 'hello world' $HOME", None).await.unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hello world $HOME");
    }

    #[tokio::test]
    async fn empty_command_is_invalid() {
        assert!(matches!(
            run("   ", None).await,
            Err(ProcessError::InvalidCommand { .. })
        ));
    }
}
