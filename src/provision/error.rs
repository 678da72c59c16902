use crate::process::ProcessError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{operation} for target {target} exited with code {exit_code}: {stderr}")]
    CommandFailed {
        operation: String,
        target: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Invalid outputs for target {target}: {reason}")]
    InvalidOutputs { target: String, reason: String },

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Process(#[from] ProcessError),
}
