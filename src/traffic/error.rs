use crate::process::ProcessError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrafficError {
    #[error("Invalid weight {weight} for target {target}: must be within 0..=1")]
    InvalidWeight { target: String, weight: f64 },

    #[error("Traffic command failed with exit code {exit_code}: {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    #[error("Traffic backend rejected the change: {0}")]
    Rejected(String),

    #[error(transparent)]
    Process(#[from] ProcessError),
}
