use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Point-in-time comparison of a canary against its baseline.
///
/// Recomputed on every monitoring tick and never persisted beyond the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryMetrics {
    pub canary_target: String,
    pub baseline_target: String,
    pub canary_success_rate: f64,
    pub baseline_success_rate: f64,
    pub canary_error_rate: f64,
    pub baseline_error_rate: f64,
    pub canary_response_time: Duration,
    pub baseline_response_time: Duration,
    pub traffic_percent: f64,
    pub elapsed: Duration,
}

impl fmt::Display for CanaryMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "canary {} success={:.3} error={:.3} latency={:?} vs baseline {} success={:.3} error={:.3} latency={:?} at {:.1}% after {:?}",
            self.canary_target,
            self.canary_success_rate,
            self.canary_error_rate,
            self.canary_response_time,
            self.baseline_target,
            self.baseline_success_rate,
            self.baseline_error_rate,
            self.baseline_response_time,
            self.traffic_percent,
            self.elapsed
        )
    }
}
