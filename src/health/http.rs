use crate::health::{HealthCheckError, HealthChecker};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpHealthConfig {
    /// Path appended to every endpoint, e.g. `/healthz`.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Exact status to require. Any 2xx passes when unset.
    #[serde(default)]
    pub expected_status: Option<u16>,
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for HttpHealthConfig {
    fn default() -> Self {
        Self {
            path: None,
            timeout_secs: default_timeout_secs(),
            expected_status: None,
        }
    }
}

/// Probes endpoints with an HTTP GET.
pub struct HttpHealthChecker {
    client: Client,
    config: HttpHealthConfig,
}

impl HttpHealthChecker {
    pub fn new(config: HttpHealthConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    /// Resolve an endpoint address into the URL that is probed. Bare
    /// `host:port` addresses are treated as plain HTTP.
    pub fn probe_url(&self, endpoint: &str) -> Result<Url, HealthCheckError> {
        let address = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{endpoint}")
        };

        let mut url = Url::parse(&address).map_err(|e| HealthCheckError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        if let Some(path) = &self.config.path {
            let joined = format!(
                "{}/{}",
                url.path().trim_end_matches('/'),
                path.trim_start_matches('/')
            );
            url.set_path(&joined);
        }
        Ok(url)
    }
}

impl Default for HttpHealthChecker {
    fn default() -> Self {
        Self::new(HttpHealthConfig::default())
    }
}

#[async_trait]
impl HealthChecker for HttpHealthChecker {
    async fn check(&self, endpoint: &str) -> Result<(), HealthCheckError> {
        let url = self.probe_url(endpoint)?;
        debug!("Probing {}", url);

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        let passed = match self.config.expected_status {
            Some(expected) => status.as_u16() == expected,
            None => status.is_success(),
        };

        if passed {
            Ok(())
        } else {
            Err(HealthCheckError::UnexpectedStatus {
                endpoint: url.to_string(),
                status: status.as_u16(),
            })
        }
    }
}
