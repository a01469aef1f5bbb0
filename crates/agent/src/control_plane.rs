//! HTTP client for the agent control plane.

use async_trait::async_trait;
use flotilla_core::{Config, Error, RegistrationRecord, Result};
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;

pub const REGISTER_PATH: &str = "/agents/register";
pub const HEARTBEAT_PATH: &str = "/agents/heartbeat";
pub const STATUS_PATH: &str = "/agents/status";

#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Announce the agent. Success means any 2xx response.
    async fn register(&self, record: &RegistrationRecord) -> Result<()>;

    /// Periodic liveness report. Same body as `register`.
    async fn heartbeat(&self, record: &RegistrationRecord) -> Result<()>;

    /// Every agent the control plane currently knows about.
    async fn status(&self) -> Result<Vec<RegistrationRecord>>;
}

pub struct HttpControlPlane {
    base_url: String,
    client: Client,
}

impl HttpControlPlane {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.api_url, config.http_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_record(&self, path: &str, record: &RegistrationRecord) -> Result<()> {
        let response = self
            .client
            .post(self.url(path))
            .json(record)
            .send()
            .await
            .map_err(|e| Error::ControlPlane(format!("POST {} failed: {}", path, e)))?;
        check_status(response, path)?;
        debug!(path, agent = record.identity.name(), "Control plane accepted record");
        Ok(())
    }
}

fn check_status(response: Response, path: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(Error::HttpStatus {
            status: status.as_u16(),
            endpoint: path.to_string(),
        })
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn register(&self, record: &RegistrationRecord) -> Result<()> {
        self.post_record(REGISTER_PATH, record).await
    }

    async fn heartbeat(&self, record: &RegistrationRecord) -> Result<()> {
        self.post_record(HEARTBEAT_PATH, record).await
    }

    async fn status(&self) -> Result<Vec<RegistrationRecord>> {
        let response = self
            .client
            .get(self.url(STATUS_PATH))
            .send()
            .await
            .map_err(|e| Error::ControlPlane(format!("GET {} failed: {}", STATUS_PATH, e)))?;
        let response = check_status(response, STATUS_PATH)?;
        response
            .json()
            .await
            .map_err(|e| Error::ControlPlane(format!("Failed to parse status response: {}", e)))
    }
}
