//! Client for pushing captured traffic into a running inspector

use super::server::SERVICE_NAME;
use super::state::RequestSummary;
use crate::capture::HarEntry;
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct InspectorClient {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub service: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
struct NavigatedResponse {
    cleared: bool,
}

impl InspectorClient {
    pub fn new(port: u16) -> Result<Self> {
        Self::with_timeout(port, Duration::from_secs(5))
    }

    pub fn with_timeout(port: u16, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: format!("http://127.0.0.1:{}", port),
            client,
        })
    }

    /// Get the inspector URL
    pub fn inspector_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = format!("{}/api/health", self.base_url);
        self.client
            .get(&url)
            .send()
            .await
            .context("Inspector is not reachable")?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse health response")
    }

    /// Client for the inspector on `port`, failing unless one answers there
    pub async fn connect(port: u16) -> Result<Self> {
        let client = Self::new(port)?;
        let health = client.health().await.with_context(|| {
            format!(
                "No inspector running on port {}. Start one with `ucanscope serve`.",
                port
            )
        })?;
        if health.service != SERVICE_NAME {
            anyhow::bail!("Port {} is used by {}, not an inspector", port, health.service);
        }
        tracing::debug!("Connected to {} {}", health.service, health.version);
        Ok(client)
    }

    /// Send one finished request to the inspector
    pub async fn submit_entry(&self, entry: &HarEntry) -> Result<RequestSummary> {
        let url = format!("{}/api/capture/entries", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(entry)
            .send()
            .await
            .context("Failed to submit request to inspector")?;

        if !response.status().is_success() {
            anyhow::bail!("Inspector rejected request: {}", response.status());
        }

        response
            .json()
            .await
            .context("Failed to parse inspector response")
    }

    /// Report a page navigation; returns whether the inspector cleared
    pub async fn navigated(&self) -> Result<bool> {
        let url = format!("{}/api/capture/navigated", self.base_url);
        let response: NavigatedResponse = self
            .client
            .post(&url)
            .send()
            .await
            .context("Failed to report navigation")?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse navigation response")?;
        Ok(response.cleared)
    }
}
