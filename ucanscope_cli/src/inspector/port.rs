//! Choosing a port for `serve`

use super::client::InspectorClient;
use super::server::SERVICE_NAME;
use anyhow::Result;
use std::time::Duration;
use tokio::net::TcpListener;

/// Number of ports tried, starting at the preferred one
const PORT_RANGE: u16 = 10;

const HEALTH_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectorMode {
    /// Nothing listens here; start a server
    Server(u16),
    /// An inspector already answers here
    Running(u16),
}

impl InspectorMode {
    pub fn port(&self) -> u16 {
        match self {
            InspectorMode::Server(p) | InspectorMode::Running(p) => *p,
        }
    }
}

/// Whether the process listening on `port` is an inspector
async fn answers_as_inspector(port: u16) -> bool {
    let Ok(client) = InspectorClient::with_timeout(port, HEALTH_TIMEOUT) else {
        return false;
    };
    client
        .health()
        .await
        .is_ok_and(|health| health.service == SERVICE_NAME)
}

/// Walk up from `preferred_port` until a port is free or already serves an
/// inspector. Ports held by anything else are skipped.
pub async fn find_inspector_port(preferred_port: u16) -> Result<InspectorMode> {
    let last = preferred_port.saturating_add(PORT_RANGE - 1);
    for port in preferred_port..=last {
        if TcpListener::bind(("127.0.0.1", port)).await.is_ok() {
            return Ok(InspectorMode::Server(port));
        }
        if answers_as_inspector(port).await {
            tracing::debug!("Inspector already running on port {}", port);
            return Ok(InspectorMode::Running(port));
        }
        tracing::debug!("Port {} is taken, trying the next one", port);
    }

    anyhow::bail!("No free port for the inspector in {}..={}", preferred_port, last)
}
