use super::har::{HarEntry, HarLog};
use super::request::{Body, CapturedRequest};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Where captured traffic comes from
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Snapshot of every request captured so far
    async fn get_har(&self) -> Result<Vec<HarEntry>>;

    /// Response body, fetched lazily on selection
    async fn get_response_body(&self, request: Arc<CapturedRequest>) -> Result<Option<Body>> {
        Ok(request.response_body.clone())
    }
}

/// Reads a HAR export from disk; re-read on every snapshot
#[derive(Debug, Clone)]
pub struct HarFileSource {
    path: PathBuf,
}

impl HarFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CaptureSource for HarFileSource {
    async fn get_har(&self) -> Result<Vec<HarEntry>> {
        let path = self.path.clone();
        let log = tokio::task::spawn_blocking(move || HarLog::load(&path)).await??;
        tracing::debug!("Loaded {} entries from {}", log.entries.len(), self.path.display());
        Ok(log.entries)
    }
}

/// Fixed in-memory snapshot; live traffic arrives through the push API
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    entries: Vec<HarEntry>,
}

#[cfg(test)]
impl MemorySource {
    pub fn new(entries: Vec<HarEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl CaptureSource for MemorySource {
    async fn get_har(&self) -> Result<Vec<HarEntry>> {
        Ok(self.entries.clone())
    }
}
