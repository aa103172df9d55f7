//! CLI command implementations

pub mod export;
pub mod list;
pub mod push;
pub mod serve;
pub mod show;

use crate::capture::{CaptureSession, CapturedRequest, HarLog};
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// Load a HAR file the way the inspector attaches to a page
fn load_session(path: &Path) -> Result<CaptureSession> {
    let log = HarLog::load(path)?;
    let mut session = CaptureSession::new();
    let token = session.begin_reset();
    session.complete_reset(token, &log.entries);
    Ok(session)
}

fn find_request(session: &CaptureSession, id: u64) -> Result<Arc<CapturedRequest>> {
    session
        .get(id)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Request not found: {}", id))
}

/// Truncate to `max` characters, marking the cut with `...`
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("https://up.web3.storage/", 12), "https://u...");
    }

    #[test]
    fn test_load_session_assigns_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.har");
        std::fs::write(
            &path,
            r#"{"log":{"entries":[{"request":{"url":"https://a/"}},{"request":{"url":"https://b/"}}]}}"#,
        )
        .unwrap();

        let session = load_session(&path).unwrap();
        assert_eq!(session.len(), 2);
        assert_eq!(find_request(&session, 2).unwrap().url, "https://b/");
        assert!(find_request(&session, 3).is_err());
    }
}
