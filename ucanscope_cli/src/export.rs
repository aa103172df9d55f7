//! Saving request or response bodies as `.car` files

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Which side of a transaction to export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BodyPart {
    Request,
    Response,
}

impl fmt::Display for BodyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BodyPart::Request => "request",
            BodyPart::Response => "response",
        })
    }
}

const URL_PART_LEN: usize = 30;

/// `<label>_<timestamp>_<sanitized url>.car`, safe on every filesystem
pub fn car_file_name(label: &str, url: &str, at: DateTime<Utc>) -> String {
    let timestamp = at
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
        .replace(|c| c == ':' || c == '.', "-");
    let url_part: String = url
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(URL_PART_LEN)
        .collect();
    format!("{}_{}_{}.car", label, timestamp, url_part)
}

/// Write `bytes` into `dir` under a generated name
pub fn write_car(dir: &Path, label: &str, url: &str, bytes: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create export directory {}", dir.display()))?;
    let path = dir.join(car_file_name(label, url, Utc::now()));
    fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!("Exported {} bytes to {}", bytes.len(), path.display());
    Ok(path)
}
