//! `ucanscope serve`: run the inspector

use crate::capture::{CaptureSource, HarFileSource, MemorySource};
use crate::config::Config;
use crate::inspector::{find_inspector_port, start_server, Inspector, InspectorMode};
use crate::storage::{FileStore, KeyValueStore, MemoryStore};
use anyhow::{Context, Result};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;

pub struct ServeOptions {
    pub har: Option<PathBuf>,
    pub port: Option<u16>,
    pub open: bool,
    pub ephemeral: bool,
}

pub async fn run(opts: ServeOptions) -> Result<()> {
    let config = Config::load()?;
    let preferred = opts.port.unwrap_or(config.inspector_port);

    let mode = find_inspector_port(preferred).await?;
    if let InspectorMode::Running(port) = mode {
        anyhow::bail!(
            "An inspector is already running at http://127.0.0.1:{}. Use `ucanscope push` to send it traffic.",
            port
        );
    }
    let port = mode.port();

    let storage: Arc<dyn KeyValueStore> = if opts.ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        let store = FileStore::new(config.storage_dir());
        tracing::debug!("Persisting inspector state in {}", store.dir().display());
        Arc::new(store)
    };

    let source: Arc<dyn CaptureSource> = match &opts.har {
        Some(path) => Arc::new(HarFileSource::new(path)),
        None => Arc::new(MemorySource::default()),
    };

    let inspector = Arc::new(Inspector::new(storage, source));
    match inspector.attach().await {
        Ok(Some(count)) if opts.har.is_some() => println!("Loaded {} requests", count),
        Ok(_) => {}
        Err(e) => println!("{} {:#}", style("warning:").yellow(), e),
    }

    let handle = start_server(port, inspector).await?;
    let url = format!("http://127.0.0.1:{}", port);
    println!("Inspector running at {}", style(&url).cyan().bold());
    println!("Press Ctrl+C to stop");

    if opts.open {
        if let Err(e) = open::that(&url) {
            tracing::warn!("Failed to open browser: {}", e);
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    handle.abort();
    println!();
    println!("Inspector stopped");
    Ok(())
}
