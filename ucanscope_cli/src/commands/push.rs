//! `ucanscope push`: replay a HAR capture into a running inspector

use crate::capture::HarLog;
use crate::config::Config;
use crate::inspector::InspectorClient;
use anyhow::Result;
use std::path::PathBuf;

pub struct PushOptions {
    pub har: PathBuf,
    pub port: Option<u16>,
    pub navigate: bool,
}

pub async fn run(opts: PushOptions) -> Result<()> {
    let log = HarLog::load(&opts.har)?;
    let port = match opts.port {
        Some(port) => port,
        None => Config::load()?.inspector_port,
    };
    let client = InspectorClient::connect(port).await?;

    if opts.navigate {
        let cleared = client.navigated().await?;
        tracing::info!(
            "Reported navigation ({})",
            if cleared { "cleared" } else { "kept, persist on reload is on" }
        );
    }

    let mut candidates = 0;
    for entry in &log.entries {
        let summary = client.submit_entry(entry).await?;
        if !summary.capabilities.is_empty() {
            candidates += 1;
        }
    }

    println!(
        "Pushed {} requests ({} agent messages) to {}",
        log.entries.len(),
        candidates,
        client.inspector_url()
    );
    Ok(())
}
