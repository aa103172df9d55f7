//! `ucanscope export`: save a request or response body as a `.car` file

use super::{find_request, load_session};
use crate::config::Config;
use crate::export::{self, BodyPart};
use anyhow::Result;
use console::style;
use std::path::PathBuf;
use ucanscope_common::decode_message;

pub struct ExportOptions {
    pub har: PathBuf,
    pub id: u64,
    pub part: BodyPart,
    pub label: Option<String>,
    pub out: Option<PathBuf>,
}

pub async fn run(opts: ExportOptions) -> Result<()> {
    let session = load_session(&opts.har)?;
    let request = find_request(&session, opts.id)?;

    let body = match opts.part {
        BodyPart::Request => request.request_body.as_ref(),
        BodyPart::Response => request.response_body.as_ref(),
    };
    let Some(body) = body else {
        anyhow::bail!("Request {} has no {} body", opts.id, opts.part);
    };
    let bytes = body.bytes();

    if let Err(failure) = decode_message(&bytes) {
        println!(
            "{} body is not an agent message ({}); exporting raw bytes",
            style("warning:").yellow(),
            failure.reason()
        );
    }

    let dir = match opts.out {
        Some(dir) => dir,
        None => Config::load()?.export_dir(),
    };
    let label = opts.label.unwrap_or_else(|| opts.part.to_string());
    let path = export::write_car(&dir, &label, &request.url, &bytes)?;

    println!("Saved {}", path.display());
    Ok(())
}
