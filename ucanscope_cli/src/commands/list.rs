//! `ucanscope list`: tabulate the agent-message requests in a HAR file

use super::{load_session, truncate};
use crate::capture::classify::{self, RequestStatus};
use crate::filter::{self, FilterCriteria};
use anyhow::Result;
use console::style;
use std::path::PathBuf;

pub struct ListOptions {
    pub har: PathBuf,
    pub criteria: FilterCriteria,
    pub all: bool,
}

pub async fn run(opts: ListOptions) -> Result<()> {
    let session = load_session(&opts.har)?;
    let requests: Vec<_> = filter::apply(session.requests(), &opts.criteria)
        .into_iter()
        .filter(|request| opts.all || classify::is_candidate(request))
        .collect();

    if requests.is_empty() {
        println!("No matching requests.");
        if !opts.all {
            println!();
            println!("Use --all to include requests that are not agent messages.");
        }
        return Ok(());
    }

    println!(
        "{:<6} {:<8} {:<44} {:<8} {:<10} {}",
        "ID", "METHOD", "URL", "STATUS", "TIME", "CAPABILITIES"
    );
    println!("{}", "-".repeat(100));

    for request in &requests {
        let status = match request.response_status {
            Some(code) => code.to_string(),
            None => "...".to_string(),
        };
        let status = match classify::status(request) {
            RequestStatus::Success => style(format!("{:<8}", status)).green(),
            RequestStatus::Error => style(format!("{:<8}", status)).red(),
            RequestStatus::Pending => style(format!("{:<8}", status)).yellow(),
        };
        let capabilities = request.request_message().summary();

        println!(
            "{:<6} {:<8} {:<44} {} {:<10} {}",
            request.id,
            request.method,
            truncate(&request.url, 42),
            status,
            classify::format_timing(classify::timing(request)),
            capabilities
        );
    }

    println!();
    if opts.criteria.is_empty() {
        println!("{} of {} requests", requests.len(), session.len());
    } else {
        println!("{} of {} requests (filtered)", requests.len(), session.len());
    }
    Ok(())
}
