//! Ucanscope - Inspect UCAN agent messages in captured network traffic
//!
//! Usage:
//!   ucanscope serve [--har FILE]      Run the inspector
//!   ucanscope list <HAR>              List agent-message requests
//!   ucanscope show <HAR> <ID>         Show a decoded message
//!   ucanscope export <HAR> <ID>       Save a body as a .car file
//!   ucanscope push <HAR>              Send a capture to a running inspector

mod capture;
mod commands;
mod config;
mod export;
mod filter;
mod grouping;
mod inspector;
mod storage;

use anyhow::Result;
use clap::{Parser, Subcommand};
use export::BodyPart;
use filter::{FilterCriteria, StatusFilter};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ucanscope")]
#[command(author = "Ucanscope Team")]
#[command(version)]
#[command(about = "Inspect UCAN agent messages in captured network traffic", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the inspector web UI and API
    Serve {
        /// HAR file to attach to
        #[arg(long)]
        har: Option<PathBuf>,

        /// Preferred port (default from config, 4455)
        #[arg(short, long)]
        port: Option<u16>,

        /// Open the inspector in a browser
        #[arg(long)]
        open: bool,

        /// Keep tags, groups and settings in memory only
        #[arg(long)]
        ephemeral: bool,
    },

    /// List requests in a HAR file
    List {
        /// HAR file
        har: PathBuf,

        /// Case-insensitive URL substring
        #[arg(long)]
        url: Option<String>,

        /// Case-insensitive capability substring
        #[arg(long)]
        capability: Option<String>,

        /// Response status
        #[arg(long, value_enum, default_value_t = StatusFilter::All)]
        status: StatusFilter,

        /// Minimum time in milliseconds
        #[arg(long)]
        min_timing: Option<f64>,

        /// Maximum time in milliseconds
        #[arg(long)]
        max_timing: Option<f64>,

        /// Include requests that are not agent messages
        #[arg(short, long)]
        all: bool,
    },

    /// Show the decoded message of a request
    Show {
        /// HAR file
        har: PathBuf,

        /// Request ID (from `list`)
        id: u64,

        /// Decode the response body instead
        #[arg(short, long)]
        response: bool,

        /// Print JSON instead of a tree
        #[arg(long)]
        json: bool,
    },

    /// Save a request or response body as a .car file
    Export {
        /// HAR file
        har: PathBuf,

        /// Request ID (from `list`)
        id: u64,

        /// Export the response body instead
        #[arg(short, long)]
        response: bool,

        /// File name prefix (default: request or response)
        #[arg(long)]
        label: Option<String>,

        /// Output directory
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Send the requests of a HAR file to a running inspector
    Push {
        /// HAR file
        har: PathBuf,

        /// Inspector port (default from config, 4455)
        #[arg(short, long)]
        port: Option<u16>,

        /// Report a page navigation first
        #[arg(long)]
        navigate: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},ucanscope_cli=info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    match cli.command {
        Commands::Serve {
            har,
            port,
            open,
            ephemeral,
        } => {
            let opts = commands::serve::ServeOptions {
                har,
                port,
                open,
                ephemeral,
            };
            commands::serve::run(opts).await?;
        }

        Commands::List {
            har,
            url,
            capability,
            status,
            min_timing,
            max_timing,
            all,
        } => {
            let criteria = FilterCriteria {
                url_search: url.unwrap_or_default(),
                capability_search: capability.unwrap_or_default(),
                status,
                min_timing,
                max_timing,
            };
            commands::list::run(commands::list::ListOptions { har, criteria, all }).await?;
        }

        Commands::Show {
            har,
            id,
            response,
            json,
        } => {
            let opts = commands::show::ShowOptions {
                har,
                id,
                response,
                json,
            };
            commands::show::run(opts).await?;
        }

        Commands::Export {
            har,
            id,
            response,
            label,
            out,
        } => {
            let part = if response {
                BodyPart::Response
            } else {
                BodyPart::Request
            };
            let opts = commands::export::ExportOptions {
                har,
                id,
                part,
                label,
                out,
            };
            commands::export::run(opts).await?;
        }

        Commands::Push {
            har,
            port,
            navigate,
        } => {
            commands::push::run(commands::push::PushOptions {
                har,
                port,
                navigate,
            })
            .await?;
        }
    }

    Ok(())
}
