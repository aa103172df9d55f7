//! Local inspector: HTTP API and live updates over the capture pipeline

mod client;
mod html;
mod port;
mod server;
mod state;

pub use client::InspectorClient;
pub use port::{find_inspector_port, InspectorMode};
pub use server::start_server;
pub use state::Inspector;
