//! Capture & correlation pipeline for browser network traffic

pub mod classify;
pub mod har;
mod request;
mod session;
mod source;

pub use har::{HarEntry, HarLog};
pub use request::CapturedRequest;
pub use session::{CaptureSession, CaptureState, Selection};
pub use source::{CaptureSource, HarFileSource, MemorySource};

#[cfg(test)]
pub use request::Body;
#[cfg(test)]
pub use session::ResponseView;
