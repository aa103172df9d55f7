//! Codec adapter: HTTP body bytes to agent messages
//!
//! Decoding never panics or escapes an error to the caller; anything that is
//! not a well-formed container with at least one root resolving to a message
//! becomes a [`DecodeFailure`].

use crate::car::CarFile;
use crate::constants::DECODE_FAILURE_TEXT;
use crate::message::AgentMessage;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Tagged "unable to decode" result
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("Unable to decode CAR File")]
pub struct DecodeFailure {
    reason: String,
}

impl DecodeFailure {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Why decoding failed, for logs
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Decode CAR bytes into the agent message at its first root
pub fn decode_message(bytes: &[u8]) -> Result<AgentMessage, DecodeFailure> {
    let result = CarFile::decode(bytes)
        .map_err(|e| DecodeFailure::new(e.to_string()))
        .and_then(|car| {
            let root = car
                .roots
                .first()
                .copied()
                .ok_or_else(|| DecodeFailure::new("container has no roots"))?;
            AgentMessage::view(root, &car.blocks).map_err(|e| DecodeFailure::new(e.to_string()))
        });

    if let Err(ref failure) = result {
        tracing::debug!("Failed to decode {} byte body: {}", bytes.len(), failure.reason());
    }

    result
}

/// Decoded view of an optional body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Decoded {
    /// No body was present
    NoBody,
    Message(Arc<AgentMessage>),
    Failure(DecodeFailure),
}

impl Decoded {
    pub fn from_body(body: Option<&[u8]>) -> Self {
        match body {
            None => Decoded::NoBody,
            Some(bytes) if bytes.is_empty() => Decoded::NoBody,
            Some(bytes) => match decode_message(bytes) {
                Ok(message) => Decoded::Message(Arc::new(message)),
                Err(failure) => Decoded::Failure(failure),
            },
        }
    }

    pub fn message(&self) -> Option<&AgentMessage> {
        match self {
            Decoded::Message(message) => Some(message.as_ref()),
            _ => None,
        }
    }

    /// Text shown in place of a message
    pub fn placeholder(&self) -> &'static str {
        match self {
            Decoded::Message(_) | Decoded::NoBody => "",
            Decoded::Failure(_) => DECODE_FAILURE_TEXT,
        }
    }

    /// Capability summary for list rows, or the placeholder
    pub fn summary(&self) -> String {
        match self {
            Decoded::Message(message) => message.capability_summary(),
            other => other.placeholder().to_string(),
        }
    }
}
