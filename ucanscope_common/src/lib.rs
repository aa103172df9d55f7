//! Ucanscope Common - CAR container and agent message decoding
//!
//! This crate contains the binary container reader, the typed model of
//! ucanto agent messages (invocations, receipts, delegations) and the codec
//! adapter the inspector uses to turn HTTP bodies into messages.

pub mod car;
pub mod codec;
pub mod message;

mod ipld_json;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use car::{BlockStore, CarError, CarFile};
pub use codec::{decode_message, DecodeFailure, Decoded};
pub use ipld_json::to_json;
pub use message::{
    AgentMessage, Capability, Delegation, Invocation, Link, MessageError, Outcome, Proof,
    ProofNode, Ran, Receipt,
};

/// Constants shared by the codec and its consumers
pub mod constants {
    /// MIME type of CAR encoded bodies
    pub const CAR_CONTENT_TYPE: &str = "application/vnd.ipld.car";

    /// Root block key of a ucanto agent message
    pub const MESSAGE_TAG: &str = "ucanto/message@7.0.0";

    /// Placeholder shown when a body cannot be decoded
    pub const DECODE_FAILURE_TEXT: &str = "Unable to decode CAR File";

    /// Multicodec code for DAG-CBOR blocks
    pub const DAG_CBOR_CODEC: u64 = 0x71;

    /// Multicodec code for SHA2-256 multihashes
    pub const SHA2_256_CODE: u64 = 0x12;

    /// Multicodec prefix for non-key DIDs in UCAN principals
    pub const DID_CORE_CODE: u64 = 0x0d1d;
}
