//! Wire protocol for a framerelay ingest session.
//!
//! Server to client traffic is a sequence of binary envelopes
//! (`[type:1][len:4 BE][payload]`); client to server traffic is either
//! JSON control text or a binary frame tagged with a 1-byte subtype.

pub mod constants;
pub mod envelope;
pub mod error;
pub mod inbound;
pub mod messages;

// Re-export primary types for convenience.
pub use constants::EnvelopeType;
pub use envelope::Envelope;
pub use error::ProtocolError;
pub use inbound::{IgnoreReason, Inbound, classify_binary, classify_text};
pub use messages::{ControlMessage, DeltaPayload, SnapshotPayload, StatusNotice, StatusReport};
