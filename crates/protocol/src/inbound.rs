//! Classification of client-to-server messages.
//!
//! Text messages are JSON control messages. Binary messages are
//! `[1 byte: subtype][rest: frame payload]`; only [`FRAME_SUBTYPE_IMAGE`]
//! is accepted. Everything else classifies as [`Inbound::Ignored`] so the
//! connection keeps running.

use crate::constants::{FRAME_SUBTYPE_IMAGE, MIN_FRAME_MESSAGE_LEN};
use crate::messages::ControlMessage;

/// A classified inbound message.
#[derive(Debug, PartialEq)]
pub enum Inbound<'a> {
    Control(ControlMessage),
    Frame { subtype: u8, data: &'a [u8] },
    Ignored(IgnoreReason),
}

/// Why an inbound message was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    InvalidJson(String),
    TooShort(usize),
    UnknownSubtype(u8),
}

impl std::fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidJson(e) => write!(f, "invalid control JSON: {e}"),
            Self::TooShort(len) => write!(f, "binary message too short ({len} bytes)"),
            Self::UnknownSubtype(t) => write!(f, "unknown binary subtype 0x{t:02x}"),
        }
    }
}

/// Classifies a textual message.
pub fn classify_text(text: &str) -> Inbound<'static> {
    match serde_json::from_str::<ControlMessage>(text) {
        Ok(msg) => Inbound::Control(msg),
        Err(e) => Inbound::Ignored(IgnoreReason::InvalidJson(e.to_string())),
    }
}

/// Classifies a binary message.
pub fn classify_binary(data: &[u8]) -> Inbound<'_> {
    if data.len() < MIN_FRAME_MESSAGE_LEN {
        return Inbound::Ignored(IgnoreReason::TooShort(data.len()));
    }

    let subtype = data[0];
    if subtype != FRAME_SUBTYPE_IMAGE {
        return Inbound::Ignored(IgnoreReason::UnknownSubtype(subtype));
    }

    Inbound::Frame {
        subtype,
        data: &data[1..],
    }
}
