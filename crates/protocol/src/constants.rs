use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Envelope header size: 1 type byte + 4 length bytes.
pub const ENVELOPE_HEADER_LEN: usize = 5;

/// Binary subtype for an image (JPEG) frame.
pub const FRAME_SUBTYPE_IMAGE: u8 = 0x01;

/// Smallest binary message that can carry a frame (subtype + 1 byte).
pub const MIN_FRAME_MESSAGE_LEN: usize = 2;

/// A delta envelope is emitted every time the frame counter hits a
/// multiple of this value.
pub const DELTA_EVERY_FRAMES: u64 = 30;

/// Fixed cadence of periodic status envelopes.
pub const STATUS_PERIOD: Duration = Duration::from_secs(1);

/// Process-wide default snapshot period in seconds.
pub const DEFAULT_SNAPSHOT_PERIOD_SEC: u32 = 3;

/// Session id used when `start` does not carry one.
pub const DEFAULT_SESSION_ID: &str = "unknown";

/// Maximum inbound WebSocket message size (64 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Capability string reported when no GPU visibility is configured.
pub const CAPABILITY_NOT_SET: &str = "(not set)";

/// Outbound envelope type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum EnvelopeType {
    Delta = 1,
    Snapshot = 2,
    Status = 3,
}

impl EnvelopeType {
    /// Returns the wire tag byte.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses a wire tag byte.
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Delta),
            2 => Some(Self::Snapshot),
            3 => Some(Self::Status),
            _ => None,
        }
    }
}
