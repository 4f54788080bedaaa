use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::EnvelopeType;
use crate::envelope::Envelope;
use crate::error::ProtocolError;

// ---------------------------------------------------------------------------
// Client -> server control messages
// ---------------------------------------------------------------------------

/// A textual control message, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Start(StartRequest),
    End,
    /// Any other `type` value. Ignored by the relay.
    #[serde(other)]
    Unknown,
}

/// Body of a `start` control message.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StartRequest {
    /// Client-chosen session id. Non-string scalars are taken by their
    /// JSON text, so `5` becomes `"5"`.
    #[serde(default, deserialize_with = "lenient_session_id")]
    pub session_id: Option<String>,
    /// Requested snapshot period. Accepts integers, integral floats and
    /// numeric strings; anything else reads as absent.
    #[serde(default, deserialize_with = "lenient_period")]
    pub snapshot_period_sec: Option<i64>,
}

fn lenient_session_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

fn lenient_period<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Server -> client payloads
// ---------------------------------------------------------------------------

/// Periodic status heartbeat emitted by the ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(rename = "type")]
    pub msg_type: EnvelopeType,
    pub session_id: String,
    pub uptime_sec: f64,
    pub frame_count: u64,
    pub last_frame_bytes: usize,
    pub fps_est: f64,
    pub gpu_visible: String,
    pub note: String,
}

/// Status acknowledgement for `start` / `end` (and rejected duplicate starts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusNotice {
    #[serde(rename = "type")]
    pub msg_type: EnvelopeType,
    pub session_id: Option<String>,
    pub note: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub rejected: bool,
}

/// Placeholder snapshot emitted on the session's snapshot cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPayload {
    #[serde(rename = "type")]
    pub msg_type: EnvelopeType,
    pub session_id: String,
    pub frame_count: u64,
    pub note: String,
}

/// Liveness signal emitted every [`crate::constants::DELTA_EVERY_FRAMES`] frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaPayload {
    #[serde(rename = "type")]
    pub msg_type: EnvelopeType,
    pub session_id: String,
    pub frame_count: u64,
    pub note: String,
}

fn is_false(v: &bool) -> bool {
    !v
}

impl StatusNotice {
    /// Creates an accepted acknowledgement.
    pub fn new(session_id: Option<String>, note: impl Into<String>) -> Self {
        Self {
            msg_type: EnvelopeType::Status,
            session_id,
            note: note.into(),
            rejected: false,
        }
    }

    /// Creates a rejection notice.
    pub fn rejected(session_id: Option<String>, note: impl Into<String>) -> Self {
        Self {
            rejected: true,
            ..Self::new(session_id, note)
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, ProtocolError> {
        Envelope::json(EnvelopeType::Status, self)
    }
}

impl StatusReport {
    pub fn to_envelope(&self) -> Result<Envelope, ProtocolError> {
        Envelope::json(EnvelopeType::Status, self)
    }
}

impl SnapshotPayload {
    pub fn new(session_id: impl Into<String>, frame_count: u64) -> Self {
        Self {
            msg_type: EnvelopeType::Snapshot,
            session_id: session_id.into(),
            frame_count,
            note: "placeholder snapshot".into(),
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, ProtocolError> {
        Envelope::json(EnvelopeType::Snapshot, self)
    }
}

impl DeltaPayload {
    pub fn new(session_id: impl Into<String>, frame_count: u64) -> Self {
        Self {
            msg_type: EnvelopeType::Delta,
            session_id: session_id.into(),
            frame_count,
            note: "placeholder delta every 30 frames".into(),
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, ProtocolError> {
        Envelope::json(EnvelopeType::Delta, self)
    }
}

/// Rounds to two decimal places, the precision reported on the wire.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
