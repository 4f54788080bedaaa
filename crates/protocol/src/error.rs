/// Errors produced while decoding or building envelopes.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("envelope too short (need at least 5 bytes, got {0})")]
    TooShort(usize),

    #[error("unknown envelope type: {0}")]
    UnknownType(u8),

    #[error("length mismatch: header declares {declared} bytes, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
