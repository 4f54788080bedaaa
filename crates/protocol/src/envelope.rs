//! Outbound envelope: `[1 byte: type][4 bytes: payload_len (big-endian)][payload]`.
//!
//! The codec does not look at the payload. Every payload the relay builds
//! is UTF-8 JSON, but any bytes round-trip.

use serde::Serialize;

use crate::constants::{ENVELOPE_HEADER_LEN, EnvelopeType};
use crate::error::ProtocolError;

/// A tagged, length-prefixed server-to-client record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeType,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Creates an envelope from raw payload bytes.
    pub fn new(kind: EnvelopeType, payload: Vec<u8>) -> Result<Self, ProtocolError> {
        if u32::try_from(payload.len()).is_err() {
            return Err(ProtocolError::PayloadTooLarge(payload.len()));
        }
        Ok(Self { kind, payload })
    }

    /// Creates an envelope whose payload is `value` serialized as JSON.
    pub fn json<T: Serialize>(kind: EnvelopeType, value: &T) -> Result<Self, ProtocolError> {
        Self::new(kind, serde_json::to_vec(value)?)
    }

    /// Encodes the envelope to its wire form.
    pub fn encode(&self) -> Vec<u8> {
        encode(self.kind, &self.payload)
    }

    /// Decodes a complete envelope.
    ///
    /// The input must hold exactly one envelope; trailing or missing bytes
    /// are reported as [`ProtocolError::LengthMismatch`].
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < ENVELOPE_HEADER_LEN {
            return Err(ProtocolError::TooShort(data.len()));
        }

        let kind = EnvelopeType::from_u8(data[0]).ok_or(ProtocolError::UnknownType(data[0]))?;
        let declared = u32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize;
        let actual = data.len() - ENVELOPE_HEADER_LEN;
        if declared != actual {
            return Err(ProtocolError::LengthMismatch { declared, actual });
        }

        Ok(Self {
            kind,
            payload: data[ENVELOPE_HEADER_LEN..].to_vec(),
        })
    }

    /// Parses the payload as JSON.
    pub fn parse_payload<T: for<'de> serde::Deserialize<'de>>(&self) -> Result<T, ProtocolError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Encodes `payload` under the given type tag.
///
/// The caller guarantees `payload.len()` fits in a `u32`; [`Envelope::new`]
/// is the checked path.
pub fn encode(kind: EnvelopeType, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;

    let mut buf = Vec::with_capacity(ENVELOPE_HEADER_LEN + payload.len());
    buf.push(kind.as_u8());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_layout() {
        let buf = encode(EnvelopeType::Status, b"{}");
        assert_eq!(buf, vec![3, 0, 0, 0, 2, b'{', b'}']);
    }

    #[test]
    fn encode_length_is_big_endian() {
        let payload = vec![0xAA; 0x0102];
        let buf = encode(EnvelopeType::Delta, &payload);
        assert_eq!(&buf[..5], &[1, 0, 0, 0x01, 0x02]);
        assert_eq!(buf.len(), 5 + 0x0102);
    }

    #[test]
    fn decode_roundtrip() {
        let env = Envelope::new(EnvelopeType::Snapshot, b"\x00\xffnot json".to_vec()).unwrap();
        let decoded = Envelope::decode(&env.encode()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn empty_payload() {
        let buf = encode(EnvelopeType::Delta, &[]);
        assert_eq!(buf, vec![1, 0, 0, 0, 0]);
        let decoded = Envelope::decode(&buf).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn decode_too_short() {
        let result = Envelope::decode(&[3, 0, 0]);
        assert!(matches!(result, Err(ProtocolError::TooShort(3))));
    }

    #[test]
    fn decode_unknown_type() {
        let result = Envelope::decode(&[9, 0, 0, 0, 0]);
        assert!(matches!(result, Err(ProtocolError::UnknownType(9))));
    }

    #[test]
    fn decode_length_mismatch() {
        // Header says 10 bytes but only 3 follow.
        let result = Envelope::decode(&[3, 0, 0, 0, 10, 1, 2, 3]);
        assert!(matches!(
            result,
            Err(ProtocolError::LengthMismatch {
                declared: 10,
                actual: 3
            })
        ));
    }

    #[test]
    fn json_payload() {
        let env = Envelope::json(EnvelopeType::Status, &serde_json::json!({"a": 1})).unwrap();
        let value: serde_json::Value = env.parse_payload().unwrap();
        assert_eq!(value["a"], 1);
    }
}
