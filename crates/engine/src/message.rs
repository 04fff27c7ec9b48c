//! Wire payloads relayed between participants.
//!
//! The transport is an opaque byte relay; everything the protocol needs
//! travels in one `Payload` of signed states and objective proposals,
//! encoded as JSON. Decoding never trusts the sender: states carry their
//! own signatures and are re-verified on merge.

use serde::{Deserialize, Serialize};
use statewallet_types::{Objective, SignedState};

/// One transport-level message between participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sending participant id.
    pub sender: String,
    /// Receiving participant id.
    pub recipient: String,
    /// Encoded `Payload`.
    pub data: Vec<u8>,
}

/// What one wallet tells another: states to merge and objectives to
/// ensure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Signed states for the recipient to merge.
    pub signed_states: Vec<SignedState>,
    /// Objective proposals. Recipients store them as pending.
    pub objectives: Vec<Objective>,
}

/// Encode a payload for the transport.
pub fn encode_payload(payload: &Payload) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(payload).map_err(CodecError::Encode)
}

/// Decode a received payload.
pub fn decode_payload(data: &[u8]) -> Result<Payload, CodecError> {
    serde_json::from_slice(data).map_err(CodecError::Decode)
}

/// Payload encode/decode failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("Failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),
    /// The received bytes are not a valid payload.
    #[error("Failed to decode payload: {0}")]
    Decode(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_roundtrip() {
        let payload = Payload::default();
        let bytes = encode_payload(&payload).unwrap();
        assert_eq!(decode_payload(&bytes).unwrap(), payload);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_payload(b"not json"),
            Err(CodecError::Decode(_))
        ));
    }
}
