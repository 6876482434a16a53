//! Codec for the `{op, d}` envelope
//!
//! The codec only knows about the transport format: a JSON object with an
//! integer `op` and an optional `d`. It does not validate payloads per
//! opcode. That is the connection state machine's job, so a frame with an
//! unknown opcode still decodes here and is rejected one layer up.
//!
//! # Error Handling
//!
//! - Outbound payloads that cannot be serialized → `Error::Serialization`
//! - Inbound frames that are not JSON objects with an integer `op`
//!   → `Error::MalformedMessage`
//!
//! # Examples
//!
//! ```rust
//! use clusterlink_core::{codec, OpCode};
//!
//! let frame = codec::encode(OpCode::Log, &"cluster 3 booted").unwrap();
//! assert_eq!(frame, r#"{"op":5,"d":"cluster 3 booted"}"#);
//!
//! let envelope = codec::decode(r#"{"op":1}"#).unwrap();
//! assert_eq!(envelope.opcode().unwrap(), OpCode::ReadyAck);
//! ```

use crate::error::{Error, Result};
use crate::types::{Envelope, OpCode};
use serde::Serialize;

/// Wrap a payload in an envelope and encode it as a JSON string
pub fn encode<T: Serialize + ?Sized>(op: OpCode, payload: &T) -> Result<String> {
    let d = serde_json::to_value(payload).map_err(|e| Error::Serialization(e.to_string()))?;
    encode_envelope(&Envelope::new(op, d))
}

/// Encode a prebuilt envelope
pub fn encode_envelope(envelope: &Envelope) -> Result<String> {
    serde_json::to_string(envelope).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a text frame into an envelope
pub fn decode(data: &str) -> Result<Envelope> {
    serde_json::from_str(data).map_err(|e| Error::MalformedMessage(e.to_string()))
}

/// Decode a binary frame into an envelope
///
/// Aggregators are free to send the same JSON document in a binary frame.
pub fn decode_bytes(data: &[u8]) -> Result<Envelope> {
    serde_json::from_slice(data).map_err(|e| Error::MalformedMessage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClientIdentity, RemoteEvalPayload};
    use serde_json::{json, Value};

    #[test]
    fn test_encode_identify() {
        let identity = ClientIdentity::new("tok", 2, 4);
        let frame = encode(OpCode::Identify, &identity).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(value["op"], 2);
        assert_eq!(value["d"]["clusterID"], 2);
        assert_eq!(value["d"]["clusterCount"], 4);
        assert_eq!(value["d"]["token"], "tok");
    }

    #[test]
    fn test_encode_remote_eval_request() {
        let payload = RemoteEvalPayload {
            id: 7,
            uid: 1234,
            data: json!("1+1"),
        };
        let frame = encode(OpCode::RemoteEval, &payload).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(value, json!({"op": 9, "d": {"id": 7, "data": "1+1", "uid": 1234}}));
    }

    #[test]
    fn test_decode_without_payload() {
        let envelope = decode(r#"{"op":4}"#).unwrap();
        assert_eq!(envelope.op, 4);
        assert_eq!(envelope.d, Value::Null);
    }

    #[test]
    fn test_decode_unknown_opcode_still_decodes() {
        let envelope = decode(r#"{"op":99,"d":{}}"#).unwrap();
        assert_eq!(envelope.op, 99);
        assert!(envelope.opcode().is_err());
    }

    #[test]
    fn test_decode_invalid_json() {
        assert!(matches!(decode("{not json"), Err(Error::MalformedMessage(_))));
        assert!(matches!(decode(""), Err(Error::MalformedMessage(_))));
    }

    #[test]
    fn test_decode_rejects_non_envelopes() {
        assert!(matches!(decode("[1,2,3]"), Err(Error::MalformedMessage(_))));
        assert!(matches!(decode(r#"{"d":{}}"#), Err(Error::MalformedMessage(_))));
        assert!(matches!(decode(r#"{"op":"hello"}"#), Err(Error::MalformedMessage(_))));
        assert!(matches!(decode(r#"{"op":-1}"#), Err(Error::MalformedMessage(_))));
        assert!(matches!(decode(r#"{"op":1.5}"#), Err(Error::MalformedMessage(_))));
    }

    #[test]
    fn test_decode_bytes() {
        let envelope = decode_bytes(br#"{"op":8,"d":true}"#).unwrap();
        assert_eq!(envelope.opcode().unwrap(), OpCode::ClusterStatusUpdate);
        assert_eq!(envelope.d, json!(true));

        assert!(matches!(
            decode_bytes(&[0xff, 0xfe]),
            Err(Error::MalformedMessage(_))
        ));
    }
}
