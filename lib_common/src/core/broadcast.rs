//! # Broadcast Interface
//!
//! Decoded trade envelopes and the sink they are published to. Only the
//! `sequential_id` is inspected; the rest of the upstream JSON object is
//! forwarded verbatim.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::core::error::DecodeError;

/// Exchange-assigned message identifier, kept as its canonical JSON text.
///
/// Using the JSON text keeps `10` and `"10"` distinct and compares large
/// numbers exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequentialId(String);

impl SequentialId {
    fn from_value(value: &Value) -> Self {
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for SequentialId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl fmt::Display for SequentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One upstream trade, ready to be republished.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeMessage {
    pub sequential_id: SequentialId,
    pub payload: Map<String, Value>,
}

impl TradeMessage {
    /// Decodes one upstream frame.
    ///
    /// Frames without a `sequential_id` are rejected. Error and status frames
    /// are surfaced as their own `DecodeError` variants so the caller can log
    /// them at the right level.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let value: Value =
            serde_json::from_slice(frame).map_err(|e| DecodeError::Json(e.to_string()))?;
        let Value::Object(payload) = value else {
            return Err(DecodeError::NotAnObject);
        };

        if let Some(id) = payload.get("sequential_id").filter(|v| !v.is_null()) {
            return Ok(Self {
                sequential_id: SequentialId::from_value(id),
                payload,
            });
        }

        if let Some(error) = payload.get("error") {
            let field = |key: &str| {
                error
                    .get(key)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            return Err(DecodeError::Upstream {
                name: field("name"),
                message: field("message"),
            });
        }

        if let Some(status) = payload.get("status") {
            let status = status.as_str().map(str::to_string).unwrap_or_else(|| status.to_string());
            return Err(DecodeError::Status(status));
        }

        Err(DecodeError::MissingSequentialId)
    }

    /// The value published downstream: the full upstream object.
    pub fn to_json(&self) -> String {
        Value::Object(self.payload.clone()).to_string()
    }

    /// Market code of the trade, when present.
    pub fn code(&self) -> Option<&str> {
        self.payload.get("code").and_then(Value::as_str)
    }
}

/// Downstream publish interface.
///
/// `publish` is called once per novel message from the receive loop. It must
/// not block; implementations queue or drop.
pub trait BroadcastSink: Send + Sync + 'static {
    fn publish(&self, message: TradeMessage);
}

impl<T: BroadcastSink + ?Sized> BroadcastSink for Arc<T> {
    fn publish(&self, message: TradeMessage) {
        (**self).publish(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_trade_and_keeps_all_fields() {
        let frame = br#"{"type":"trade","code":"KRW-BTC","trade_price":1.5,"sequential_id":1700000000000001}"#;
        let msg = TradeMessage::decode(frame).unwrap();
        assert_eq!(msg.sequential_id.as_str(), "1700000000000001");
        assert_eq!(msg.code(), Some("KRW-BTC"));
        assert_eq!(msg.payload.len(), 4);
    }

    #[test]
    fn numeric_and_string_ids_differ() {
        let a = TradeMessage::decode(br#"{"sequential_id":10}"#).unwrap();
        let b = TradeMessage::decode(br#"{"sequential_id":"10"}"#).unwrap();
        assert_ne!(a.sequential_id, b.sequential_id);
        assert_eq!(a.sequential_id, SequentialId::from(10));
    }

    #[test]
    fn classifies_control_frames() {
        let err = TradeMessage::decode(br#"{"error":{"name":"INVALID_PARAM","message":"bad"}}"#)
            .unwrap_err();
        assert_eq!(
            err,
            DecodeError::Upstream {
                name: "INVALID_PARAM".into(),
                message: "bad".into()
            }
        );
        assert!(err.is_control());

        let err = TradeMessage::decode(br#"{"status":"UP"}"#).unwrap_err();
        assert_eq!(err, DecodeError::Status("UP".into()));
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(matches!(TradeMessage::decode(b"not json"), Err(DecodeError::Json(_))));
        assert_eq!(TradeMessage::decode(b"[1,2]"), Err(DecodeError::NotAnObject));
        assert_eq!(
            TradeMessage::decode(br#"{"code":"KRW-BTC","sequential_id":null}"#),
            Err(DecodeError::MissingSequentialId)
        );
        assert!(!DecodeError::MissingSequentialId.is_control());
    }
}
