//! Outbound payloads and inbound message decoding
//!
//! Inbound text is tried as JSON first; anything that does not parse is
//! handed to subscribers verbatim. A failed parse is not an error.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Keep-alive message written on every heartbeat tick
pub const HEARTBEAT_MESSAGE: &str = r#"{"type":"ping"}"#;

/// Opaque frame payload, forwarded to the transport unmodified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Text frame
    Text(String),
    /// Binary frame
    Binary(Bytes),
}

impl Payload {
    /// Serialize `value` as a JSON text payload
    pub fn json<T: Serialize + ?Sized>(value: &T) -> crate::Result<Self> {
        Ok(Payload::Text(serde_json::to_string(value)?))
    }

    /// Size in bytes
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(data) => data.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Binary(_) => None,
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(data))
    }
}

impl From<&[u8]> for Payload {
    fn from(data: &[u8]) -> Self {
        Payload::Binary(Bytes::copy_from_slice(data))
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Payload::Binary(data)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Text(value.to_string())
    }
}

/// Message delivered to message subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Text frame that parsed as JSON
    Structured(Value),
    /// Anything else, exactly as received
    Raw(Payload),
}

impl InboundMessage {
    /// Decode an inbound frame.
    ///
    /// Binary frames are never parsed.
    pub fn decode(payload: Payload) -> Self {
        match payload {
            Payload::Text(text) => match serde_json::from_str::<Value>(&text) {
                Ok(value) => InboundMessage::Structured(value),
                Err(_) => InboundMessage::Raw(Payload::Text(text)),
            },
            binary @ Payload::Binary(_) => InboundMessage::Raw(binary),
        }
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            InboundMessage::Structured(value) => Some(value),
            InboundMessage::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&Payload> {
        match self {
            InboundMessage::Structured(_) => None,
            InboundMessage::Raw(payload) => Some(payload),
        }
    }

    /// Deserialize a structured message into `T`.
    ///
    /// `None` for raw messages or when the shape does not match.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Option<T> {
        self.as_structured()
            .and_then(|value| T::deserialize(value).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_decode_json_object() {
        let msg = InboundMessage::decode(Payload::from(r#"{"type":"quote","px":101.5}"#));
        assert_eq!(
            msg,
            InboundMessage::Structured(json!({"type": "quote", "px": 101.5}))
        );
    }

    #[test]
    fn test_decode_json_scalar() {
        let msg = InboundMessage::decode(Payload::from("42"));
        assert_eq!(msg.as_structured(), Some(&json!(42)));
    }

    #[test]
    fn test_decode_malformed_text_is_verbatim() {
        let text = "{not json at all";
        let msg = InboundMessage::decode(Payload::from(text));
        assert_eq!(msg, InboundMessage::Raw(Payload::Text(text.to_string())));
    }

    #[test]
    fn test_decode_binary_is_raw() {
        let data = br#"{"type":"ping"}"#.to_vec();
        let msg = InboundMessage::decode(Payload::from(data.clone()));
        assert_eq!(msg, InboundMessage::Raw(Payload::Binary(Bytes::from(data))));
    }

    #[test]
    fn test_deserialize_typed() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Quote {
            px: f64,
        }

        let msg = InboundMessage::decode(Payload::from(r#"{"px":3.25}"#));
        assert_eq!(msg.deserialize::<Quote>(), Some(Quote { px: 3.25 }));

        let raw = InboundMessage::decode(Payload::from("px=3.25"));
        assert_eq!(raw.deserialize::<Quote>(), None);
    }

    #[test]
    fn test_heartbeat_message_shape() {
        let value: Value = serde_json::from_str(HEARTBEAT_MESSAGE).unwrap();
        assert_eq!(value, json!({"type": "ping"}));
    }

    #[test]
    fn test_payload_json() {
        let payload = Payload::json(&json!({"op": "subscribe"})).unwrap();
        assert_eq!(payload.as_text(), Some(r#"{"op":"subscribe"}"#));
        assert_eq!(payload.len(), 18);
    }
}
