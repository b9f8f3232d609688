//! Transport envelope unwrapping and payload decoding
//!
//! A transport message looks like
//! `{"message": {"data": <base64>, "attributes": {...}, "messageId", "publishTime"}}`
//! or the same fields without the `message` wrapper. Its `data` decodes to the
//! network server's uplink JSON (the outer payload), whose own `data` field is
//! the device's raw uplink in base64.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::PayloadError;

/// Standard alphabet, padding optional
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Metadata supplied by the invocation runtime alongside a message
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InvocationContext {
    pub event_id: Option<String>,
    pub timestamp: Option<String>,
    pub event_type: Option<String>,
    pub resource: Option<String>,
}

/// Borrowed view of one transport message
#[derive(Debug, Clone, Copy)]
pub struct TransportMessage<'a> {
    fields: Option<&'a Map<String, Value>>,
}

impl<'a> TransportMessage<'a> {
    /// Accept a bare message object or one nested under `message`
    ///
    /// Any other shape yields a message without fields.
    pub fn unwrap(envelope: &'a Value) -> Self {
        let fields = match envelope {
            Value::Object(map) => match map.get("message") {
                Some(Value::Object(inner)) => Some(inner),
                _ => Some(map),
            },
            _ => None,
        };
        Self { fields }
    }

    fn field(&self, name: &str) -> Option<&'a Value> {
        self.fields.and_then(|f| f.get(name))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.map_or(true, Map::is_empty)
    }

    /// Transport attributes, `None` when absent or not an object
    pub fn attributes(&self) -> Option<&'a Map<String, Value>> {
        self.field("attributes").and_then(Value::as_object)
    }

    pub fn attribute(&self, name: &str) -> Option<&'a Value> {
        self.attributes().and_then(|a| a.get(name))
    }

    /// Base64 outer payload, `None` when absent or empty
    pub fn data(&self) -> Option<&'a str> {
        self.field("data")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn message_id(&self, ctx: &InvocationContext) -> Option<String> {
        first_present([
            self.field("messageId"),
            self.field("message_id"),
        ])
        .or_else(|| ctx.event_id.clone().filter(|s| !s.is_empty()))
    }

    pub fn publish_time(&self, ctx: &InvocationContext) -> Option<String> {
        first_present([
            self.field("publishTime"),
            self.field("publish_time"),
        ])
        .or_else(|| ctx.timestamp.clone().filter(|s| !s.is_empty()))
    }
}

/// Return the first candidate holding a usable value, rendered as a string
///
/// Non-empty strings and numbers count as present. Null, booleans, empty
/// strings, objects and arrays are skipped.
pub fn first_present<'a, I>(candidates: I) -> Option<String>
where
    I: IntoIterator<Item = Option<&'a Value>>,
{
    candidates
        .into_iter()
        .flatten()
        .find_map(|value| match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Decode the transport `data` field into the outer uplink object
pub fn decode_outer(data_b64: &str) -> Result<Map<String, Value>, PayloadError> {
    let bytes = BASE64.decode(data_b64.trim())?;
    let text = String::from_utf8(bytes)?;
    match serde_json::from_str(&text)? {
        Value::Object(map) => Ok(map),
        _ => Err(PayloadError::NotAnObject),
    }
}

/// Decode the device's raw uplink from the outer payload `data` field
pub fn decode_inner(data: &Value) -> Result<Vec<u8>, PayloadError> {
    let b64 = data.as_str().ok_or(PayloadError::NotAString)?;
    Ok(BASE64.decode(b64.trim())?)
}

/// Encode bytes with the standard padded alphabet
pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwrap_nested_message() {
        let envelope = json!({"message": {"messageId": "m-1", "attributes": {"devEui": "x"}}});
        let message = TransportMessage::unwrap(&envelope);
        assert_eq!(
            message.message_id(&InvocationContext::default()).as_deref(),
            Some("m-1")
        );
        assert_eq!(message.attribute("devEui"), Some(&json!("x")));
    }

    #[test]
    fn unwrap_bare_message() {
        let envelope = json!({"message_id": "m-2", "publish_time": "2024-01-01T00:00:00Z"});
        let message = TransportMessage::unwrap(&envelope);
        let ctx = InvocationContext::default();
        assert_eq!(message.message_id(&ctx).as_deref(), Some("m-2"));
        assert_eq!(
            message.publish_time(&ctx).as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn non_object_message_field_is_treated_as_bare() {
        let envelope = json!({"message": "hello", "messageId": "m-3"});
        let message = TransportMessage::unwrap(&envelope);
        assert_eq!(
            message.message_id(&InvocationContext::default()).as_deref(),
            Some("m-3")
        );
    }

    #[test]
    fn unrecognized_envelope_is_empty() {
        for envelope in [json!(null), json!([1, 2]), json!("text"), json!(3)] {
            let message = TransportMessage::unwrap(&envelope);
            assert!(message.is_empty());
            assert!(message.data().is_none());
            assert!(message.attributes().is_none());
        }
    }

    #[test]
    fn context_is_the_last_fallback() {
        let ctx = InvocationContext {
            event_id: Some("evt-9".to_string()),
            timestamp: Some("2024-05-01T00:00:00Z".to_string()),
            ..Default::default()
        };
        let envelope = json!({"messageId": ""});
        let message = TransportMessage::unwrap(&envelope);
        assert_eq!(message.message_id(&ctx).as_deref(), Some("evt-9"));
        assert_eq!(
            message.publish_time(&ctx).as_deref(),
            Some("2024-05-01T00:00:00Z")
        );
    }

    #[test]
    fn first_present_skips_absent_values() {
        let empty = json!("");
        let null = json!(null);
        let flag = json!(true);
        let number = json!(42);
        let text = json!("id");
        assert_eq!(
            first_present([None, Some(&empty), Some(&null), Some(&flag), Some(&number)]),
            Some("42".to_string())
        );
        assert_eq!(
            first_present([Some(&text), Some(&number)]),
            Some("id".to_string())
        );
        assert_eq!(first_present([None, Some(&empty)]), None);
    }

    #[test]
    fn decode_outer_object() {
        let b64 = encode_base64(br#"{"deviceInfo":{"devEui":"AA"},"data":"CA=="}"#);
        let uplink = decode_outer(&b64).unwrap();
        assert_eq!(uplink["deviceInfo"]["devEui"], json!("AA"));
    }

    #[test]
    fn decode_outer_without_padding() {
        let uplink = decode_outer("eyJhIjoxfQ").unwrap();
        assert_eq!(uplink["a"], json!(1));
    }

    #[test]
    fn decode_outer_failures() {
        assert!(matches!(
            decode_outer("not base64!"),
            Err(PayloadError::InvalidBase64(_))
        ));
        assert!(matches!(
            decode_outer(&encode_base64(&[0xFF, 0xFE])),
            Err(PayloadError::InvalidUtf8(_))
        ));
        assert!(matches!(
            decode_outer(&encode_base64(b"{not json")),
            Err(PayloadError::InvalidJson(_))
        ));
        assert!(matches!(
            decode_outer(&encode_base64(b"[1,2]")),
            Err(PayloadError::NotAnObject)
        ));
    }

    #[test]
    fn decode_inner_bytes() {
        assert_eq!(decode_inner(&json!("CAEC")).unwrap(), vec![0x08, 0x01, 0x02]);
        assert!(matches!(
            decode_inner(&json!(12)),
            Err(PayloadError::NotAString)
        ));
        assert!(matches!(
            decode_inner(&json!("%%%")),
            Err(PayloadError::InvalidBase64(_))
        ));
    }
}
