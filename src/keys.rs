//! Device and deduplication keys
//!
//! Both keys are used as store path segments, so the characters reserved in
//! store paths (`. # $ / [ ]`) are replaced with `_`.

use std::fmt::{self, Write};

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::envelope::first_present;

/// Device identifier used when no candidate field is present
pub const UNKNOWN_DEVICE: &str = "unknown";

/// Publish time text hashed when the message carries none; keeps content
/// hashes equal to dedup keys already in the store
const MISSING_PUBLISH_TIME: &str = "None";

/// Number of hex characters kept from the content hash
const CONTENT_HASH_LEN: usize = 16;

/// Replace characters reserved in store paths with `_`
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '.' | '#' | '$' | '/' | '[' | ']' => '_',
            c => c,
        })
        .collect()
}

/// Sanitized identifier of a physical device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    raw: String,
    key: String,
}

impl DeviceKey {
    /// Derive from the outer payload and transport attributes
    ///
    /// Candidates in order: `deviceInfo.devEui`, attribute `devEui`,
    /// attribute `dev_eui`, then `"unknown"`.
    pub fn derive(uplink: &Map<String, Value>, attributes: Option<&Map<String, Value>>) -> Self {
        let raw = first_present([
            uplink.get("deviceInfo").and_then(|info| info.get("devEui")),
            attributes.and_then(|a| a.get("devEui")),
            attributes.and_then(|a| a.get("dev_eui")),
        ])
        .unwrap_or_else(|| UNKNOWN_DEVICE.to_string());
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let key = sanitize(&raw);
        Self { raw, key }
    }

    /// Identifier as received
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Sanitized identifier of one ingested message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    /// Derive from, in order: the outer payload `deduplicationId`, the
    /// `deduplicationId` attribute, the transport message id, and finally a
    /// hash of the outer payload and publish time
    pub fn derive(
        uplink: &Map<String, Value>,
        attributes: Option<&Map<String, Value>>,
        message_id: Option<&str>,
        publish_time: Option<&str>,
    ) -> Self {
        let raw = first_present([
            uplink.get("deduplicationId"),
            attributes.and_then(|a| a.get("deduplicationId")),
        ])
        .or_else(|| message_id.filter(|id| !id.is_empty()).map(str::to_string))
        .unwrap_or_else(|| content_hash(uplink, publish_time));
        Self(sanitize(&raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First 16 hex characters of SHA-256 over the canonical payload and publish time
pub fn content_hash(uplink: &Map<String, Value>, publish_time: Option<&str>) -> String {
    let mut canonical = String::new();
    write_canonical_object(&mut canonical, uplink);
    canonical.push_str(publish_time.unwrap_or(MISSING_PUBLISH_TIME));

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(CONTENT_HASH_LEN);
    digest
}

/// Serialize JSON with sorted keys, `", "`/`": "` separators and ASCII-only
/// output
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(&mut out, value);
    out
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_canonical_str(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => write_canonical_object(out, map),
    }
}

fn write_canonical_object(out: &mut String, map: &Map<String, Value>) {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    out.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_canonical_str(out, key);
        out.push_str(": ");
        write_canonical(out, value);
    }
    out.push('}');
}

fn write_canonical_str(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            ' '..='\u{7f}' => out.push(c),
            c => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    // Writing to a String cannot fail
                    let _ = write!(out, "\\u{unit:04x}");
                }
            }
        }
    }
    out.push('"');
}
