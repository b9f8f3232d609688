// src/store/documents.rs
use serde::{ser::SerializeMap, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::{
    envelope::InvocationContext,
    keys::{DedupKey, DeviceKey},
    models::{Beacon, DecodedFrame, EventFlags, EventKind, LocationSensorData},
};

/// Value filled in by the store when the document is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerValue {
    /// Store clock in milliseconds from Unix epoch
    Timestamp,
}

impl ServerValue {
    const KEY: &'static str = ".sv";
    const TIMESTAMP: &'static str = "timestamp";

    pub(crate) fn is_timestamp(map: &Map<String, Value>) -> bool {
        map.len() == 1 && map.get(Self::KEY).and_then(Value::as_str) == Some(Self::TIMESTAMP)
    }
}

impl Serialize for ServerValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            ServerValue::Timestamp => map.serialize_entry(Self::KEY, Self::TIMESTAMP)?,
        }
        map.end()
    }
}

/// Beacon with the time it was observed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StampedBeacon {
    #[serde(flatten)]
    pub beacon: Beacon,
    pub ts: String,
}

impl StampedBeacon {
    pub fn stamp_all(beacons: &[Beacon], ts: &str) -> Vec<Self> {
        beacons
            .iter()
            .map(|beacon| StampedBeacon {
                beacon: beacon.clone(),
                ts: ts.to_string(),
            })
            .collect()
    }
}

/// Latest beacons, merged into the device document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeaconSnapshot {
    pub beacons: Vec<StampedBeacon>,
    #[serde(rename = "beaconsUpdatedAt")]
    pub updated_at: String,
    #[serde(rename = "beaconsUpdatedAtServer")]
    pub updated_at_server: ServerValue,
}

impl BeaconSnapshot {
    pub fn new(beacons: Vec<StampedBeacon>, ts: &str) -> Self {
        Self {
            beacons,
            updated_at: ts.to_string(),
            updated_at_server: ServerValue::Timestamp,
        }
    }
}

/// One beacon log record, keyed by dedup key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeaconLogEntry {
    pub beacons: Vec<StampedBeacon>,
    pub battery_pct: u8,
    pub temperature_c: f64,
    pub light_pct: u16,
    pub motion_detect: bool,
    pub events: EventFlags,
    #[serde(rename = "savedAt")]
    pub saved_at: String,
    #[serde(rename = "savedAtServer")]
    pub saved_at_server: ServerValue,
}

impl BeaconLogEntry {
    pub fn new(sensor: &LocationSensorData, beacons: Vec<StampedBeacon>, ts: &str) -> Self {
        Self {
            beacons,
            battery_pct: sensor.battery_pct,
            temperature_c: sensor.temperature_c,
            light_pct: sensor.light_pct,
            motion_detect: sensor.motion_detect,
            events: sensor.events,
            saved_at: ts.to_string(),
            saved_at_server: ServerValue::Timestamp,
        }
    }
}

/// Current device status, merged into the status document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub motion: bool,
    pub shock: bool,
    pub last_event: Option<EventKind>,
    pub last_event_raw: u32,
    pub last_event_frame_id: &'static str,
    pub last_event_dedup: String,
    pub last_event_at: String,
    pub last_event_at_server: ServerValue,
}

impl DeviceStatus {
    pub fn new(
        sensor: &LocationSensorData,
        frame_tag: &'static str,
        dedup: &DedupKey,
        ts: &str,
    ) -> Self {
        Self {
            motion: sensor.motion_detect,
            shock: sensor.events.shock,
            last_event: sensor.events.representative(),
            last_event_raw: sensor.event_status,
            last_event_frame_id: frame_tag,
            last_event_dedup: dedup.to_string(),
            last_event_at: ts.to_string(),
            last_event_at_server: ServerValue::Timestamp,
        }
    }
}

/// Message metadata attached to archived documents
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveMeta {
    pub message_id: Option<String>,
    pub publish_time: Option<String>,
    pub saved_at: String,
    pub server_ts: ServerValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<&'static str>,
}

/// Transport envelope as received
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEnvelopeRecord {
    pub raw: Value,
    pub context: InvocationContext,
    pub received_at: String,
    pub server_ts: ServerValue,
}

/// Outer uplink JSON with its transport attributes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UplinkEventRecord {
    pub uplink: Map<String, Value>,
    pub attributes: Map<String, Value>,
    pub meta: ArchiveMeta,
}

/// Device payload bytes before decoding
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePayloadRecord {
    pub base64: String,
    pub hex: String,
    pub length: usize,
    pub event_time: Option<String>,
    pub saved_at: String,
    pub server_ts: ServerValue,
}

/// Decoded frame fields with message metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedFrameRecord {
    #[serde(flatten)]
    pub frame: DecodedFrame,
    pub meta: ArchiveMeta,
}

pub fn device_path(device: &DeviceKey) -> String {
    format!("devices/{device}")
}

pub fn status_path(device: &DeviceKey) -> String {
    format!("devices/{device}/status")
}

pub fn beacon_log_path(device: &DeviceKey, dedup: &DedupKey) -> String {
    format!("devices/{device}/beacon_logs/{dedup}")
}

pub fn uplink_event_path(device: &DeviceKey, dedup: &DedupKey) -> String {
    format!("devices/{device}/events/{dedup}")
}

pub fn device_payload_path(device: &DeviceKey, dedup: &DedupKey) -> String {
    format!("devices/{device}/t1000_raw/{dedup}")
}

pub fn decoded_frame_path(device: &DeviceKey, dedup: &DedupKey) -> String {
    format!("devices/{device}/t1000_decoded/{dedup}")
}

pub fn raw_envelope_path(dedup: &DedupKey) -> String {
    format!("raw/pubsub/{dedup}")
}
