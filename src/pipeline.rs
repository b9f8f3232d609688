//! Ingestion pipeline
//!
//! One transport envelope at a time: unwrap it, decode the outer uplink JSON,
//! derive the device and dedup keys, decode the device frame and write the
//! derived beacon snapshot, beacon log entry and device status. Only a missing
//! store connection is reported to the caller; every other failure is logged
//! and the message is still acknowledged.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
    config::PipelineConfig,
    decoder::{self, now_iso},
    envelope::{
        decode_inner, decode_outer, encode_base64, first_present, InvocationContext,
        TransportMessage,
    },
    errors::{IngestError, StoreError},
    keys::{DedupKey, DeviceKey},
    models::{DecodedFrame, LocationSensorData, LOCATION_SENSOR_FRAME_TAG},
    store::{
        beacon_log_path, decoded_frame_path, device_path, device_payload_path, raw_envelope_path,
        status_path, uplink_event_path, ArchiveMeta, BeaconLogEntry, BeaconSnapshot,
        DecodedFrameRecord, DevicePayloadRecord, DeviceStatus, DocumentStore, RawEnvelopeRecord,
        ServerValue, StampedBeacon, StoreConnection, UplinkEventRecord,
    },
};

/// Status field counting shock events
pub const SHOCK_COUNT_FIELD: &str = "shock_count";

const ARCHIVE_SOURCE: &str = "pubsub/chirpstack";

/// Result reported for one envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Ok,
    /// The store could not be reached; nothing was decoded or written
    InitError,
}

impl fmt::Display for IngestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestOutcome::Ok => f.write_str("ok"),
            IngestOutcome::InitError => f.write_str("init_error"),
        }
    }
}

/// Per-message values shared by every write
struct MessageKeys {
    device: DeviceKey,
    dedup: DedupKey,
    message_id: Option<String>,
    publish_time: Option<String>,
}

impl MessageKeys {
    fn meta(&self, source: Option<&'static str>) -> ArchiveMeta {
        ArchiveMeta {
            message_id: self.message_id.clone(),
            publish_time: self.publish_time.clone(),
            saved_at: now_iso(),
            server_ts: ServerValue::Timestamp,
            source,
        }
    }
}

pub struct Pipeline {
    connection: StoreConnection,
    options: PipelineConfig,
}

impl Pipeline {
    pub fn new(connection: StoreConnection, options: PipelineConfig) -> Self {
        Self {
            connection,
            options,
        }
    }

    /// Process one transport envelope
    pub async fn ingest(&self, envelope: &Value, ctx: &InvocationContext) -> IngestOutcome {
        let store = match self.connection.get_or_connect().await {
            Ok(store) => store,
            Err(e) => {
                warn!("Document store unavailable: {}", e);
                return IngestOutcome::InitError;
            }
        };

        let message = TransportMessage::unwrap(envelope);
        let uplink = match message.data() {
            Some(data) => decode_outer(data).unwrap_or_else(|e| {
                warn!("Outer data decode failed: {}", e);
                Map::new()
            }),
            None => {
                info!("No data in transport message");
                Map::new()
            }
        };

        let attributes = message.attributes();
        let message_id = message.message_id(ctx);
        let publish_time = message.publish_time(ctx);
        let keys = MessageKeys {
            device: DeviceKey::derive(&uplink, attributes),
            dedup: DedupKey::derive(
                &uplink,
                attributes,
                message_id.as_deref(),
                publish_time.as_deref(),
            ),
            message_id,
            publish_time,
        };

        if self.options.archive_raw {
            self.archive_envelope(store.as_ref(), envelope, ctx, &uplink, attributes, &keys)
                .await;
        }

        let inner = uplink.get("data").filter(|data| is_truthy(data));
        if let Some(inner) = inner {
            if let Err(e) = self
                .process_device_payload(store.as_ref(), inner, &uplink, &keys)
                .await
            {
                warn!(device = %keys.device, dedup = %keys.dedup, "Device payload not stored: {}", e);
            }
        }

        let uplink_state = if uplink.is_empty() { "none" } else { "ok" };
        let inner_state = if inner.is_some() { "ok" } else { "none" };
        info!(
            dev_eui = keys.device.raw(),
            dedup = %keys.dedup,
            uplink = uplink_state,
            inner = inner_state,
            "Ingested message"
        );
        IngestOutcome::Ok
    }

    /// Decode the device payload and apply its state update
    async fn process_device_payload(
        &self,
        store: &dyn DocumentStore,
        inner: &Value,
        uplink: &Map<String, Value>,
        keys: &MessageKeys,
    ) -> Result<(), IngestError> {
        let bytes = decode_inner(inner)?;

        if self.options.archive_raw {
            let record = DevicePayloadRecord {
                base64: encode_base64(&bytes),
                hex: hex::encode(&bytes),
                length: bytes.len(),
                event_time: first_present([uplink.get("time")])
                    .or_else(|| keys.publish_time.clone()),
                saved_at: now_iso(),
                server_ts: ServerValue::Timestamp,
            };
            write_logged(store.set(
                &device_payload_path(&keys.device, &keys.dedup),
                serde_json::to_value(&record)?,
            ))
            .await;
        }

        let frame = match decoder::decode_bytes(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(device = %keys.device, hex = e.hex(), "Frame decode failed: {}", e);
                return Ok(());
            }
        };

        if self.options.archive_raw {
            let record = DecodedFrameRecord {
                frame: frame.clone(),
                meta: keys.meta(None),
            };
            write_logged(store.set(
                &decoded_frame_path(&keys.device, &keys.dedup),
                serde_json::to_value(&record)?,
            ))
            .await;
        }

        match frame.location_sensor() {
            Some(sensor) => self.apply_state_update(store, &frame, sensor, keys).await,
            None => {
                debug!(
                    device = %keys.device,
                    frame_id = frame.frame_id,
                    length = frame.length,
                    "Frame carries no beacon data"
                );
                Ok(())
            }
        }
    }

    /// Write the beacon snapshot, beacon log entry and device status
    async fn apply_state_update(
        &self,
        store: &dyn DocumentStore,
        frame: &DecodedFrame,
        sensor: &LocationSensorData,
        keys: &MessageKeys,
    ) -> Result<(), IngestError> {
        let ts = sensor.utc_iso.clone();
        let beacons = StampedBeacon::stamp_all(&sensor.beacons, &ts);

        let snapshot = BeaconSnapshot::new(beacons.clone(), &ts);
        store
            .update(&device_path(&keys.device), serde_json::to_value(&snapshot)?)
            .await?;

        let entry = BeaconLogEntry::new(sensor, beacons, &ts);
        store
            .set(
                &beacon_log_path(&keys.device, &keys.dedup),
                serde_json::to_value(&entry)?,
            )
            .await?;

        let status = DeviceStatus::new(sensor, LOCATION_SENSOR_FRAME_TAG, &keys.dedup, &ts);
        let path = status_path(&keys.device);
        store.update(&path, serde_json::to_value(&status)?).await?;

        if self.options.count_shocks && status.shock {
            let count = store.increment(&path, SHOCK_COUNT_FIELD, 1).await?;
            debug!(device = %keys.device, count, "Shock counted");
        }

        info!(
            device = %keys.device,
            dedup = %keys.dedup,
            frame_id = frame.frame_id,
            last_event = status.last_event.map(|e| e.as_str()),
            battery_pct = sensor.battery_pct,
            "Saved beacons from T1000 frame"
        );
        Ok(())
    }

    /// Keep the raw envelope and the outer uplink
    async fn archive_envelope(
        &self,
        store: &dyn DocumentStore,
        envelope: &Value,
        ctx: &InvocationContext,
        uplink: &Map<String, Value>,
        attributes: Option<&Map<String, Value>>,
        keys: &MessageKeys,
    ) {
        let raw = RawEnvelopeRecord {
            raw: envelope.clone(),
            context: ctx.clone(),
            received_at: now_iso(),
            server_ts: ServerValue::Timestamp,
        };
        if let Some(doc) = to_document(&raw) {
            match store.set_if_absent(&raw_envelope_path(&keys.dedup), doc).await {
                Ok(true) => debug!(dedup = %keys.dedup, "Raw envelope archived"),
                Ok(false) => debug!(dedup = %keys.dedup, "Raw envelope already archived"),
                Err(e) => warn!(dedup = %keys.dedup, "Raw envelope not archived: {}", e),
            }
        }

        if uplink.is_empty() {
            return;
        }
        let event = UplinkEventRecord {
            uplink: uplink.clone(),
            attributes: attributes.cloned().unwrap_or_default(),
            meta: keys.meta(Some(ARCHIVE_SOURCE)),
        };
        if let Some(doc) = to_document(&event) {
            write_logged(store.set(&uplink_event_path(&keys.device, &keys.dedup), doc)).await;
        }
    }
}

/// Non-empty strings, non-zero numbers, `true` and non-empty containers
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn to_document<T: Serialize>(record: &T) -> Option<Value> {
    serde_json::to_value(record)
        .map_err(|e| warn!("Document serialization failed: {}", e))
        .ok()
}

async fn write_logged<F>(write: F)
where
    F: std::future::Future<Output = Result<(), StoreError>>,
{
    if let Err(e) = write.await {
        warn!("Archive write failed: {}", e);
    }
}
