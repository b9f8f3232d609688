//! Data models.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Frame id of the Bluetooth location & sensor frame
pub const LOCATION_SENSOR_FRAME_ID: u8 = 0x08;

/// Tag written to device status records for the location & sensor frame
pub const LOCATION_SENSOR_FRAME_TAG: &str = "0x08";

/// Minimum frame length for a full location & sensor decode
pub const LOCATION_SENSOR_FRAME_LEN: usize = 35;

/// Event flags carried in the low byte of the event status field
///
/// - Bit 0 = start moving
/// - Bit 1 = end movement
/// - Bit 2 = motionless
/// - Bit 3 = shock
/// - Bit 4 = temperature event
/// - Bit 5 = light event
/// - Bit 6 = SOS
/// - Bit 7 = press once
///
/// Bits 8-23 of the event status are not interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventFlags {
    pub start_moving: bool,
    pub end_movement: bool,
    pub motionless: bool,
    pub shock: bool,
    pub temp_event: bool,
    pub light_event: bool,
    pub sos: bool,
    pub press_once: bool,
}

impl EventFlags {
    /// Decode flags from the event status value, looking only at bits 0-7
    pub fn from_bits(event_status: u32) -> Self {
        let eb = event_status & 0xFF;
        EventFlags {
            start_moving: eb & 0x01 != 0,
            end_movement: eb & 0x02 != 0,
            motionless: eb & 0x04 != 0,
            shock: eb & 0x08 != 0,
            temp_event: eb & 0x10 != 0,
            light_event: eb & 0x20 != 0,
            sos: eb & 0x40 != 0,
            press_once: eb & 0x80 != 0,
        }
    }

    /// Motion is reported when the device started moving or took a shock
    pub fn motion_detected(&self) -> bool {
        self.start_moving || self.shock
    }

    /// Pick the single event reported as `lastEvent`
    ///
    /// Priority: shock, start moving, end movement, motionless, press once,
    /// SOS, temperature event, light event.
    pub fn representative(&self) -> Option<EventKind> {
        [
            (self.shock, EventKind::Shock),
            (self.start_moving, EventKind::StartMoving),
            (self.end_movement, EventKind::EndMovement),
            (self.motionless, EventKind::Motionless),
            (self.press_once, EventKind::PressOnce),
            (self.sos, EventKind::Sos),
            (self.temp_event, EventKind::TempEvent),
            (self.light_event, EventKind::LightEvent),
        ]
        .into_iter()
        .find_map(|(set, kind)| set.then_some(kind))
    }
}

/// Named device event, serialized with the flag name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StartMoving,
    EndMovement,
    Motionless,
    Shock,
    TempEvent,
    LightEvent,
    Sos,
    PressOnce,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StartMoving => "start_moving",
            EventKind::EndMovement => "end_movement",
            EventKind::Motionless => "motionless",
            EventKind::Shock => "shock",
            EventKind::TempEvent => "temp_event",
            EventKind::LightEvent => "light_event",
            EventKind::Sos => "sos",
            EventKind::PressOnce => "press_once",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bluetooth beacon seen by the tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    /// Lowercase colon separated MAC address
    pub mac: String,
    /// Signal strength in dBm
    pub rssi: i8,
}

/// Fields of a fully decoded location & sensor frame (id 0x08)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSensorData {
    /// 24-bit event status, flags in the low byte
    pub event_status: u32,
    pub motion_segment: u8,
    /// Device clock in seconds from Unix epoch
    pub utc: u32,
    /// `utc` rendered at a fixed UTC+9 offset
    pub utc_iso: String,
    pub beacons: [Beacon; 3],
    /// Temperature in degrees Celsius, 0.1 resolution
    pub temperature_c: f64,
    /// Raw light level
    pub light_pct: u16,
    pub battery_pct: u8,
    pub events: EventFlags,
    pub motion_detect: bool,
}

/// Result of decoding one T1000 frame
///
/// The sensor fields are only present for a location & sensor frame that is
/// at least 35 bytes long. Other frame ids and short frames keep only the
/// generic fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedFrame {
    pub frame_id: u8,
    pub length: usize,
    /// Lowercase hex of the frame
    pub hex: String,
    #[serde(flatten)]
    pub sensor: Option<LocationSensorData>,
}

impl DecodedFrame {
    /// Sensor fields when this is a decoded location & sensor frame
    pub fn location_sensor(&self) -> Option<&LocationSensorData> {
        match self.sensor {
            Some(ref sensor) if self.frame_id == LOCATION_SENSOR_FRAME_ID => Some(sensor),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_follow_bitmask() {
        for byte in 0u32..=255 {
            let flags = EventFlags::from_bits(byte);
            let bits = [
                flags.start_moving,
                flags.end_movement,
                flags.motionless,
                flags.shock,
                flags.temp_event,
                flags.light_event,
                flags.sos,
                flags.press_once,
            ];
            for (bit, value) in bits.iter().enumerate() {
                assert_eq!(*value, byte & (1 << bit) != 0, "byte {byte:#04x} bit {bit}");
            }
        }
    }

    #[test]
    fn flags_ignore_high_bits() {
        assert_eq!(EventFlags::from_bits(0xFFFF00), EventFlags::default());
        assert_eq!(EventFlags::from_bits(0x010008), EventFlags::from_bits(0x08));
    }

    #[test]
    fn motion_detected_only_for_start_or_shock() {
        for byte in 0u32..=255 {
            let flags = EventFlags::from_bits(byte);
            assert_eq!(flags.motion_detected(), byte & 0x09 != 0, "byte {byte:#04x}");
        }
        assert!(!EventFlags::default().motion_detected());
    }

    #[test]
    fn representative_event_priority() {
        assert_eq!(EventFlags::from_bits(0x00).representative(), None);
        assert_eq!(
            EventFlags::from_bits(0x09).representative(),
            Some(EventKind::Shock)
        );
        assert_eq!(
            EventFlags::from_bits(0x07).representative(),
            Some(EventKind::StartMoving)
        );
        assert_eq!(
            EventFlags::from_bits(0x06).representative(),
            Some(EventKind::EndMovement)
        );
        assert_eq!(
            EventFlags::from_bits(0xC4).representative(),
            Some(EventKind::Motionless)
        );
        assert_eq!(
            EventFlags::from_bits(0xF0).representative(),
            Some(EventKind::PressOnce)
        );
        assert_eq!(
            EventFlags::from_bits(0x70).representative(),
            Some(EventKind::Sos)
        );
        assert_eq!(
            EventFlags::from_bits(0x30).representative(),
            Some(EventKind::TempEvent)
        );
        assert_eq!(
            EventFlags::from_bits(0x20).representative(),
            Some(EventKind::LightEvent)
        );
    }

    #[test]
    fn event_kind_serializes_as_flag_name() {
        assert_eq!(
            serde_json::to_value(EventKind::PressOnce).unwrap(),
            serde_json::json!("press_once")
        );
        assert_eq!(EventKind::TempEvent.to_string(), "temp_event");
    }

    #[test]
    fn generic_frame_serializes_without_sensor_fields() {
        let frame = DecodedFrame {
            frame_id: 0x01,
            length: 2,
            hex: "0102".to_string(),
            sensor: None,
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            serde_json::json!({"frame_id": 1, "length": 2, "hex": "0102"})
        );
        assert!(frame.location_sensor().is_none());
    }
}
