//! T1000 binary frame decoder
//!
//! Layout of the location & sensor frame (id 0x08), all fields big-endian:
//!
//! | Offset | Bytes | Field                        |
//! |--------|-------|------------------------------|
//! | 0      | 1     | frame id                     |
//! | 1-3    | 3     | event status                 |
//! | 4      | 1     | motion segment               |
//! | 5-8    | 4     | UTC epoch seconds            |
//! | 9-29   | 3 x 7 | beacons, 6 byte MAC + i8 RSSI |
//! | 30-31  | 2     | temperature x 10 (signed)    |
//! | 32-33  | 2     | light level                  |
//! | 34     | 1     | battery percent              |

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use tracing::debug;

use crate::{
    errors::FrameError,
    models::{
        Beacon, DecodedFrame, EventFlags, LocationSensorData, LOCATION_SENSOR_FRAME_ID,
        LOCATION_SENSOR_FRAME_LEN,
    },
};

const DISPLAY_OFFSET_SECS: i32 = 9 * 3600;
const BEACON_OFFSETS: [usize; 3] = [9, 16, 23];

/// Decode a frame given as hex text
pub fn decode_hex(hex_str: &str) -> Result<DecodedFrame, FrameError> {
    let bytes = hex::decode(hex_str.trim()).map_err(|source| FrameError::InvalidHex {
        hex: hex_str.to_string(),
        source,
    })?;
    if bytes.is_empty() {
        return Err(FrameError::Empty {
            hex: hex_str.to_string(),
        });
    }
    decode_bytes(&bytes)
}

/// Decode a raw frame
///
/// Frames other than a full-length location & sensor frame decode to the
/// generic fields only.
pub fn decode_bytes(bytes: &[u8]) -> Result<DecodedFrame, FrameError> {
    let hex = hex::encode(bytes);
    let Some(&frame_id) = bytes.first() else {
        return Err(FrameError::Empty { hex });
    };

    debug!(frame_id, length = bytes.len(), %hex, "Decoding T1000 frame");

    let sensor = match frame_id {
        LOCATION_SENSOR_FRAME_ID => decode_location_sensor(bytes),
        _ => None,
    };

    Ok(DecodedFrame {
        frame_id,
        length: bytes.len(),
        hex,
        sensor,
    })
}

fn decode_location_sensor(b: &[u8]) -> Option<LocationSensorData> {
    if b.len() < LOCATION_SENSOR_FRAME_LEN {
        return None;
    }

    let event_status = u32::from_be_bytes([0, b[1], b[2], b[3]]);
    let events = EventFlags::from_bits(event_status);
    let utc = u32::from_be_bytes([b[5], b[6], b[7], b[8]]);

    Some(LocationSensorData {
        event_status,
        motion_segment: b[4],
        utc,
        utc_iso: render_display_time(utc),
        beacons: BEACON_OFFSETS.map(|offset| read_beacon(&b[offset..offset + 7])),
        temperature_c: f64::from(i16::from_be_bytes([b[30], b[31]])) / 10.0,
        light_pct: u16::from_be_bytes([b[32], b[33]]),
        battery_pct: b[34],
        events,
        motion_detect: events.motion_detected(),
    })
}

/// Read 6 MAC bytes followed by a signed RSSI byte
fn read_beacon(data: &[u8]) -> Beacon {
    Beacon {
        mac: format_mac(&data[..6]),
        rssi: data[6] as i8,
    }
}

fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Render epoch seconds at UTC+9, falling back to the current time
fn render_display_time(epoch_secs: u32) -> String {
    FixedOffset::east_opt(DISPLAY_OFFSET_SECS)
        .zip(DateTime::from_timestamp(i64::from(epoch_secs), 0))
        .map(|(offset, utc)| {
            utc.with_timezone(&offset)
                .to_rfc3339_opts(SecondsFormat::Secs, false)
        })
        .unwrap_or_else(now_iso)
}

/// Current UTC time as an ISO-8601 string
pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a 35 byte location & sensor frame
    pub(crate) fn location_frame(event_low: u8, temp_raw: i16, battery: u8) -> Vec<u8> {
        let mut b = vec![0x08, 0x00, 0x00, event_low, 0x02];
        b.extend_from_slice(&1_700_000_000u32.to_be_bytes());
        b.extend_from_slice(&[0xC3, 0x00, 0x11, 0x22, 0x33, 0x44]);
        b.push(0xC4); // -60
        b.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        b.push(0xB5); // -75
        b.extend_from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        b.push(0x05);
        b.extend_from_slice(&temp_raw.to_be_bytes());
        b.extend_from_slice(&1234u16.to_be_bytes());
        b.push(battery);
        assert_eq!(b.len(), LOCATION_SENSOR_FRAME_LEN);
        b
    }

    #[test]
    fn decode_full_location_frame() {
        let bytes = location_frame(0x08, 235, 77);
        let frame = decode_bytes(&bytes).unwrap();

        assert_eq!(frame.frame_id, 0x08);
        assert_eq!(frame.length, 35);
        assert_eq!(frame.hex, hex::encode(&bytes));

        let sensor = frame.location_sensor().unwrap();
        assert_eq!(sensor.event_status, 0x08);
        assert_eq!(sensor.motion_segment, 2);
        assert_eq!(sensor.utc, 1_700_000_000);
        assert_eq!(sensor.utc_iso, "2023-11-15T07:13:20+09:00");
        assert_eq!(
            sensor.beacons,
            [
                Beacon {
                    mac: "c3:00:11:22:33:44".to_string(),
                    rssi: -60
                },
                Beacon {
                    mac: "aa:bb:cc:dd:ee:ff".to_string(),
                    rssi: -75
                },
                Beacon {
                    mac: "01:02:03:04:05:06".to_string(),
                    rssi: 5
                },
            ]
        );
        assert_eq!(sensor.temperature_c, 23.5);
        assert_eq!(sensor.light_pct, 1234);
        assert_eq!(sensor.battery_pct, 77);
        assert!(sensor.events.shock);
        assert!(sensor.motion_detect);
    }

    #[test]
    fn decode_negative_temperature() {
        let frame = decode_bytes(&location_frame(0, -50, 10)).unwrap();
        assert_eq!(frame.sensor.unwrap().temperature_c, -5.0);
    }

    #[test]
    fn decode_event_status_is_24_bit_big_endian() {
        let mut bytes = location_frame(0x01, 0, 0);
        bytes[1] = 0x12;
        bytes[2] = 0x34;
        let sensor = decode_bytes(&bytes).unwrap().sensor.unwrap();
        assert_eq!(sensor.event_status, 0x123401);
        assert!(sensor.events.start_moving);
        assert!(sensor.motion_detect);
    }

    #[test]
    fn decode_is_deterministic() {
        let bytes = location_frame(0x25, 301, 99);
        assert_eq!(decode_bytes(&bytes).unwrap(), decode_bytes(&bytes).unwrap());
    }

    #[test]
    fn short_location_frame_is_generic_only() {
        let bytes = location_frame(0x08, 0, 0);
        let frame = decode_bytes(&bytes[..34]).unwrap();
        assert_eq!(frame.frame_id, 0x08);
        assert_eq!(frame.length, 34);
        assert!(frame.sensor.is_none());
    }

    #[test]
    fn longer_location_frame_is_decoded() {
        let mut bytes = location_frame(0x02, 0, 50);
        bytes.extend_from_slice(&[0xFF, 0xFF]);
        let frame = decode_bytes(&bytes).unwrap();
        assert_eq!(frame.length, 37);
        assert_eq!(frame.sensor.unwrap().battery_pct, 50);
    }

    #[test]
    fn other_frame_ids_are_generic_only() {
        let mut bytes = location_frame(0x08, 0, 0);
        bytes[0] = 0x09;
        let frame = decode_bytes(&bytes).unwrap();
        assert_eq!(frame.frame_id, 0x09);
        assert_eq!(frame.length, 35);
        assert!(frame.sensor.is_none());
    }

    #[test]
    fn decode_hex_accepts_mixed_case_and_whitespace() {
        let frame = decode_hex(" 09AbCd\n").unwrap();
        assert_eq!(frame.frame_id, 0x09);
        assert_eq!(frame.length, 3);
        assert_eq!(frame.hex, "09abcd");
    }

    #[test]
    fn empty_input_is_an_error() {
        assert_eq!(
            decode_hex("").unwrap_err(),
            FrameError::Empty { hex: String::new() }
        );
        assert!(matches!(decode_bytes(&[]), Err(FrameError::Empty { .. })));
    }

    #[test]
    fn invalid_hex_is_an_error() {
        let err = decode_hex("08zz").unwrap_err();
        assert!(matches!(err, FrameError::InvalidHex { .. }));
        assert_eq!(err.hex(), "08zz");
        assert!(decode_hex("abc").is_err());
    }

    #[test]
    fn display_time_uses_fixed_offset() {
        assert_eq!(render_display_time(0), "1970-01-01T09:00:00+09:00");
        assert_eq!(render_display_time(u32::MAX), "2106-02-07T15:28:15+09:00");
    }

    #[test]
    fn mac_is_lowercase_colon_hex() {
        assert_eq!(
            format_mac(&[0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x0A]),
            "de:ad:be:ef:00:0a"
        );
    }
}
