//! Trainer Notification Protocol
//!
//! Known sensor-data characteristics and the binary layout of their
//! notifications.

use crate::domain::models::{MetricsFrame, StreamMessage};
use crate::error::DecodeError;
use tracing::trace;
use uuid::Uuid;

/// Indoor Bike Data (FTMS, 0x2AD2)
pub const INDOOR_BIKE_DATA: Uuid = Uuid::from_u128(0x00002ad2_0000_1000_8000_00805f9b34fb);

/// Cycling Power Measurement (0x2A63)
pub const CYCLING_POWER_MEASUREMENT: Uuid =
    Uuid::from_u128(0x00002a63_0000_1000_8000_00805f9b34fb);

/// Cycling Speed and Cadence Measurement (0x2A5B)
pub const CSC_MEASUREMENT: Uuid = Uuid::from_u128(0x00002a5b_0000_1000_8000_00805f9b34fb);

/// Default negotiation order, highest priority first.
pub const DEFAULT_CANDIDATES: [Uuid; 3] =
    [INDOOR_BIKE_DATA, CYCLING_POWER_MEASUREMENT, CSC_MEASUREMENT];

/// Minimum notification length carrying a full frame.
pub const FRAME_LEN: usize = 6;

/// Raw speed unit in km/h.
pub const SPEED_SCALE: f64 = 0.01;

/// Decode a notification payload.
///
/// # Frame Structure
///
/// ```text
/// [0-1] : Instantaneous power (u16 little-endian, W)
/// [2-3] : Cadence (u16 little-endian, rpm)
/// [4-5] : Speed (u16 little-endian, 0.01 km/h)
/// [6..] : ignored
/// ```
///
/// Values are not range-checked.
pub fn decode_frame(bytes: &[u8]) -> Result<MetricsFrame, DecodeError> {
    if bytes.len() < FRAME_LEN {
        return Err(DecodeError::TooShort {
            len: bytes.len(),
            required: FRAME_LEN,
        });
    }

    #[cfg(debug_assertions)]
    trace!("Raw frame: {:02X?}", bytes);

    let power = u16::from_le_bytes([bytes[0], bytes[1]]);
    let cadence = u16::from_le_bytes([bytes[2], bytes[3]]);
    let raw_speed = u16::from_le_bytes([bytes[4], bytes[5]]);

    Ok(MetricsFrame {
        power,
        cadence,
        speed_kph: f64::from(raw_speed) * SPEED_SCALE,
    })
}

/// Decode straight into what the consumer sees. Bad frames become error
/// records so the consumer can tell them apart from silence.
pub fn decode_message(bytes: &[u8]) -> StreamMessage {
    match decode_frame(bytes) {
        Ok(frame) => StreamMessage::Metrics(frame),
        Err(e) => StreamMessage::error(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(power: u16, cadence: u16, raw_speed: u16) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FRAME_LEN);
        bytes.extend_from_slice(&power.to_le_bytes());
        bytes.extend_from_slice(&cadence.to_le_bytes());
        bytes.extend_from_slice(&raw_speed.to_le_bytes());
        bytes
    }

    #[test]
    fn test_decode_frame() {
        let frame = decode_frame(&encode(250, 90, 3200)).unwrap();
        assert_eq!(frame.power, 250);
        assert_eq!(frame.cadence, 90);
        assert!((frame.speed_kph - 32.0).abs() < 1e-9);
    }

    #[test]
    fn test_decode_is_little_endian() {
        let frame = decode_frame(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]).unwrap();
        assert_eq!(frame.power, 0x0201);
        assert_eq!(frame.cadence, 0x0403);
        assert_eq!(frame.speed_kph, f64::from(0x0605u16) * 0.01);
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut bytes = encode(1, 2, 3);
        bytes.extend_from_slice(&[0xFF, 0xFF]);
        let frame = decode_frame(&bytes).unwrap();
        assert_eq!((frame.power, frame.cadence), (1, 2));
    }

    #[test]
    fn test_no_range_validation() {
        let frame = decode_frame(&encode(u16::MAX, u16::MAX, u16::MAX)).unwrap();
        assert_eq!(frame.power, u16::MAX);
        assert_eq!(frame.speed_kph, 65535.0 * 0.01);
    }

    #[test]
    fn test_short_frame() {
        assert_eq!(
            decode_frame(&[0x00, 0x01, 0x02, 0x03]),
            Err(DecodeError::TooShort {
                len: 4,
                required: FRAME_LEN
            })
        );
        assert!(decode_frame(&[]).is_err());
    }

    #[test]
    fn test_short_frame_becomes_error_record() {
        match decode_message(&[0x00, 0x01, 0x02, 0x03]) {
            StreamMessage::Error { error } => assert!(error.contains("4 bytes")),
            other => panic!("expected error record, got {:?}", other),
        }
    }

    #[test]
    fn test_candidate_uuids() {
        assert_eq!(
            INDOOR_BIKE_DATA.to_string(),
            "00002ad2-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(DEFAULT_CANDIDATES[0], INDOOR_BIKE_DATA);
        assert_eq!(DEFAULT_CANDIDATES[2], CSC_MEASUREMENT);
    }
}
