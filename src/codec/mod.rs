// SensorSample codec - raw device payload to typed sample
//
// Wearables notify one frame per sample batch over the motion
// characteristic. The frame layout is fixed little-endian:
//
//   [0]      protocol version (currently 1)
//   [1]      channel count (1..=16)
//   [2..6]   u32 sequence number
//   [6..14]  u64 monotonic timestamp, microseconds
//   [14..]   channel readings, f32 each
//
// Decoding is a pure, stateless transform. A payload that does not match
// the schema yields `StreamError::MalformedSample`; the caller drops the
// frame and bumps the malformed counter rather than aborting the stream.

use serde::{Deserialize, Serialize};

use crate::device::DeviceId;
use crate::error::StreamError;

/// Wire protocol version this codec understands
pub const WIRE_VERSION: u8 = 1;

/// Fixed frame header length in bytes
pub const HEADER_LEN: usize = 14;

/// Upper bound on channels a single frame may carry
pub const MAX_CHANNELS: usize = 16;

/// Timestamp value the firmware emits when its clock readout failed
const CORRUPT_TIMESTAMP: u64 = u64::MAX;

/// One normalized, timestamped sensor reading batch
///
/// Immutable once created. Sequence numbers are strictly increasing and
/// timestamps non-decreasing per device; the stream buffer enforces both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub device_id: DeviceId,
    /// Device-monotonic timestamp, microseconds
    pub timestamp_us: u64,
    /// Per-device frame counter
    pub sequence: u32,
    /// Ordered channel readings (e.g. accelerometer x/y/z)
    pub channels: Vec<f32>,
}

impl SensorSample {
    pub fn new(
        device_id: DeviceId,
        timestamp_us: u64,
        sequence: u32,
        channels: Vec<f32>,
    ) -> Self {
        Self {
            device_id,
            timestamp_us,
            sequence,
            channels,
        }
    }
}

/// Decode one raw payload into a `SensorSample`
pub fn decode_payload(device_id: &DeviceId, payload: &[u8]) -> Result<SensorSample, StreamError> {
    if payload.len() < HEADER_LEN {
        return Err(malformed(
            device_id,
            format!("payload {} bytes, header needs {}", payload.len(), HEADER_LEN),
        ));
    }

    let version = payload[0];
    if version != WIRE_VERSION {
        return Err(malformed(
            device_id,
            format!("unsupported wire version {}", version),
        ));
    }

    let channel_count = payload[1] as usize;
    if channel_count == 0 || channel_count > MAX_CHANNELS {
        return Err(malformed(
            device_id,
            format!("channel count {} outside 1..={}", channel_count, MAX_CHANNELS),
        ));
    }

    let expected = HEADER_LEN + channel_count * 4;
    if payload.len() != expected {
        return Err(malformed(
            device_id,
            format!(
                "payload {} bytes, {} channels need {}",
                payload.len(),
                channel_count,
                expected
            ),
        ));
    }

    let sequence = u32::from_le_bytes(payload[2..6].try_into().expect("sliced 4 bytes"));
    let timestamp_us = u64::from_le_bytes(payload[6..14].try_into().expect("sliced 8 bytes"));
    if timestamp_us == CORRUPT_TIMESTAMP {
        return Err(malformed(device_id, "corrupt timestamp".to_string()));
    }

    let mut channels = Vec::with_capacity(channel_count);
    for chunk in payload[HEADER_LEN..].chunks_exact(4) {
        let reading = f32::from_le_bytes(chunk.try_into().expect("sliced 4 bytes"));
        if !reading.is_finite() {
            return Err(malformed(
                device_id,
                format!("non-finite reading in channel {}", channels.len()),
            ));
        }
        channels.push(reading);
    }

    Ok(SensorSample {
        device_id: device_id.clone(),
        timestamp_us,
        sequence,
        channels,
    })
}

/// Encode a sample back into the wire layout
///
/// Used by the replay harness and the scripted test fixtures; firmware is
/// the producer in production.
pub fn encode_sample(sample: &SensorSample) -> Vec<u8> {
    let mut payload = Vec::with_capacity(HEADER_LEN + sample.channels.len() * 4);
    payload.push(WIRE_VERSION);
    payload.push(sample.channels.len() as u8);
    payload.extend_from_slice(&sample.sequence.to_le_bytes());
    payload.extend_from_slice(&sample.timestamp_us.to_le_bytes());
    for reading in &sample.channels {
        payload.extend_from_slice(&reading.to_le_bytes());
    }
    payload
}

fn malformed(device_id: &DeviceId, reason: String) -> StreamError {
    StreamError::MalformedSample {
        device_id: device_id.clone(),
        reason,
    }
}
