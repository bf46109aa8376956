// Sensor stream error types and constants

use crate::device::DeviceId;
use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Stream error code constants shared with the UI layer
///
/// Error code range: 2001-2004
pub struct StreamErrorCodes {}

impl StreamErrorCodes {
    /// Raw payload did not decode into a valid sensor sample
    pub const MALFORMED_SAMPLE: i32 = 2001;

    /// Sample sequence number or timestamp regressed for its device
    pub const OUT_OF_ORDER: i32 = 2002;

    /// Window holds fewer samples than inference requires
    pub const INSUFFICIENT_DATA: i32 = 2003;

    /// Stream buffer lock was poisoned
    pub const BUFFER_POISONED: i32 = 2004;
}

/// Log a stream error with structured context
///
/// Per-sample failures are expected during normal operation (radio noise,
/// firmware hiccups), so callers log at error level only at the point where
/// they also drop the sample and bump the diagnostics counter.
pub fn log_stream_error(err: &StreamError, context: &str) {
    error!(
        "Stream error in {}: code={}, component=SensorStream, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Sensor-stream errors
///
/// All per-sample variants are non-fatal: the sample is dropped and counted
/// while the device's stream continues.
///
/// Error code range: 2001-2004
#[derive(Debug, Clone, PartialEq)]
pub enum StreamError {
    /// Raw payload did not decode into a valid sensor sample
    MalformedSample { device_id: DeviceId, reason: String },

    /// Sample ordering invariant violated (dropped, never reordered)
    OutOfOrder {
        device_id: DeviceId,
        sequence: u32,
        last_sequence: u32,
        timestamp_us: u64,
        last_timestamp_us: u64,
    },

    /// Window holds fewer samples than inference requires; retry later
    InsufficientData {
        device_id: Option<DeviceId>,
        got: usize,
        needed: usize,
    },

    /// Stream buffer lock was poisoned
    BufferPoisoned,
}

impl ErrorCode for StreamError {
    fn code(&self) -> i32 {
        match self {
            StreamError::MalformedSample { .. } => StreamErrorCodes::MALFORMED_SAMPLE,
            StreamError::OutOfOrder { .. } => StreamErrorCodes::OUT_OF_ORDER,
            StreamError::InsufficientData { .. } => StreamErrorCodes::INSUFFICIENT_DATA,
            StreamError::BufferPoisoned => StreamErrorCodes::BUFFER_POISONED,
        }
    }

    fn message(&self) -> String {
        match self {
            StreamError::MalformedSample { device_id, reason } => {
                format!("Malformed sample from device {}: {}", device_id, reason)
            }
            StreamError::OutOfOrder {
                device_id,
                sequence,
                last_sequence,
                timestamp_us,
                last_timestamp_us,
            } => {
                if sequence <= last_sequence {
                    format!(
                        "Out-of-order sample from device {}: sequence {} after {}",
                        device_id, sequence, last_sequence
                    )
                } else {
                    format!(
                        "Out-of-order sample from device {}: timestamp {} us after {} us",
                        device_id, timestamp_us, last_timestamp_us
                    )
                }
            }
            StreamError::InsufficientData {
                device_id,
                got,
                needed,
            } => match device_id {
                Some(id) => format!(
                    "Window for device {} has {} samples, inference needs {}",
                    id, got, needed
                ),
                None => format!("Window has {} samples, inference needs {}", got, needed),
            },
            StreamError::BufferPoisoned => "Sensor stream buffer lock poisoned".to_string(),
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for StreamError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceId {
        DeviceId::new("D1")
    }

    #[test]
    fn test_stream_error_codes() {
        assert_eq!(
            StreamError::MalformedSample {
                device_id: device(),
                reason: "short payload".to_string()
            }
            .code(),
            StreamErrorCodes::MALFORMED_SAMPLE
        );
        assert_eq!(
            StreamError::OutOfOrder {
                device_id: device(),
                sequence: 3,
                last_sequence: 5,
                timestamp_us: 100,
                last_timestamp_us: 90,
            }
            .code(),
            StreamErrorCodes::OUT_OF_ORDER
        );
        assert_eq!(
            StreamError::InsufficientData {
                device_id: None,
                got: 4,
                needed: 32
            }
            .code(),
            StreamErrorCodes::INSUFFICIENT_DATA
        );
        assert_eq!(
            StreamError::BufferPoisoned.code(),
            StreamErrorCodes::BUFFER_POISONED
        );
    }

    #[test]
    fn test_out_of_order_message_picks_violation() {
        let seq = StreamError::OutOfOrder {
            device_id: device(),
            sequence: 3,
            last_sequence: 5,
            timestamp_us: 100,
            last_timestamp_us: 90,
        };
        assert!(seq.message().contains("sequence 3 after 5"));

        let ts = StreamError::OutOfOrder {
            device_id: device(),
            sequence: 6,
            last_sequence: 5,
            timestamp_us: 80,
            last_timestamp_us: 90,
        };
        assert!(ts.message().contains("timestamp 80 us after 90 us"));
    }

    #[test]
    fn test_insufficient_data_message() {
        let err = StreamError::InsufficientData {
            device_id: Some(device()),
            got: 4,
            needed: 32,
        };
        let msg = err.message();
        assert!(msg.contains("D1"));
        assert!(msg.contains('4'));
        assert!(msg.contains("32"));
    }
}
