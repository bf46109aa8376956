// Connection error types and constants

use crate::device::{ConnectionState, DeviceId};
use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Connection error code constants shared with the UI layer
///
/// These constants provide a single source of truth for error codes so the
/// shell can map failures to user-facing messages without string matching.
///
/// Error code range: 1001-1006
pub struct ConnectionErrorCodes {}

impl ConnectionErrorCodes {
    /// Device did not complete pairing within the bounded timeout
    pub const UNREACHABLE: i32 = 1001;

    /// Requested operation is not legal from the device's current state
    pub const INVALID_TRANSITION: i32 = 1002;

    /// Device address was never discovered or already unpaired
    pub const UNKNOWN_DEVICE: i32 = 1003;

    /// In-progress connect was cancelled by the caller
    pub const CANCELLED: i32 = 1004;

    /// Device actor task is gone (command channel closed)
    pub const ACTOR_GONE: i32 = 1005;

    /// Device registry lock was poisoned
    pub const REGISTRY_POISONED: i32 = 1006;
}

/// Log a connection error with structured context
///
/// Logs include the error code, component, and the human-readable message
/// so the UI can explain failures without re-deriving context.
pub fn log_connection_error(err: &ConnectionError, context: &str) {
    error!(
        "Connection error in {}: code={}, component=DeviceConnectionManager, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Device-connectivity errors
///
/// These errors cover the pairing/connection state machine, including
/// timeouts, illegal transitions, and cancellation.
///
/// Error code range: 1001-1006
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// Device did not complete pairing within the bounded timeout
    Unreachable {
        device_id: DeviceId,
        timeout_ms: u64,
        reason: String,
    },

    /// Requested operation is not legal from the current state
    InvalidTransition {
        device_id: DeviceId,
        from: ConnectionState,
        requested: &'static str,
    },

    /// Device address was never discovered or already unpaired
    UnknownDevice { device_id: DeviceId },

    /// In-progress connect was cancelled, state left as if never started
    Cancelled { device_id: DeviceId },

    /// Device actor task is gone (command channel closed)
    ActorGone { device_id: DeviceId },

    /// Device registry lock was poisoned
    RegistryPoisoned,
}

impl ConnectionError {
    /// Device the error refers to, if any
    pub fn device_id(&self) -> Option<&DeviceId> {
        match self {
            ConnectionError::Unreachable { device_id, .. }
            | ConnectionError::InvalidTransition { device_id, .. }
            | ConnectionError::UnknownDevice { device_id }
            | ConnectionError::Cancelled { device_id }
            | ConnectionError::ActorGone { device_id } => Some(device_id),
            ConnectionError::RegistryPoisoned => None,
        }
    }
}

impl ErrorCode for ConnectionError {
    fn code(&self) -> i32 {
        match self {
            ConnectionError::Unreachable { .. } => ConnectionErrorCodes::UNREACHABLE,
            ConnectionError::InvalidTransition { .. } => ConnectionErrorCodes::INVALID_TRANSITION,
            ConnectionError::UnknownDevice { .. } => ConnectionErrorCodes::UNKNOWN_DEVICE,
            ConnectionError::Cancelled { .. } => ConnectionErrorCodes::CANCELLED,
            ConnectionError::ActorGone { .. } => ConnectionErrorCodes::ACTOR_GONE,
            ConnectionError::RegistryPoisoned => ConnectionErrorCodes::REGISTRY_POISONED,
        }
    }

    fn message(&self) -> String {
        match self {
            ConnectionError::Unreachable {
                device_id,
                timeout_ms,
                reason,
            } => {
                format!(
                    "Device {} unreachable within {} ms: {}",
                    device_id, timeout_ms, reason
                )
            }
            ConnectionError::InvalidTransition {
                device_id,
                from,
                requested,
            } => {
                format!(
                    "Cannot {} device {} from state {}",
                    requested, device_id, from
                )
            }
            ConnectionError::UnknownDevice { device_id } => {
                format!("Device {} is not paired or discovered", device_id)
            }
            ConnectionError::Cancelled { device_id } => {
                format!("Connect to device {} was cancelled", device_id)
            }
            ConnectionError::ActorGone { device_id } => {
                format!("Device {} worker is no longer running", device_id)
            }
            ConnectionError::RegistryPoisoned => "Device registry lock poisoned".to_string(),
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for ConnectionError {}
