// Device identity and capability records

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::device::state::ConnectionState;

/// Bluetooth address identifying one physical device
///
/// One live `Device` record exists per address; the address is the key into
/// the manager's registry and the stream buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

/// Sensor capabilities advertised by a device during discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Inertial motion stream (accelerometer/gyro channels)
    Motion,
    /// Optical heart-rate stream
    HeartRate,
    /// Battery telemetry
    Battery,
}

impl Capability {
    pub fn display_name(&self) -> &'static str {
        match self {
            Capability::Motion => "motion",
            Capability::HeartRate => "heart-rate",
            Capability::Battery => "battery",
        }
    }
}

/// Live record for one physical device
///
/// Owned by the device's actor task; the manager hands out clones as
/// read-only snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub state: ConnectionState,
    /// Timestamp of the last payload or advertisement, microseconds
    pub last_seen_us: u64,
    pub capabilities: Vec<Capability>,
}

impl Device {
    pub fn discovered(id: DeviceId, capabilities: Vec<Capability>, last_seen_us: u64) -> Self {
        Self {
            id,
            state: ConnectionState::Discovered,
            last_seen_us,
            capabilities,
        }
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}
