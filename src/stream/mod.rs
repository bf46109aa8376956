// Sensor stream handling: raw payload recycling and per-device retention
//
// The link callback thread hands raw notification payloads to the decode
// worker through the lock-free `PayloadPool`; decoded samples land in the
// time-ordered `SensorStreamBuffer` that feeds both the classifier and the
// annotation sessions.

pub mod buffer;
pub mod pool;

pub use buffer::{SampleWindow, SensorStreamBuffer};
pub use pool::{PayloadPool, PayloadPoolChannels, RawPayload};
