// Device connectivity: identity, connection state machine, and manager
//
// One physical wearable maps to one `Device` record and one actor task in
// the `DeviceConnectionManager`. The hardware radio itself sits behind the
// `DeviceLink` trait so the manager can be driven by a scripted link in
// tests.

pub mod backoff;
pub mod link;
pub mod manager;
pub mod state;
pub mod types;

pub use link::{DeviceLink, LinkFault, LinkPlan, ScriptedLink};
pub use manager::{DeviceConnectionManager, DeviceEvent};
pub use state::{ConnectionState, DeviceStateMachine};
pub use types::{Capability, Device, DeviceId};
