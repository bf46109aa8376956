// Hardware link seam
//
// The platform Bluetooth stack is an external collaborator. The manager
// only needs two operations from it: begin opening a link (completion is
// delivered asynchronously) and tear a link down. `ScriptedLink` is the
// in-repo implementation used by tests and the CLI replay harness.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::device::types::DeviceId;

/// Failure reported by the platform link layer
#[derive(Debug, Clone, PartialEq)]
pub enum LinkFault {
    /// No response from the device radio
    OutOfRange,
    /// Device actively refused the link
    Refused { reason: String },
}

impl LinkFault {
    pub fn describe(&self) -> String {
        match self {
            LinkFault::OutOfRange => "device out of range".to_string(),
            LinkFault::Refused { reason } => format!("link refused: {}", reason),
        }
    }
}

/// Outcome of one physical link attempt
pub type LinkResult = Result<(), LinkFault>;

/// Abstraction over the platform Bluetooth link layer
///
/// `open` must not block: completion (or fault) arrives on the returned
/// receiver. If the hardware never answers, the receiver simply never
/// resolves and the manager's connect timeout fires. `close` releases any
/// link resources and must be safe to call in every state.
pub trait DeviceLink: Send + Sync + 'static {
    fn open(&self, device: &DeviceId) -> oneshot::Receiver<LinkResult>;
    fn close(&self, device: &DeviceId);
}

/// One planned response of a `ScriptedLink`
#[derive(Debug, Clone, PartialEq)]
pub enum LinkPlan {
    /// Complete the link after the given delay
    Success { delay_ms: u64 },
    /// Report a fault after the given delay
    Fault { fault: LinkFault, delay_ms: u64 },
    /// Never answer; the caller's timeout decides
    Hang,
}

/// Scriptable link layer for tests and replay harnesses
///
/// Plans are consumed per device in FIFO order; once a device's plan queue
/// is empty, `open` falls back to immediate success.
#[derive(Default)]
pub struct ScriptedLink {
    plans: Mutex<HashMap<DeviceId, VecDeque<LinkPlan>>>,
    closed: Mutex<Vec<DeviceId>>,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next planned response for a device
    pub fn plan(&self, device: &DeviceId, plan: LinkPlan) {
        self.plans
            .lock()
            .expect("link plans poisoned")
            .entry(device.clone())
            .or_default()
            .push_back(plan);
    }

    /// Devices `close` has been called for, in order
    pub fn closed(&self) -> Vec<DeviceId> {
        self.closed.lock().expect("link close log poisoned").clone()
    }

    fn next_plan(&self, device: &DeviceId) -> LinkPlan {
        self.plans
            .lock()
            .expect("link plans poisoned")
            .get_mut(device)
            .and_then(VecDeque::pop_front)
            .unwrap_or(LinkPlan::Success { delay_ms: 0 })
    }
}

impl DeviceLink for ScriptedLink {
    fn open(&self, device: &DeviceId) -> oneshot::Receiver<LinkResult> {
        let (tx, rx) = oneshot::channel();
        match self.next_plan(device) {
            LinkPlan::Success { delay_ms: 0 } => {
                let _ = tx.send(Ok(()));
            }
            LinkPlan::Success { delay_ms } => {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    let _ = tx.send(Ok(()));
                });
            }
            LinkPlan::Fault { fault, delay_ms } => {
                tokio::spawn(async move {
                    if delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                    let _ = tx.send(Err(fault));
                });
            }
            LinkPlan::Hang => {
                // Keep the sender alive forever so the receiver stays pending
                std::mem::forget(tx);
            }
        }
        rx
    }

    fn close(&self, device: &DeviceId) {
        self.closed
            .lock()
            .expect("link close log poisoned")
            .push(device.clone());
    }
}
