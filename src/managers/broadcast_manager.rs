// BroadcastChannelManager: Centralized tokio broadcast channel management
// Single Responsibility: Broadcast channel lifecycle and subscription

use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::annotation::ActivityLabel;
use crate::device::{DeviceEvent, DeviceId};

/// Inference results published for UI rendering
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceUpdate {
    pub device_id: DeviceId,
    /// Session the labels were applied to, if any
    pub session_id: Option<u64>,
    pub labels: Vec<ActivityLabel>,
    pub model_version: String,
}

/// Manages all tokio broadcast channels
///
/// Single Responsibility: Broadcast channel lifecycle and subscription
///
/// Centralizes channel creation, storage, and subscription handling so
/// publishers and subscribers never hold each other's types.
///
/// # Channel Types
/// - Device events: state changes and loss notifications per device
/// - Inference updates: labels produced by the classifier
pub struct BroadcastChannelManager {
    device_events: Arc<Mutex<Option<broadcast::Sender<DeviceEvent>>>>,
    inference: Arc<Mutex<Option<broadcast::Sender<InferenceUpdate>>>>,
}

impl BroadcastChannelManager {
    /// Create a new manager with all channels uninitialized
    ///
    /// Channels must be explicitly initialized via init_* methods before use.
    pub fn new() -> Self {
        Self {
            device_events: Arc::new(Mutex::new(None)),
            inference: Arc::new(Mutex::new(None)),
        }
    }

    /// Initialize the device event broadcast channel
    ///
    /// Returns the sender handed to the DeviceConnectionManager. Buffer
    /// size 64: state transitions are rare relative to consumer speed.
    pub fn init_device_events(&self) -> broadcast::Sender<DeviceEvent> {
        let (tx, _) = broadcast::channel(64);
        *self.device_events.lock().unwrap() = Some(tx.clone());
        tx
    }

    /// Subscribe to device events
    ///
    /// # Returns
    /// `None` if init_device_events() has not been called yet
    pub fn subscribe_device_events(&self) -> Option<broadcast::Receiver<DeviceEvent>> {
        self.device_events
            .lock()
            .unwrap()
            .as_ref()
            .map(|tx| tx.subscribe())
    }

    /// Initialize the inference update broadcast channel
    ///
    /// Buffer size 100 covers bursts when several devices infer at once;
    /// lagged subscribers lose the oldest updates.
    pub fn init_inference(&self) -> broadcast::Sender<InferenceUpdate> {
        let (tx, _) = broadcast::channel(100);
        *self.inference.lock().unwrap() = Some(tx.clone());
        tx
    }

    /// Subscribe to inference updates
    ///
    /// # Returns
    /// `None` if init_inference() has not been called yet
    pub fn subscribe_inference(&self) -> Option<broadcast::Receiver<InferenceUpdate>> {
        self.inference
            .lock()
            .unwrap()
            .as_ref()
            .map(|tx| tx.subscribe())
    }

    /// Publish an inference update if the channel is initialized
    pub fn publish_inference(&self, update: InferenceUpdate) {
        if let Some(tx) = self.inference.lock().unwrap().as_ref() {
            let _ = tx.send(update);
        }
    }
}

impl Default for BroadcastChannelManager {
    fn default() -> Self {
        Self::new()
    }
}
