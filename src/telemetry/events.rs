//! Core telemetry event types describing diagnostics data exposed to the
//! UI layer and the CLI replay harness.

use serde::{Deserialize, Serialize};

use crate::annotation::ActivityKind;
use crate::device::{ConnectionState, DeviceId};

/// Why an ingested sample was dropped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Malformed,
    OutOfOrder,
}

/// Rich metric events covering stream health, inference, and device
/// lifecycle details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MetricEvent {
    SampleDropped {
        device_id: DeviceId,
        reason: DropReason,
        detail: String,
    },
    Inference {
        device_id: DeviceId,
        model_version: String,
        label_count: usize,
        top_kind: Option<ActivityKind>,
    },
    DeviceLifecycle {
        device_id: DeviceId,
        state: ConnectionState,
        timestamp_ms: u64,
    },
}
