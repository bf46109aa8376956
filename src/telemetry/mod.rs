//! Diagnostics telemetry collector and stream-health counters.
//!
//! The collector multiplexes sample-drop, inference, and device-lifecycle
//! events into a bounded history plus an async broadcast stream. The
//! counters are plain atomics the UI can poll to explain stream health
//! without the core re-deriving anything.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub mod events;

pub use events::{DropReason, MetricEvent};

/// Global telemetry hub shared across the crate.
static HUB: Lazy<TelemetryHub> = Lazy::new(TelemetryHub::default);

/// Access the global telemetry hub.
pub fn hub() -> &'static TelemetryHub {
    &HUB
}

/// Stream-health counters per engine.
///
/// Malformed and out-of-order drops are per-sample, expected events; the
/// counters exist so the UI can show "dropped N frames" next to a device
/// instead of hiding radio trouble.
#[derive(Debug, Default)]
pub struct StreamCounters {
    accepted: AtomicU64,
    malformed: AtomicU64,
    out_of_order: AtomicU64,
}

/// Point-in-time copy of the counters for UI polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountersSnapshot {
    pub accepted: u64,
    pub malformed: u64,
    pub out_of_order: u64,
}

impl StreamCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_out_of_order(&self) {
        self.out_of_order.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of collector state for CLI reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<MetricEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
}

/// Broadcast-based collector retaining a bounded history of metrics.
pub struct TelemetryCollector {
    tx: broadcast::Sender<MetricEvent>,
    history: Mutex<VecDeque<MetricEvent>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
}

impl TelemetryCollector {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: MetricEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        {
            let mut history = self.history.lock().expect("history poisoned");
            if history.len() == self.history_capacity {
                history.pop_front();
                self.dropped_history.fetch_add(1, Ordering::Relaxed);
            }
            history.push_back(event.clone());
        }

        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let history = self.history.lock().expect("history poisoned");
        TelemetrySnapshot {
            recent: history.iter().cloned().collect(),
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_history.load(Ordering::Relaxed),
        }
    }
}

/// Hub bundling the collector used by the whole process.
pub struct TelemetryHub {
    collector: TelemetryCollector,
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self {
            collector: TelemetryCollector::new(256, 128),
        }
    }
}

impl TelemetryHub {
    pub fn collector(&self) -> &TelemetryCollector {
        &self.collector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ConnectionState, DeviceId};

    fn lifecycle_event(ms: u64) -> MetricEvent {
        MetricEvent::DeviceLifecycle {
            device_id: DeviceId::new("D1"),
            state: ConnectionState::Connected,
            timestamp_ms: ms,
        }
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = StreamCounters::new();
        counters.record_accepted();
        counters.record_accepted();
        counters.record_malformed();
        counters.record_out_of_order();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.accepted, 2);
        assert_eq!(snapshot.malformed, 1);
        assert_eq!(snapshot.out_of_order, 1);
    }

    #[test]
    fn test_collector_history_is_bounded() {
        let collector = TelemetryCollector::new(16, 2);
        collector.publish(lifecycle_event(1));
        collector.publish(lifecycle_event(2));
        collector.publish(lifecycle_event(3));

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(snapshot.total_events, 3);
        assert_eq!(snapshot.dropped_events, 1);
        assert_eq!(snapshot.recent[0], lifecycle_event(2));
    }

    #[test]
    fn test_collector_broadcast() {
        let collector = TelemetryCollector::new(16, 8);
        let mut rx = collector.subscribe();
        collector.publish(lifecycle_event(7));
        assert_eq!(rx.try_recv().unwrap(), lifecycle_event(7));
    }

    #[test]
    fn test_global_hub_is_shared() {
        let first = hub() as *const TelemetryHub;
        let second = hub() as *const TelemetryHub;
        assert_eq!(first, second);
    }
}
