// SensorStreamBuffer - per-device time-ordered retention buffer
//
// Holds the most recent retention window of samples per device, feeding
// both the classifier and the annotation UI. Ordering is enforced, never
// repaired: a sample whose sequence or timestamp regresses is rejected
// with `OutOfOrder` and the buffer is left unchanged. Eviction is lazy,
// piggybacked on the next accepted push; no background thread.
//
// Reads hand out immutable `SampleWindow` snapshots, so classification can
// run concurrently with ingestion without observing a moving buffer.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::codec::SensorSample;
use crate::device::DeviceId;
use crate::error::StreamError;

/// Immutable, restartable snapshot of samples in a time interval
///
/// Cloning the underlying samples out of the buffer is what lets `infer`
/// tolerate concurrent appends: the snapshot never changes underneath it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleWindow {
    device_id: Option<DeviceId>,
    samples: Vec<SensorSample>,
}

impl SampleWindow {
    pub fn new(device_id: DeviceId, samples: Vec<SensorSample>) -> Self {
        Self {
            device_id: Some(device_id),
            samples,
        }
    }

    pub fn empty(device_id: DeviceId) -> Self {
        Self::new(device_id, Vec::new())
    }

    pub fn device_id(&self) -> Option<&DeviceId> {
        self.device_id.as_ref()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[SensorSample] {
        &self.samples
    }

    /// Restartable iteration; call as often as needed
    pub fn iter(&self) -> std::slice::Iter<'_, SensorSample> {
        self.samples.iter()
    }

    /// Timestamp of the first sample, if any
    pub fn start_us(&self) -> Option<u64> {
        self.samples.first().map(|s| s.timestamp_us)
    }

    /// Timestamp of the last sample, if any
    pub fn end_us(&self) -> Option<u64> {
        self.samples.last().map(|s| s.timestamp_us)
    }

    pub fn into_samples(self) -> Vec<SensorSample> {
        self.samples
    }
}

struct DeviceStream {
    samples: VecDeque<SensorSample>,
    last_sequence: Option<u32>,
    last_timestamp_us: u64,
}

impl DeviceStream {
    fn new() -> Self {
        Self {
            samples: VecDeque::new(),
            last_sequence: None,
            last_timestamp_us: 0,
        }
    }
}

/// Bounded, time-ordered sample buffer keyed by device
pub struct SensorStreamBuffer {
    retention_us: u64,
    max_samples: usize,
    streams: Mutex<HashMap<DeviceId, DeviceStream>>,
}

impl SensorStreamBuffer {
    /// # Arguments
    /// * `retention_us` - Span of most-recent samples kept per device
    /// * `max_samples` - Hard cap per device regardless of timestamps
    pub fn new(retention_us: u64, max_samples: usize) -> Self {
        Self {
            retention_us,
            max_samples: max_samples.max(1),
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Accept one decoded sample
    ///
    /// # Errors
    /// `StreamError::OutOfOrder` if the sequence number does not exceed the
    /// last accepted one for this device, or the timestamp regresses. The
    /// sample is dropped and the buffer left unchanged.
    pub fn push(&self, sample: SensorSample) -> Result<(), StreamError> {
        let mut streams = self.lock_streams()?;
        let stream = streams
            .entry(sample.device_id.clone())
            .or_insert_with(DeviceStream::new);

        if let Some(last_sequence) = stream.last_sequence {
            if sample.sequence <= last_sequence || sample.timestamp_us < stream.last_timestamp_us {
                return Err(StreamError::OutOfOrder {
                    device_id: sample.device_id.clone(),
                    sequence: sample.sequence,
                    last_sequence,
                    timestamp_us: sample.timestamp_us,
                    last_timestamp_us: stream.last_timestamp_us,
                });
            }
        }

        stream.last_sequence = Some(sample.sequence);
        stream.last_timestamp_us = sample.timestamp_us;

        // Lazy eviction: drop everything older than the retention window,
        // measured from the newest accepted timestamp
        let horizon = sample.timestamp_us.saturating_sub(self.retention_us);
        while stream
            .samples
            .front()
            .is_some_and(|oldest| oldest.timestamp_us < horizon)
        {
            stream.samples.pop_front();
        }
        while stream.samples.len() >= self.max_samples {
            stream.samples.pop_front();
        }

        stream.samples.push_back(sample);
        Ok(())
    }

    /// Snapshot the samples with timestamps in `[start_us, end_us)`
    ///
    /// Returns an empty window when the device is unknown or nothing
    /// overlaps the interval.
    pub fn window(
        &self,
        device_id: &DeviceId,
        start_us: u64,
        end_us: u64,
    ) -> Result<SampleWindow, StreamError> {
        let streams = self.lock_streams()?;
        let Some(stream) = streams.get(device_id) else {
            return Ok(SampleWindow::empty(device_id.clone()));
        };
        let samples: Vec<SensorSample> = stream
            .samples
            .iter()
            .filter(|s| s.timestamp_us >= start_us && s.timestamp_us < end_us)
            .cloned()
            .collect();
        Ok(SampleWindow::new(device_id.clone(), samples))
    }

    /// Number of buffered samples for a device
    pub fn len(&self, device_id: &DeviceId) -> usize {
        self.streams
            .lock()
            .ok()
            .and_then(|streams| streams.get(device_id).map(|s| s.samples.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, device_id: &DeviceId) -> bool {
        self.len(device_id) == 0
    }

    /// Drop a device's samples and ordering watermark
    ///
    /// Used after the loss grace period expires: the next link starts a
    /// fresh stream, so a restarted firmware sequence counter is accepted.
    pub fn clear_device(&self, device_id: &DeviceId) {
        if let Ok(mut streams) = self.streams.lock() {
            if let Some(stream) = streams.get_mut(device_id) {
                stream.samples.clear();
                stream.last_sequence = None;
                stream.last_timestamp_us = 0;
            }
        }
        log::debug!("[SensorStreamBuffer] Cleared buffer for {}", device_id);
    }

    /// Remove a device entirely (unpair)
    pub fn remove_device(&self, device_id: &DeviceId) {
        if let Ok(mut streams) = self.streams.lock() {
            streams.remove(device_id);
        }
        log::debug!("[SensorStreamBuffer] Removed buffer for {}", device_id);
    }

    fn lock_streams(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<DeviceId, DeviceStream>>, StreamError> {
        self.streams.lock().map_err(|_| StreamError::BufferPoisoned)
    }
}
