// EngineContext: Dependency Injection Container
// Centralizes all engine state for testability and clean architecture

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::analysis::{ActivityClassifier, ActivityModel, HeuristicModel};
use crate::annotation::label::ActivityLabel;
use crate::annotation::session::LabeledRecording;
use crate::codec::decode_payload;
use crate::config::EngineConfig;
use crate::device::{
    Capability, ConnectionState, Device, DeviceConnectionManager, DeviceEvent, DeviceId,
    DeviceLink,
};
use crate::error::{AnnotationError, ConnectionError, StreamError};
use crate::managers::{AnnotationManager, BroadcastChannelManager, InferenceUpdate};
use crate::stream::{PayloadPool, SampleWindow, SensorStreamBuffer};
use crate::telemetry::{self, CountersSnapshot, DropReason, MetricEvent, StreamCounters};

/// EngineContext: dependency injection container for the engine
///
/// Consolidates the engine's moving parts behind one facade the mobile
/// shell calls:
/// - DeviceConnectionManager for pairing lifecycle
/// - SensorStreamBuffer fed by the codec
/// - ActivityClassifier around the injected model
/// - AnnotationManager for labeling sessions
/// - BroadcastChannelManager for UI event subscriptions
///
/// Must be constructed inside a tokio runtime: device actors and the
/// loss-grace watcher are spawned tasks.
pub struct EngineContext {
    config: EngineConfig,
    broadcasts: BroadcastChannelManager,
    devices: DeviceConnectionManager,
    buffer: Arc<SensorStreamBuffer>,
    classifier: ActivityClassifier,
    annotations: AnnotationManager,
    counters: Arc<StreamCounters>,
}

impl EngineContext {
    /// Create a context with the default heuristic model
    pub fn new(config: EngineConfig, link: Arc<dyn DeviceLink>) -> Self {
        let model: Arc<dyn ActivityModel> =
            Arc::new(HeuristicModel::new(config.classifier.segment_us()));
        Self::with_model(config, link, model)
    }

    /// Create a context with an injected activity model
    ///
    /// The model seam is how new model versions ship without touching
    /// session logic.
    pub fn with_model(
        config: EngineConfig,
        link: Arc<dyn DeviceLink>,
        model: Arc<dyn ActivityModel>,
    ) -> Self {
        let broadcasts = BroadcastChannelManager::new();
        let device_events = broadcasts.init_device_events();
        broadcasts.init_inference();

        let devices =
            DeviceConnectionManager::new(link, config.connection.clone(), device_events.clone());
        let buffer = Arc::new(SensorStreamBuffer::new(
            config.buffer.retention_us(),
            config.buffer.max_samples_per_device,
        ));

        tokio::spawn(watch_device_loss(
            device_events.subscribe(),
            Arc::clone(&buffer),
            config.buffer.loss_grace(),
        ));

        let classifier = ActivityClassifier::new(model, config.classifier.clone());
        let annotations = AnnotationManager::new(config.annotation.clone());

        Self {
            config,
            broadcasts,
            devices,
            buffer,
            classifier,
            annotations,
            counters: Arc::new(StreamCounters::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // DEVICE LIFECYCLE
    // ========================================================================

    /// Register a device seen in a hardware scan
    pub fn discover_device(
        &self,
        device_id: &DeviceId,
        capabilities: Vec<Capability>,
    ) -> Result<(), ConnectionError> {
        self.devices.discover(device_id, capabilities)
    }

    /// Pair and connect a device, bounded by the configured timeout
    pub async fn connect(&self, device_id: &DeviceId) -> Result<(), ConnectionError> {
        self.devices.connect(device_id).await
    }

    /// Cancel an in-flight connect, restoring the prior state
    pub fn cancel_connect(&self, device_id: &DeviceId) -> Result<(), ConnectionError> {
        self.devices.cancel_connect(device_id)
    }

    /// Hardware event: an established link dropped
    pub fn on_link_lost(&self, device_id: &DeviceId) -> Result<(), ConnectionError> {
        self.devices.on_link_lost(device_id)
    }

    /// Unpair a device and release its resources; idempotent
    pub async fn unpair(&self, device_id: &DeviceId) -> Result<(), ConnectionError> {
        self.devices.unpair(device_id).await
    }

    pub fn device(&self, device_id: &DeviceId) -> Option<Device> {
        self.devices.device(device_id)
    }

    pub fn devices(&self) -> Vec<Device> {
        self.devices.devices()
    }

    // ========================================================================
    // INGESTION
    // ========================================================================

    /// Decode and buffer one raw payload from the hardware layer
    ///
    /// Per-sample failures never abort the stream: the frame is dropped,
    /// the matching counter incremented, and the error returned so the
    /// shell can surface diagnostics.
    pub fn ingest_payload(
        &self,
        device_id: &DeviceId,
        payload: &[u8],
    ) -> Result<(), StreamError> {
        ingest_frame(&self.buffer, &self.counters, device_id, payload)?;
        self.devices.mark_seen(device_id);
        Ok(())
    }

    /// Spawn a decode worker fed through a lock-free payload pool
    ///
    /// The returned handle's producer/consumer pair is handed to the
    /// hardware notification callback; the worker thread decodes filled
    /// payloads into the stream buffer and recycles them.
    pub fn spawn_ingest_worker(&self, device_id: DeviceId) -> IngestHandle {
        let channels = PayloadPool::new(
            self.config.buffer.payload_pool_size,
            self.config.buffer.payload_capacity,
        );
        let mut filled_consumer = channels.filled_consumer;
        let mut free_producer = channels.free_producer;

        let buffer = Arc::clone(&self.buffer);
        let counters = Arc::clone(&self.counters);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let worker = std::thread::spawn(move || loop {
            match filled_consumer.pop() {
                Ok(mut payload) => {
                    // Errors are counted inside; the stream must keep going
                    let _ = ingest_frame(&buffer, &counters, &device_id, &payload);
                    payload.clear();
                    let _ = free_producer.push(payload);
                }
                Err(_) => {
                    if stop_flag.load(Ordering::Relaxed) || filled_consumer.is_abandoned() {
                        break;
                    }
                    std::thread::sleep(Duration::from_micros(500));
                }
            }
        });

        IngestHandle {
            free_consumer: channels.free_consumer,
            filled_producer: channels.filled_producer,
            stop,
            worker: Some(worker),
        }
    }

    /// Snapshot samples for a device in `[start_us, end_us)`
    pub fn window(
        &self,
        device_id: &DeviceId,
        start_us: u64,
        end_us: u64,
    ) -> Result<SampleWindow, StreamError> {
        self.buffer.window(device_id, start_us, end_us)
    }

    pub fn buffered_samples(&self, device_id: &DeviceId) -> usize {
        self.buffer.len(device_id)
    }

    // ========================================================================
    // INFERENCE
    // ========================================================================

    pub fn model_version(&self) -> String {
        self.classifier.model_version()
    }

    /// Run inference over a buffered window
    ///
    /// Publishes an `InferenceUpdate` for UI subscribers and a telemetry
    /// event; returns the thresholded labels.
    pub fn infer_window(
        &self,
        device_id: &DeviceId,
        start_us: u64,
        end_us: u64,
    ) -> Result<Vec<ActivityLabel>, StreamError> {
        let window = self.buffer.window(device_id, start_us, end_us)?;
        let labels = self.classifier.infer(&window)?;
        self.publish_inference(device_id, None, &labels);
        Ok(labels)
    }

    /// Run inference over an already-snapshotted window
    ///
    /// Session windows are immutable, so classifying one stays
    /// deterministic even while ingestion continues for the device.
    pub fn classify(&self, window: &SampleWindow) -> Result<Vec<ActivityLabel>, StreamError> {
        self.classifier.infer(window)
    }

    // ========================================================================
    // ANNOTATION SESSIONS
    // ========================================================================

    /// Open a labeling session over the buffered interval
    pub fn open_session(
        &self,
        device_id: &DeviceId,
        start_us: u64,
        end_us: u64,
    ) -> Result<u64, AnnotationError> {
        let window = self
            .buffer
            .window(device_id, start_us, end_us)
            .map_err(|_| AnnotationError::StatePoisoned)?;
        self.annotations.open(device_id.clone(), window)
    }

    /// Apply inferred labels to a session; human labels keep precedence
    pub fn apply_inference_to_session(
        &self,
        session_id: u64,
        labels: &[ActivityLabel],
    ) -> Result<usize, AnnotationError> {
        let inserted =
            self.annotations
                .apply_inference(session_id, labels, &self.classifier.model_version())?;
        if let Ok(window) = self.annotations.session_window(session_id) {
            if let Some(device_id) = window.device_id() {
                self.publish_inference(device_id, Some(session_id), labels);
            }
        }
        Ok(inserted)
    }

    /// Apply a human correction from the label selector UI
    pub fn correct_session(
        &self,
        session_id: u64,
        label: ActivityLabel,
    ) -> Result<(), AnnotationError> {
        self.annotations.apply_correction(session_id, label)
    }

    /// Current labels of a session for rendering
    pub fn session_labels(&self, session_id: u64) -> Result<Vec<ActivityLabel>, AnnotationError> {
        self.annotations.session_labels(session_id)
    }

    /// Window snapshot a session was opened over
    pub fn session_window(&self, session_id: u64) -> Result<SampleWindow, AnnotationError> {
        self.annotations.session_window(session_id)
    }

    /// Export a session's training record without closing it
    pub fn export_session(&self, session_id: u64) -> Result<LabeledRecording, AnnotationError> {
        self.annotations.export(session_id)
    }

    /// Export and close a session
    pub fn finalize_session(&self, session_id: u64) -> Result<LabeledRecording, AnnotationError> {
        self.annotations.finalize(session_id)
    }

    /// Close a session without exporting
    pub fn discard_session(&self, session_id: u64) -> Result<(), AnnotationError> {
        self.annotations.discard(session_id)
    }

    // ========================================================================
    // DIAGNOSTICS AND SUBSCRIPTIONS
    // ========================================================================

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    pub fn subscribe_device_events(&self) -> Option<broadcast::Receiver<DeviceEvent>> {
        self.broadcasts.subscribe_device_events()
    }

    pub fn subscribe_inference(&self) -> Option<broadcast::Receiver<InferenceUpdate>> {
        self.broadcasts.subscribe_inference()
    }

    /// Device events as a futures `Stream`, lagged gaps skipped
    pub fn device_event_stream(&self) -> Option<impl Stream<Item = DeviceEvent>> {
        let receiver = self.broadcasts.subscribe_device_events()?;
        Some(BroadcastStream::new(receiver).filter_map(|event| async move { event.ok() }))
    }

    fn publish_inference(
        &self,
        device_id: &DeviceId,
        session_id: Option<u64>,
        labels: &[ActivityLabel],
    ) {
        self.broadcasts.publish_inference(InferenceUpdate {
            device_id: device_id.clone(),
            session_id,
            labels: labels.to_vec(),
            model_version: self.classifier.model_version(),
        });
        telemetry::hub().collector().publish(MetricEvent::Inference {
            device_id: device_id.clone(),
            model_version: self.classifier.model_version(),
            label_count: labels.len(),
            top_kind: labels.first().map(|l| l.kind),
        });
    }
}

/// Hardware-side handle of a spawned ingest worker
///
/// The notification callback pops an empty payload from `free_consumer`,
/// fills it, and pushes it to `filled_producer`. Dropping the handle (or
/// calling `stop`) shuts the worker down.
pub struct IngestHandle {
    pub free_consumer: rtrb::Consumer<crate::stream::RawPayload>,
    pub filled_producer: rtrb::Producer<crate::stream::RawPayload>,
    stop: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl IngestHandle {
    /// Signal the worker to drain and exit, then wait for it
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for IngestHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Decode one frame and push it into the buffer, counting failures
fn ingest_frame(
    buffer: &SensorStreamBuffer,
    counters: &StreamCounters,
    device_id: &DeviceId,
    payload: &[u8],
) -> Result<(), StreamError> {
    let sample = decode_payload(device_id, payload).inspect_err(|err| {
        counters.record_malformed();
        telemetry::hub().collector().publish(MetricEvent::SampleDropped {
            device_id: device_id.clone(),
            reason: DropReason::Malformed,
            detail: crate::error::ErrorCode::message(err),
        });
    })?;

    buffer.push(sample).inspect_err(|err| {
        counters.record_out_of_order();
        telemetry::hub().collector().publish(MetricEvent::SampleDropped {
            device_id: device_id.clone(),
            reason: DropReason::OutOfOrder,
            detail: crate::error::ErrorCode::message(err),
        });
    })?;

    counters.record_accepted();
    Ok(())
}

/// Retain a lost device's buffer for the grace period, then clear it
///
/// A reconnect inside the grace period cancels the pending clear; an
/// unpair clears immediately.
async fn watch_device_loss(
    mut events: broadcast::Receiver<DeviceEvent>,
    buffer: Arc<SensorStreamBuffer>,
    grace: Duration,
) {
    use std::collections::HashMap;

    let mut pending: HashMap<DeviceId, tokio::task::JoinHandle<()>> = HashMap::new();
    loop {
        match events.recv().await {
            Ok(DeviceEvent::DeviceLost { device_id }) => {
                let buffer = Arc::clone(&buffer);
                let id = device_id.clone();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    log::info!(
                        "[EngineContext] Loss grace expired for {}, clearing buffer",
                        id
                    );
                    buffer.clear_device(&id);
                });
                if let Some(previous) = pending.insert(device_id, handle) {
                    previous.abort();
                }
            }
            Ok(DeviceEvent::StateChanged { device_id, state }) => {
                telemetry::hub()
                    .collector()
                    .publish(MetricEvent::DeviceLifecycle {
                        device_id: device_id.clone(),
                        state,
                        timestamp_ms: wall_clock_ms(),
                    });
                match state {
                    ConnectionState::Connected => {
                        if let Some(handle) = pending.remove(&device_id) {
                            handle.abort();
                        }
                    }
                    ConnectionState::Unpaired => {
                        if let Some(handle) = pending.remove(&device_id) {
                            handle.abort();
                        }
                        buffer.remove_device(&device_id);
                    }
                    _ => {}
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!(
                    "[EngineContext] Loss watcher lagged, {} event(s) skipped",
                    skipped
                );
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::label::ActivityKind;
    use crate::codec::{encode_sample, SensorSample};
    use crate::device::ScriptedLink;

    fn device() -> DeviceId {
        DeviceId::new("D1")
    }

    fn context() -> EngineContext {
        let mut config = EngineConfig::default();
        config.classifier.min_window_samples = 4;
        EngineContext::new(config, Arc::new(ScriptedLink::new()))
    }

    fn payload(sequence: u32, timestamp_us: u64) -> Vec<u8> {
        encode_sample(&SensorSample::new(
            device(),
            timestamp_us,
            sequence,
            vec![0.0, 0.0, 1.0],
        ))
    }

    #[tokio::test]
    async fn test_ingest_and_window() {
        let context = context();
        for seq in 1..=5u32 {
            context
                .ingest_payload(&device(), &payload(seq, seq as u64 * 1_000))
                .unwrap();
        }
        assert_eq!(context.buffered_samples(&device()), 5);

        let window = context.window(&device(), 0, u64::MAX).unwrap();
        assert_eq!(window.len(), 5);
        assert_eq!(context.counters().accepted, 5);
    }

    #[tokio::test]
    async fn test_ingest_counts_malformed() {
        let context = context();
        let err = context.ingest_payload(&device(), &[0xFF, 0x01]).unwrap_err();
        assert!(matches!(err, StreamError::MalformedSample { .. }));
        assert_eq!(context.counters().malformed, 1);
        assert_eq!(context.counters().accepted, 0);
    }

    #[tokio::test]
    async fn test_ingest_counts_out_of_order() {
        let context = context();
        context.ingest_payload(&device(), &payload(5, 5_000)).unwrap();
        let err = context
            .ingest_payload(&device(), &payload(3, 6_000))
            .unwrap_err();
        assert!(matches!(err, StreamError::OutOfOrder { .. }));
        assert_eq!(context.counters().out_of_order, 1);
        assert_eq!(context.buffered_samples(&device()), 1);
    }

    #[tokio::test]
    async fn test_session_flow_with_correction() {
        let context = context();
        for seq in 1..=5u32 {
            context
                .ingest_payload(&device(), &payload(seq, seq as u64))
                .unwrap();
        }

        let session_id = context.open_session(&device(), 0, 10).unwrap();
        context
            .apply_inference_to_session(
                session_id,
                &[ActivityLabel::inferred(ActivityKind::Pass, 1, 3, 0.8)],
            )
            .unwrap();
        context
            .correct_session(session_id, ActivityLabel::corrected(ActivityKind::Shot, 2, 4))
            .unwrap();

        let recording = context.finalize_session(session_id).unwrap();
        let shape: Vec<(ActivityKind, u64, u64)> = recording
            .labels
            .iter()
            .map(|l| (l.kind, l.start_us, l.end_us))
            .collect();
        assert_eq!(
            shape,
            vec![(ActivityKind::Pass, 1, 2), (ActivityKind::Shot, 2, 4)]
        );
        assert_eq!(recording.samples.len(), 5);
    }

    #[tokio::test]
    async fn test_inference_update_published() {
        let context = context();
        let mut inference_rx = context.subscribe_inference().unwrap();
        for seq in 1..=5u32 {
            context
                .ingest_payload(&device(), &payload(seq, seq as u64))
                .unwrap();
        }
        let session_id = context.open_session(&device(), 0, 10).unwrap();
        context
            .apply_inference_to_session(
                session_id,
                &[ActivityLabel::inferred(ActivityKind::Pass, 1, 3, 0.8)],
            )
            .unwrap();

        let update = inference_rx.try_recv().unwrap();
        assert_eq!(update.session_id, Some(session_id));
        assert_eq!(update.device_id, device());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ingest_worker_decodes_pooled_payloads() {
        let context = context();
        let mut handle = context.spawn_ingest_worker(device());

        for seq in 1..=5u32 {
            let mut slot = handle
                .free_consumer
                .pop()
                .expect("pool should have free payloads");
            slot.extend_from_slice(&payload(seq, seq as u64 * 1_000));
            handle.filled_producer.push(slot).expect("push filled");
        }

        // Wait for the worker to drain the queue
        let mut waited = 0;
        while context.buffered_samples(&device()) < 5 && waited < 2_000 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 10;
        }
        assert_eq!(context.buffered_samples(&device()), 5);

        // Payloads were recycled back into the free queue
        let mut recycled = 0;
        while handle.free_consumer.pop().is_ok() {
            recycled += 1;
        }
        assert!(recycled > 0, "expected recycled payloads in the free queue");
    }

    #[tokio::test]
    async fn test_device_lifecycle_through_context() {
        let context = context();
        context
            .discover_device(&device(), vec![Capability::Motion])
            .unwrap();
        context.connect(&device()).await.unwrap();
        assert_eq!(
            context.device(&device()).unwrap().state,
            ConnectionState::Connected
        );

        context.unpair(&device()).await.unwrap();
        assert!(context.device(&device()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unpair_clears_buffer() {
        let context = context();
        context
            .discover_device(&device(), vec![Capability::Motion])
            .unwrap();
        context.connect(&device()).await.unwrap();
        context.ingest_payload(&device(), &payload(1, 1_000)).unwrap();
        assert_eq!(context.buffered_samples(&device()), 1);

        context.unpair(&device()).await.unwrap();
        // Let the loss watcher process the Unpaired event
        for _ in 0..10 {
            tokio::task::yield_now().await;
            if context.buffered_samples(&device()) == 0 {
                break;
            }
        }
        assert_eq!(context.buffered_samples(&device()), 0);
    }

    #[tokio::test]
    async fn test_infer_window_insufficient_data() {
        let context = context();
        context.ingest_payload(&device(), &payload(1, 1_000)).unwrap();

        let err = context.infer_window(&device(), 0, u64::MAX).unwrap_err();
        assert!(matches!(err, StreamError::InsufficientData { .. }));
    }
}
