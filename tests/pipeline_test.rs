//! Integration tests for the full engine pipeline
//!
//! These tests validate the end-to-end flows across the crate:
//! - ingest -> buffer -> classify -> annotate -> export
//! - ordering rejection with counter diagnostics
//! - human corrections taking precedence over inference
//! - reconnect backoff resolving to exactly one terminal outcome
//! - loss grace period retaining and then clearing a device's buffer

use std::sync::Arc;

use pitchlink::analysis::{ActivityModel, ScoredLabel};
use pitchlink::annotation::{ActivityKind, ActivityLabel};
use pitchlink::codec::{encode_sample, SensorSample};
use pitchlink::config::EngineConfig;
use pitchlink::context::EngineContext;
use pitchlink::device::{
    Capability, ConnectionState, DeviceEvent, DeviceId, LinkFault, LinkPlan, ScriptedLink,
};
use pitchlink::error::StreamError;
use pitchlink::stream::SampleWindow;

fn device() -> DeviceId {
    DeviceId::new("D1")
}

fn payload(sequence: u32, timestamp_us: u64) -> Vec<u8> {
    encode_sample(&SensorSample::new(
        device(),
        timestamp_us,
        sequence,
        vec![0.0, 0.0, 1.0],
    ))
}

/// Model scripted to a fixed answer: one pass over [1, 3)
struct PassModel;

impl ActivityModel for PassModel {
    fn version(&self) -> &str {
        "scripted-pass-v1"
    }

    fn infer(&self, _window: &SampleWindow) -> Vec<ScoredLabel> {
        vec![ScoredLabel {
            kind: ActivityKind::Pass,
            start_us: 1,
            end_us: 3,
            confidence: 0.8,
        }]
    }
}

fn scripted_context(link: Arc<ScriptedLink>) -> EngineContext {
    let mut config = EngineConfig::default();
    config.classifier.min_window_samples = 4;
    config.classifier.confidence_threshold = 0.5;
    config.connection.connect_timeout_ms = 1_000;
    config.connection.reconnect_base_delay_ms = 10;
    config.connection.reconnect_max_delay_ms = 40;
    config.connection.reconnect_max_attempts = 3;
    config.connection.reconnect_jitter_pct = 0.0;
    config.buffer.loss_grace_ms = 100;
    EngineContext::with_model(config, link, Arc::new(PassModel))
}

/// Scenario: five samples, inferred pass, export carries both
#[tokio::test]
async fn test_inference_export_scenario() {
    let context = scripted_context(Arc::new(ScriptedLink::new()));

    // Push 5 samples for device "D1" with sequence numbers 1-5 in [0, 5]
    for seq in 1..=5u32 {
        context
            .ingest_payload(&device(), &payload(seq, seq as u64))
            .unwrap();
    }

    let session_id = context.open_session(&device(), 0, 6).unwrap();
    let window = context.session_window(session_id).unwrap();
    let labels = context.classify(&window).unwrap();
    assert_eq!(labels.len(), 1);
    assert_eq!(labels[0].kind, ActivityKind::Pass);
    assert!((labels[0].confidence - 0.8).abs() < 1e-6);

    context
        .apply_inference_to_session(session_id, &labels)
        .unwrap();
    let recording = context.export_session(session_id).unwrap();

    assert_eq!(recording.samples.len(), 5);
    assert_eq!(recording.labels.len(), 1);
    assert_eq!(
        (recording.labels[0].start_us, recording.labels[0].end_us),
        (1, 3)
    );
    assert_eq!(recording.model_version.as_deref(), Some("scripted-pass-v1"));
}

/// Scenario: correction {shot, [2, 4)} truncates the pass label
#[tokio::test]
async fn test_correction_truncates_inferred_label() {
    let context = scripted_context(Arc::new(ScriptedLink::new()));
    for seq in 1..=5u32 {
        context
            .ingest_payload(&device(), &payload(seq, seq as u64))
            .unwrap();
    }

    let session_id = context.open_session(&device(), 0, 6).unwrap();
    let window = context.session_window(session_id).unwrap();
    let labels = context.classify(&window).unwrap();
    context
        .apply_inference_to_session(session_id, &labels)
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
    // Pass truncated, not deleted
    assert_eq!(
        shape,
        vec![(ActivityKind::Pass, 1, 2), (ActivityKind::Shot, 2, 4)]
    );
}

/// Scenario: stale sequence is rejected, buffer unchanged, counter bumped
#[tokio::test]
async fn test_out_of_order_drop_with_counter() {
    let context = scripted_context(Arc::new(ScriptedLink::new()));
    for seq in 1..=5u32 {
        context
            .ingest_payload(&device(), &payload(seq, seq as u64))
            .unwrap();
    }
    let before = context.counters();

    let err = context.ingest_payload(&device(), &payload(3, 6)).unwrap_err();
    match err {
        StreamError::OutOfOrder {
            sequence,
            last_sequence,
            ..
        } => {
            assert_eq!(sequence, 3);
            assert_eq!(last_sequence, 5);
        }
        other => panic!("Expected OutOfOrder, got {:?}", other),
    }

    let after = context.counters();
    assert_eq!(after.out_of_order, before.out_of_order + 1);
    assert_eq!(context.buffered_samples(&device()), 5);
}

/// Reconnection resolves to exactly one of Connected or Disconnected
#[tokio::test(start_paused = true)]
async fn test_reconnect_terminal_outcomes() {
    // Outcome 1: transient faults, then recovery
    let link = Arc::new(ScriptedLink::new());
    let context = scripted_context(Arc::clone(&link));
    context
        .discover_device(&device(), vec![Capability::Motion])
        .unwrap();
    context.connect(&device()).await.unwrap();
    let mut events = context.subscribe_device_events().unwrap();

    link.plan(
        &device(),
        LinkPlan::Fault {
            fault: LinkFault::OutOfRange,
            delay_ms: 0,
        },
    );
    link.plan(&device(), LinkPlan::Success { delay_ms: 0 });
    context.on_link_lost(&device()).unwrap();

    let outcome = wait_for_terminal(&mut events).await;
    assert_eq!(outcome, Terminal::Connected);

    // Outcome 2: budget exhausted, device lost
    for _ in 0..3 {
        link.plan(
            &device(),
            LinkPlan::Fault {
                fault: LinkFault::OutOfRange,
                delay_ms: 0,
            },
        );
    }
    context.on_link_lost(&device()).unwrap();
    let outcome = wait_for_terminal(&mut events).await;
    assert_eq!(outcome, Terminal::Lost);
    assert_eq!(
        context.device(&device()).unwrap().state,
        ConnectionState::Disconnected
    );
}

#[derive(Debug, PartialEq)]
enum Terminal {
    Connected,
    Lost,
}

async fn wait_for_terminal(
    events: &mut tokio::sync::broadcast::Receiver<DeviceEvent>,
) -> Terminal {
    loop {
        match events.recv().await.expect("event channel closed") {
            DeviceEvent::StateChanged {
                state: ConnectionState::Connected,
                ..
            } => return Terminal::Connected,
            DeviceEvent::DeviceLost { .. } => return Terminal::Lost,
            _ => continue,
        }
    }
}

/// DeviceLost keeps the buffer for the grace period, then clears it
#[tokio::test(start_paused = true)]
async fn test_loss_grace_period_clears_buffer() {
    let link = Arc::new(ScriptedLink::new());
    let context = scripted_context(Arc::clone(&link));
    context
        .discover_device(&device(), vec![Capability::Motion])
        .unwrap();
    context.connect(&device()).await.unwrap();

    for seq in 1..=5u32 {
        context
            .ingest_payload(&device(), &payload(seq, seq as u64))
            .unwrap();
    }

    // Exhaust the reconnect budget
    for _ in 0..3 {
        link.plan(
            &device(),
            LinkPlan::Fault {
                fault: LinkFault::OutOfRange,
                delay_ms: 0,
            },
        );
    }
    let mut events = context.subscribe_device_events().unwrap();
    context.on_link_lost(&device()).unwrap();
    assert_eq!(wait_for_terminal(&mut events).await, Terminal::Lost);

    // Still buffered right after the loss (grace period active)
    assert_eq!(context.buffered_samples(&device()), 5);

    // Past the grace period the buffer is cleared
    let mut waited_ms = 0;
    while context.buffered_samples(&device()) > 0 && waited_ms < 5_000 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        waited_ms += 50;
    }
    assert_eq!(context.buffered_samples(&device()), 0);
}

/// Unlabeled gaps survive the whole pipeline
#[tokio::test]
async fn test_gaps_are_preserved_through_export() {
    let context = scripted_context(Arc::new(ScriptedLink::new()));
    for seq in 1..=5u32 {
        context
            .ingest_payload(&device(), &payload(seq, seq as u64))
            .unwrap();
    }

    let session_id = context.open_session(&device(), 0, 6).unwrap();
    context
        .apply_inference_to_session(
            session_id,
            &[ActivityLabel::inferred(ActivityKind::Pass, 1, 2, 0.9)],
        )
        .unwrap();
    context
        .correct_session(session_id, ActivityLabel::corrected(ActivityKind::Shot, 4, 5))
        .unwrap();

    let recording = context.export_session(session_id).unwrap();
    assert_eq!(recording.labels.len(), 2);
    // [2, 4) stays unlabeled
    assert_eq!(recording.labels[0].end_us, 2);
    assert_eq!(recording.labels[1].start_us, 4);
}

/// Inference twice over the same window yields identical labels
#[tokio::test]
async fn test_inference_is_deterministic_end_to_end() {
    let context = scripted_context(Arc::new(ScriptedLink::new()));
    for seq in 1..=8u32 {
        context
            .ingest_payload(&device(), &payload(seq, seq as u64 * 20_000))
            .unwrap();
    }

    let first = context.infer_window(&device(), 0, u64::MAX).unwrap();
    let second = context.infer_window(&device(), 0, u64::MAX).unwrap();
    assert_eq!(first, second);
}

/// Malformed frames are counted and never abort the stream
#[tokio::test]
async fn test_malformed_frames_do_not_break_stream() {
    let context = scripted_context(Arc::new(ScriptedLink::new()));

    context.ingest_payload(&device(), &payload(1, 1)).unwrap();
    assert!(context.ingest_payload(&device(), &[0x02, 0x00]).is_err());
    context.ingest_payload(&device(), &payload(2, 2)).unwrap();

    let counters = context.counters();
    assert_eq!(counters.accepted, 2);
    assert_eq!(counters.malformed, 1);
    assert_eq!(context.buffered_samples(&device()), 2);
}
