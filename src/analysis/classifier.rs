// Activity classifier - replaceable model behind a threshold gate
//
// The model is an injected capability, not a fixed algorithm: anything
// implementing `ActivityModel` can propose scored intervals for a window.
// The classifier wrapper owns the contract the rest of the engine relies
// on: a minimum-window gate, confidence thresholding (low-confidence
// sub-intervals become unlabeled gaps, not guesses), and non-overlapping
// output ordered by start time.

use std::sync::Arc;

use crate::annotation::label::{ActivityKind, ActivityLabel};
use crate::config::ClassifierConfig;
use crate::error::StreamError;
use crate::stream::SampleWindow;

/// One scored interval proposed by a model
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredLabel {
    pub kind: ActivityKind,
    pub start_us: u64,
    pub end_us: u64,
    pub confidence: f32,
}

/// Replaceable inference strategy
///
/// Implementations must be deterministic for a given window and version:
/// the training pipeline depends on re-running inference yielding identical
/// labels.
pub trait ActivityModel: Send + Sync {
    /// Model identity recorded in exported training data
    fn version(&self) -> &str;

    /// Propose scored intervals for the window
    fn infer(&self, window: &SampleWindow) -> Vec<ScoredLabel>;
}

/// Threshold-gating wrapper around the injected model
pub struct ActivityClassifier {
    model: Arc<dyn ActivityModel>,
    config: ClassifierConfig,
}

impl ActivityClassifier {
    pub fn new(model: Arc<dyn ActivityModel>, config: ClassifierConfig) -> Self {
        Self { model, config }
    }

    pub fn model_version(&self) -> String {
        self.model.version().to_string()
    }

    /// Run inference over a window snapshot
    ///
    /// Read-only and side-effect free; safe to run concurrently with
    /// ingestion because the window is an immutable copy.
    ///
    /// # Errors
    /// `StreamError::InsufficientData` when the window holds fewer samples
    /// than the configured minimum. The caller should wait for more
    /// samples rather than retry immediately.
    pub fn infer(&self, window: &SampleWindow) -> Result<Vec<ActivityLabel>, StreamError> {
        if window.len() < self.config.min_window_samples {
            return Err(StreamError::InsufficientData {
                device_id: window.device_id().cloned(),
                got: window.len(),
                needed: self.config.min_window_samples,
            });
        }

        let mut proposals = self.model.infer(window);
        proposals.sort_by_key(|label| (label.start_us, label.end_us));

        let mut labels = Vec::with_capacity(proposals.len());
        let mut last_end = 0u64;
        for proposal in proposals {
            if proposal.end_us <= proposal.start_us {
                log::warn!(
                    "[ActivityClassifier] Model {} proposed empty interval [{}, {}), dropped",
                    self.model.version(),
                    proposal.start_us,
                    proposal.end_us
                );
                continue;
            }
            if proposal.start_us < last_end {
                log::warn!(
                    "[ActivityClassifier] Model {} proposed overlapping interval at {}, dropped",
                    self.model.version(),
                    proposal.start_us
                );
                continue;
            }
            let confidence = proposal.confidence.clamp(0.0, 1.0);
            if confidence < self.config.confidence_threshold {
                // Unlabeled gap, not a low-confidence guess
                continue;
            }
            last_end = proposal.end_us;
            labels.push(ActivityLabel::inferred(
                proposal.kind,
                proposal.start_us,
                proposal.end_us,
                confidence,
            ));
        }
        Ok(labels)
    }
}
