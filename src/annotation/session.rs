// AnnotationSession - reconciling inference with human corrections
//
// A session overlays an ordered, non-overlapping label sequence on a fixed
// window of samples. Two mutation paths exist:
//
// - `apply_inference` inserts model labels only into uncovered gaps. An
//   existing label, human or inferred, is never displaced by inference.
// - `apply_correction` is the opposite: the human label wins everywhere it
//   overlaps, truncating or splitting existing labels at its boundaries.
//
// Gaps are valid and mean "unlabeled"; the union of label intervals need
// not cover the window.

use serde::{Deserialize, Serialize};

use crate::annotation::label::{ActivityLabel, LabelSource};
use crate::codec::SensorSample;
use crate::device::DeviceId;
use crate::error::AnnotationError;
use crate::stream::SampleWindow;

/// Exported training record: the sample window plus its label sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledRecording {
    pub session_id: u64,
    pub device_id: DeviceId,
    /// Version of the model whose inferences seeded the session, if any
    pub model_version: Option<String>,
    pub samples: Vec<SensorSample>,
    pub labels: Vec<ActivityLabel>,
}

/// One labeling task over a bounded sample window
pub struct AnnotationSession {
    id: u64,
    device_id: DeviceId,
    window: SampleWindow,
    /// Sorted by start, pairwise non-overlapping
    labels: Vec<ActivityLabel>,
    model_version: Option<String>,
}

impl AnnotationSession {
    pub fn new(id: u64, device_id: DeviceId, window: SampleWindow) -> Self {
        Self {
            id,
            device_id,
            window,
            labels: Vec::new(),
            model_version: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn window(&self) -> &SampleWindow {
        &self.window
    }

    /// Current label sequence, sorted by start time
    pub fn labels(&self) -> &[ActivityLabel] {
        &self.labels
    }

    /// Insert inferred labels into uncovered gaps
    ///
    /// Incoming intervals are clipped against every existing label, so a
    /// human correction (or an earlier inference) is never overwritten.
    /// Re-applying the same inference is a no-op.
    ///
    /// # Returns
    /// Number of label fragments actually inserted
    pub fn apply_inference(&mut self, labels: &[ActivityLabel], model_version: &str) -> usize {
        self.model_version = Some(model_version.to_string());

        let mut inserted = 0;
        for incoming in labels {
            if incoming.is_empty() {
                continue;
            }
            for (start_us, end_us) in self.uncovered_gaps(incoming.start_us, incoming.end_us) {
                self.insert_sorted(ActivityLabel {
                    kind: incoming.kind,
                    start_us,
                    end_us,
                    source: LabelSource::Inferred,
                    confidence: incoming.confidence,
                });
                inserted += 1;
            }
        }
        if inserted > 0 {
            log::debug!(
                "[AnnotationSession] Session {}: {} inferred label(s) applied",
                self.id,
                inserted
            );
        }
        inserted
    }

    /// Apply a human correction, splitting overlapped labels at its bounds
    ///
    /// Overlap with existing labels is the expected correction mechanism:
    /// every overlapped label is truncated to the parts outside the
    /// correction, and dropped entirely when nothing remains.
    ///
    /// # Errors
    /// `AnnotationError::InvalidInterval` when the interval is empty or
    /// inverted.
    pub fn apply_correction(&mut self, label: ActivityLabel) -> Result<(), AnnotationError> {
        if label.is_empty() {
            return Err(AnnotationError::InvalidInterval {
                start_us: label.start_us,
                end_us: label.end_us,
            });
        }
        let corrected = ActivityLabel {
            source: LabelSource::HumanCorrected,
            confidence: 1.0,
            ..label
        };

        let mut rebuilt = Vec::with_capacity(self.labels.len() + 2);
        for existing in self.labels.drain(..) {
            if !existing.overlaps(&corrected) {
                rebuilt.push(existing);
                continue;
            }
            // Keep the parts on either side of the correction
            if let Some(left) = existing.clipped_to(0, corrected.start_us) {
                rebuilt.push(left);
            }
            if let Some(right) = existing.clipped_to(corrected.end_us, u64::MAX) {
                rebuilt.push(right);
            }
        }
        rebuilt.push(corrected);
        rebuilt.sort_by_key(|l| l.start_us);
        self.labels = rebuilt;
        Ok(())
    }

    /// Produce the final training record
    ///
    /// # Errors
    /// `AnnotationError::IncompleteSession` when the session has no labels.
    pub fn export(&self) -> Result<LabeledRecording, AnnotationError> {
        if self.labels.is_empty() {
            return Err(AnnotationError::IncompleteSession { session_id: self.id });
        }
        Ok(LabeledRecording {
            session_id: self.id,
            device_id: self.device_id.clone(),
            model_version: self.model_version.clone(),
            samples: self.window.samples().to_vec(),
            labels: self.labels.clone(),
        })
    }

    /// Sub-intervals of `[start_us, end_us)` not covered by any label
    fn uncovered_gaps(&self, start_us: u64, end_us: u64) -> Vec<(u64, u64)> {
        let mut gaps = Vec::new();
        let mut cursor = start_us;
        for existing in &self.labels {
            if existing.end_us <= cursor {
                continue;
            }
            if existing.start_us >= end_us {
                break;
            }
            if existing.start_us > cursor {
                gaps.push((cursor, existing.start_us.min(end_us)));
            }
            cursor = cursor.max(existing.end_us);
            if cursor >= end_us {
                break;
            }
        }
        if cursor < end_us {
            gaps.push((cursor, end_us));
        }
        gaps
    }

    fn insert_sorted(&mut self, label: ActivityLabel) {
        let position = self
            .labels
            .partition_point(|existing| existing.start_us <= label.start_us);
        self.labels.insert(position, label);
    }
}
