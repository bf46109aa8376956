// Heuristic rule-based activity model
//
// Decision tree over motion features, applied per segment of the window:
//
// 1. IF mean_jerk < t_rest_jerk THEN NoPossession
// 2. ELSE IF peak >= t_shot_peak THEN Shot
// 3. ELSE IF dominant_hz inside the dribble band AND zcr >= t_dribble_zcr
//    THEN Dribble
// 4. ELSE IF peak >= t_pass_peak THEN Pass
// 5. ELSE Touch
//
// Confidence is the winning class score divided by the sum of all class
// scores. Adjacent segments that classify the same merge into one
// interval, so a four-second dribble is one label, not four.

use crate::analysis::classifier::{ActivityModel, ScoredLabel};
use crate::analysis::features::{FeatureExtractor, MotionFeatures};
use crate::annotation::label::ActivityKind;
use crate::codec::SensorSample;
use crate::stream::SampleWindow;

/// Feature thresholds driving the decision tree
///
/// Acceleration is in g; jerk thresholds are g per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicThresholds {
    /// Below this mean jerk the player is not engaged with the ball
    pub t_rest_jerk: f32,
    /// Peak magnitude at or above this is a shot
    pub t_shot_peak: f32,
    /// Peak magnitude at or above this (but below shot) is a pass
    pub t_pass_peak: f32,
    /// Dribble cadence band, Hz
    pub t_dribble_min_hz: f32,
    pub t_dribble_max_hz: f32,
    /// Minimum zero-cross rate for the periodic dribble pattern
    pub t_dribble_zcr: f32,
}

impl Default for HeuristicThresholds {
    fn default() -> Self {
        Self {
            t_rest_jerk: 2.0,
            t_shot_peak: 6.0,
            t_pass_peak: 3.0,
            t_dribble_min_hz: 1.5,
            t_dribble_max_hz: 4.5,
            t_dribble_zcr: 0.2,
        }
    }
}

/// Fewest samples a segment needs before it is scored at all
const MIN_SEGMENT_SAMPLES: usize = 4;

/// Decision-rule model shipped with the engine
pub struct HeuristicModel {
    thresholds: HeuristicThresholds,
    segment_us: u64,
    extractor: FeatureExtractor,
}

impl HeuristicModel {
    /// # Arguments
    /// * `segment_us` - Length of the sub-windows scored independently
    pub fn new(segment_us: u64) -> Self {
        Self::with_thresholds(segment_us, HeuristicThresholds::default())
    }

    pub fn with_thresholds(segment_us: u64, thresholds: HeuristicThresholds) -> Self {
        Self {
            thresholds,
            segment_us: segment_us.max(1),
            extractor: FeatureExtractor::new(),
        }
    }

    /// Classify one segment's features
    ///
    /// # Returns
    /// Tuple of (activity kind, confidence score 0.0-1.0)
    pub fn classify_segment(&self, features: &MotionFeatures) -> (ActivityKind, f32) {
        let kind = self.apply_decision_rules(features);
        let confidence = self.calculate_confidence(features, kind);
        (kind, confidence)
    }

    fn apply_decision_rules(&self, features: &MotionFeatures) -> ActivityKind {
        let t = &self.thresholds;
        if features.mean_jerk < t.t_rest_jerk {
            ActivityKind::NoPossession
        } else if features.peak >= t.t_shot_peak {
            ActivityKind::Shot
        } else if features.dominant_hz >= t.t_dribble_min_hz
            && features.dominant_hz <= t.t_dribble_max_hz
            && features.zcr >= t.t_dribble_zcr
        {
            ActivityKind::Dribble
        } else if features.peak >= t.t_pass_peak {
            ActivityKind::Pass
        } else {
            ActivityKind::Touch
        }
    }

    fn calculate_confidence(&self, features: &MotionFeatures, kind: ActivityKind) -> f32 {
        let scores = [
            self.pass_score(features),
            self.shot_score(features),
            self.dribble_score(features),
            self.touch_score(features),
            self.rest_score(features),
        ];
        let winning = scores[kind.index()];
        let sum: f32 = scores.iter().sum();
        if sum > 0.0 {
            (winning / sum).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Rest score is highest at zero jerk, fading out at twice the gate
    fn rest_score(&self, features: &MotionFeatures) -> f32 {
        (2.0 - features.mean_jerk / self.thresholds.t_rest_jerk).max(0.0)
    }

    /// Shot score grows with peak beyond half the shot gate
    fn shot_score(&self, features: &MotionFeatures) -> f32 {
        ((features.peak / self.thresholds.t_shot_peak - 0.5) * 2.0).max(0.0)
    }

    /// Dribble score combines cadence-band proximity with zero-cross rate
    fn dribble_score(&self, features: &MotionFeatures) -> f32 {
        let t = &self.thresholds;
        let center = (t.t_dribble_min_hz + t.t_dribble_max_hz) / 2.0;
        let halfwidth = (t.t_dribble_max_hz - t.t_dribble_min_hz) / 2.0;
        let band = (1.0 - (features.dominant_hz - center).abs() / halfwidth).max(0.0);
        let periodicity = (features.zcr / t.t_dribble_zcr).min(2.0);
        band * periodicity * 2.0
    }

    /// Pass score peaks midway between the pass and shot gates
    fn pass_score(&self, features: &MotionFeatures) -> f32 {
        let t = &self.thresholds;
        let center = (t.t_pass_peak + t.t_shot_peak) / 2.0;
        let halfwidth = t.t_shot_peak - t.t_pass_peak;
        (1.0 - (features.peak - center).abs() / halfwidth).max(0.0) * 1.5
    }

    /// Touch score peaks below the pass gate
    fn touch_score(&self, features: &MotionFeatures) -> f32 {
        let center = self.thresholds.t_pass_peak * 0.6;
        let halfwidth = self.thresholds.t_pass_peak * 0.6;
        (1.0 - (features.peak - center).abs() / halfwidth).max(0.0)
    }

    /// Split the window into nominal segments of `segment_us`
    fn segments<'a>(&self, window: &'a SampleWindow) -> Vec<(u64, u64, Vec<&'a SensorSample>)> {
        let Some(start) = window.start_us() else {
            return Vec::new();
        };
        let Some(end) = window.end_us() else {
            return Vec::new();
        };

        let mut segments = Vec::new();
        let mut segment_start = start;
        while segment_start <= end {
            let segment_end = segment_start.saturating_add(self.segment_us);
            let samples: Vec<&SensorSample> = window
                .iter()
                .filter(|s| s.timestamp_us >= segment_start && s.timestamp_us < segment_end)
                .collect();
            segments.push((segment_start, segment_end, samples));
            segment_start = segment_end;
        }
        segments
    }
}

impl ActivityModel for HeuristicModel {
    fn version(&self) -> &str {
        "heuristic-v1"
    }

    fn infer(&self, window: &SampleWindow) -> Vec<ScoredLabel> {
        let mut labels: Vec<ScoredLabel> = Vec::new();

        for (start_us, end_us, samples) in self.segments(window) {
            if samples.len() < MIN_SEGMENT_SAMPLES {
                // Sparse segment stays an unlabeled gap
                continue;
            }
            let owned: Vec<SensorSample> = samples.into_iter().cloned().collect();
            let features = self.extractor.extract(&owned);
            let (kind, confidence) = self.classify_segment(&features);

            // Merge with the previous label when contiguous and same-kind
            if let Some(last) = labels.last_mut() {
                if last.kind == kind && last.end_us == start_us {
                    last.end_us = end_us;
                    last.confidence = last.confidence.max(confidence);
                    continue;
                }
            }
            labels.push(ScoredLabel {
                kind,
                start_us,
                end_us,
                confidence,
            });
        }
        labels
    }
}
