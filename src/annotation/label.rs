// Activity labels over the sample timeline
//
// A label covers a half-open interval [start_us, end_us) and carries its
// provenance: inferred by a model or corrected by a human. The closed
// activity vocabulary is fixed; training data written with one vocabulary
// stays comparable across model versions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of activities the engine recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Pass,
    Shot,
    Dribble,
    Touch,
    NoPossession,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 5] = [
        ActivityKind::Pass,
        ActivityKind::Shot,
        ActivityKind::Dribble,
        ActivityKind::Touch,
        ActivityKind::NoPossession,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            ActivityKind::Pass => "pass",
            ActivityKind::Shot => "shot",
            ActivityKind::Dribble => "dribble",
            ActivityKind::Touch => "touch",
            ActivityKind::NoPossession => "no_possession",
        }
    }

    /// Stable index into per-kind score arrays
    pub fn index(&self) -> usize {
        match self {
            ActivityKind::Pass => 0,
            ActivityKind::Shot => 1,
            ActivityKind::Dribble => 2,
            ActivityKind::Touch => 3,
            ActivityKind::NoPossession => 4,
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Who produced a label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelSource {
    /// Emitted by the activity model
    Inferred,
    /// Supplied or edited by the annotating user
    HumanCorrected,
}

/// One labeled interval on a device's sample timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLabel {
    pub kind: ActivityKind,
    /// Interval start, microseconds, inclusive
    pub start_us: u64,
    /// Interval end, microseconds, exclusive
    pub end_us: u64,
    pub source: LabelSource,
    /// Model confidence in [0, 1]; human corrections carry 1.0
    pub confidence: f32,
}

impl ActivityLabel {
    pub fn inferred(kind: ActivityKind, start_us: u64, end_us: u64, confidence: f32) -> Self {
        Self {
            kind,
            start_us,
            end_us,
            source: LabelSource::Inferred,
            confidence,
        }
    }

    pub fn corrected(kind: ActivityKind, start_us: u64, end_us: u64) -> Self {
        Self {
            kind,
            start_us,
            end_us,
            source: LabelSource::HumanCorrected,
            confidence: 1.0,
        }
    }

    pub fn is_inferred(&self) -> bool {
        self.source == LabelSource::Inferred
    }

    pub fn is_human(&self) -> bool {
        self.source == LabelSource::HumanCorrected
    }

    pub fn duration_us(&self) -> u64 {
        self.end_us.saturating_sub(self.start_us)
    }

    pub fn is_empty(&self) -> bool {
        self.end_us <= self.start_us
    }

    /// Half-open interval overlap
    pub fn overlaps(&self, other: &ActivityLabel) -> bool {
        self.start_us < other.end_us && other.start_us < self.end_us
    }

    /// The part of this label inside `[start_us, end_us)`, if non-empty
    pub fn clipped_to(&self, start_us: u64, end_us: u64) -> Option<ActivityLabel> {
        let clipped_start = self.start_us.max(start_us);
        let clipped_end = self.end_us.min(end_us);
        if clipped_start >= clipped_end {
            return None;
        }
        let mut label = self.clone();
        label.start_us = clipped_start;
        label.end_us = clipped_end;
        Some(label)
    }
}
