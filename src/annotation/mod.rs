// Annotation: activity labels over a sample window
//
// `label` holds the closed activity vocabulary and interval arithmetic;
// `session` reconciles classifier output with human corrections into an
// exportable labeled recording.

pub mod label;
pub mod session;

pub use label::{ActivityKind, ActivityLabel, LabelSource};
pub use session::{AnnotationSession, LabeledRecording};
