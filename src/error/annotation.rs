// Annotation session error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Annotation error code constants shared with the UI layer
///
/// Error code range: 3001-3005
pub struct AnnotationErrorCodes {}

impl AnnotationErrorCodes {
    /// Session has zero labels; nothing to export
    pub const INCOMPLETE_SESSION: i32 = 3001;

    /// Session id does not refer to an open session
    pub const UNKNOWN_SESSION: i32 = 3002;

    /// Correction interval is empty or inverted
    pub const INVALID_INTERVAL: i32 = 3003;

    /// Too many sessions are already open
    pub const SESSION_LIMIT: i32 = 3004;

    /// Session registry lock was poisoned
    pub const STATE_POISONED: i32 = 3005;
}

/// Log an annotation error with structured context
pub fn log_annotation_error(err: &AnnotationError, context: &str) {
    error!(
        "Annotation error in {}: code={}, component=AnnotationSession, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Annotation-session errors
///
/// `IncompleteSession` is the only user-facing export blocker; the rest are
/// programming or lifecycle errors surfaced to the shell for diagnostics.
///
/// Error code range: 3001-3005
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationError {
    /// Session has zero labels; nothing to export
    IncompleteSession { session_id: u64 },

    /// Session id does not refer to an open session
    UnknownSession { session_id: u64 },

    /// Correction interval is empty or inverted
    InvalidInterval { start_us: u64, end_us: u64 },

    /// Too many sessions are already open
    SessionLimit { max: usize },

    /// Session registry lock was poisoned
    StatePoisoned,
}

impl ErrorCode for AnnotationError {
    fn code(&self) -> i32 {
        match self {
            AnnotationError::IncompleteSession { .. } => AnnotationErrorCodes::INCOMPLETE_SESSION,
            AnnotationError::UnknownSession { .. } => AnnotationErrorCodes::UNKNOWN_SESSION,
            AnnotationError::InvalidInterval { .. } => AnnotationErrorCodes::INVALID_INTERVAL,
            AnnotationError::SessionLimit { .. } => AnnotationErrorCodes::SESSION_LIMIT,
            AnnotationError::StatePoisoned => AnnotationErrorCodes::STATE_POISONED,
        }
    }

    fn message(&self) -> String {
        match self {
            AnnotationError::IncompleteSession { session_id } => {
                format!("Session {} has no labels to export", session_id)
            }
            AnnotationError::UnknownSession { session_id } => {
                format!("Session {} is not open", session_id)
            }
            AnnotationError::InvalidInterval { start_us, end_us } => {
                format!(
                    "Label interval [{}, {}) is empty or inverted",
                    start_us, end_us
                )
            }
            AnnotationError::SessionLimit { max } => {
                format!("Cannot open session: {} sessions already open", max)
            }
            AnnotationError::StatePoisoned => "Annotation session lock poisoned".to_string(),
        }
    }
}

impl fmt::Display for AnnotationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AnnotationError (code {}): {}",
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AnnotationError {}
