// Error types for the pitchlink engine
//
// This module defines custom error types for device connectivity, sensor
// stream handling, and annotation sessions, providing structured error
// handling with error codes suitable for surfacing to the UI layer.

mod annotation;
mod connection;
mod stream;

pub use annotation::{log_annotation_error, AnnotationError, AnnotationErrorCodes};
pub use connection::{log_connection_error, ConnectionError, ConnectionErrorCodes};
pub use stream::{log_stream_error, StreamError, StreamErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling at the
/// boundary to the mobile shell.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
