//! Error types for payload decoding and record encoding.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding an inbound payload into a [`Record`].
///
/// [`Record`]: crate::Record
#[derive(Error, Debug)]
pub enum Error {
    /// Payload is valid JSON but not a JSON object.
    #[error("payload is not a JSON object")]
    NotAnObject,

    /// A required top-level key is absent.
    #[error("missing required key '{field}'")]
    MissingField {
        /// The name of the missing key.
        field: &'static str,
    },

    /// A key is present but has the wrong shape.
    #[error("invalid key '{field}': {reason}")]
    InvalidField {
        /// The name of the invalid key.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
