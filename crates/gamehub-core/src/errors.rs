//! Inbound frame decoding errors.

use thiserror::Error;

/// Reasons an inbound frame is rejected before it becomes a [`GameEvent`].
///
/// [`GameEvent`]: crate::event::GameEvent
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame is JSON but not an object.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
    /// The object has no string `type` field.
    #[error("missing or non-string `type` field")]
    MissingType,
    /// A binary frame did not contain UTF-8 text.
    #[error("binary frame is not valid UTF-8")]
    NotUtf8,
}
