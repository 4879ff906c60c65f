//! Error types for model runtime operations.

use thiserror::Error;

/// Errors that can occur while talking to the model runtime.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The session has not been initialized, or was disposed.
    #[error("Inference session is not initialized")]
    NotInitialized,

    /// The model file is missing or empty.
    #[error("Model not installed at {0}")]
    ModelNotInstalled(String),

    /// More images than the session accepts.
    #[error("Too many images: {given} given, at most {max} allowed")]
    TooManyImages { given: usize, max: usize },

    /// Runtime is not reachable.
    #[error("Model server not running at {0}")]
    ServerNotRunning(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Runtime returned an error response.
    #[error("API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error while reading the stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generation stopped without a final event.
    #[error("Output stream ended before generation finished")]
    StreamEnded,
}
