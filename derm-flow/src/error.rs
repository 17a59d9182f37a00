use std::path::PathBuf;

use thiserror::Error;

/// Failure to construct the classifier from its model artifact.
///
/// Cached for the lifetime of the process when startup loading fails, so it
/// is `Clone` and carries only owned strings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelLoadError {
    #[error("model file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to load model: {0}")]
    Runtime(String),

    #[error("model input shape {actual:?} does not match expected {expected:?}")]
    InputShape { expected: Vec<i64>, actual: Vec<i64> },

    #[error("model declares {actual} output classes, expected {expected}")]
    OutputShape { expected: usize, actual: i64 },
}

/// Failure while turning uploaded bytes into a prediction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("could not decode image: {0}")]
    Decode(String),

    #[error("inference failed: {0}")]
    Backend(String),

    #[error("model returned {actual} scores, expected {expected}")]
    OutputLength { expected: usize, actual: usize },

    #[error("inference was interrupted: {0}")]
    Interrupted(String),
}

/// Failure talking to the text-generation service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResponseError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("API error (status {status}): {body}")]
    Upstream { status: u16, body: String },

    #[error("invalid response format: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ResponseError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ResponseError::Timeout
        } else if err.is_decode() {
            ResponseError::InvalidResponse(err.to_string())
        } else {
            ResponseError::Transport(err.to_string())
        }
    }
}

/// Errors raised at the session boundary.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, FlowError>;
