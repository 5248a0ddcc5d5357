//! Error types shared across Maplapse crates.

use std::path::PathBuf;

/// Top-level error type for Maplapse operations.
#[derive(Debug, thiserror::Error)]
pub enum MaplapseError {
    /// No candidate codec is supported for the requested container/resolution/fps.
    #[error("Codec negotiation failed: {message}")]
    Negotiation { message: String },

    /// A frame source call failed.
    #[error("Frame source failed: {message}")]
    Producer { message: String },

    /// The encoder reported an error, either synchronously or through its error callback.
    #[error("Encoder error: {message}")]
    Encoder { message: String },

    /// Container finalization produced no output.
    #[error("Finalize failed: {message}")]
    Finalize { message: String },

    #[error("Mux error: {message}")]
    Mux { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Platform error: {message}")]
    Platform { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using MaplapseError.
pub type MaplapseResult<T> = Result<T, MaplapseError>;

impl MaplapseError {
    pub fn negotiation(msg: impl Into<String>) -> Self {
        Self::Negotiation {
            message: msg.into(),
        }
    }

    pub fn producer(msg: impl Into<String>) -> Self {
        Self::Producer {
            message: msg.into(),
        }
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder {
            message: msg.into(),
        }
    }

    pub fn finalize(msg: impl Into<String>) -> Self {
        Self::Finalize {
            message: msg.into(),
        }
    }

    pub fn mux(msg: impl Into<String>) -> Self {
        Self::Mux {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Whether this error belongs to the fatal pipeline taxonomy
    /// (negotiation, producer, encoder, finalize).
    pub fn is_fatal_pipeline_error(&self) -> bool {
        matches!(
            self,
            Self::Negotiation { .. }
                | Self::Producer { .. }
                | Self::Encoder { .. }
                | Self::Finalize { .. }
        )
    }
}
