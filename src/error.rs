//! Error types for the playback engine

use thiserror::Error;

/// Result type alias for playback operations
pub type Result<T> = std::result::Result<T, PlayerError>;

/// Error taxonomy of the player
///
/// Only `SourceOpen`, `NoPlayableStream` and `Config` are fatal at startup.
/// Everything else is recovered by the component that detects it and never
/// crosses a thread boundary.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// Bad path or unreadable container
    #[error("Couldn't open source {source_name}: {reason}")]
    SourceOpen { source_name: String, reason: String },

    /// No decoder available for one stream; the other stream may still play
    #[error("Unsupported codec for stream {stream}: {reason}")]
    UnsupportedCodec { stream: usize, reason: String },

    /// Every stream of the source failed codec negotiation
    #[error("Source has no playable stream")]
    NoPlayableStream,

    /// Transient decoder error, recovered by skipping the packet
    #[error("Decode error: {0}")]
    Decode(String),

    /// Presentation layer failure (window, texture or audio device)
    #[error("Output device error: {0}")]
    Device(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PlayerError {
    pub fn source_open(source_name: impl Into<String>, reason: impl ToString) -> Self {
        PlayerError::SourceOpen {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error must abort startup, rather than disable one stream
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PlayerError::SourceOpen { .. }
                | PlayerError::NoPlayableStream
                | PlayerError::Config(_)
                | PlayerError::Device(_)
        )
    }
}
