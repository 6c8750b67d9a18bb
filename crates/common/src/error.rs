//! Error types shared across Sightline crates.

use serde::{Deserialize, Serialize};

/// Top-level error type for Sightline operations.
///
/// The first six variants are the export failure taxonomy; every one of them
/// is fatal for the job that raised it and is never retried.
#[derive(Debug, thiserror::Error)]
pub enum SightlineError {
    #[error("Cannot open source: {message}")]
    SourceOpen { message: String },

    #[error(
        "No supported video codec found on this system{detail}. Try exporting as an image sequence instead."
    )]
    NoSupportedCodec { detail: String },

    #[error("Video writer failed to initialize: {message}")]
    WriterInit { message: String },

    #[error("Export produced an invalid output: {message}")]
    InvalidOutput { message: String },

    #[error("Inference failed: {message}")]
    Inference { message: String },

    #[error("I/O failure: {message}")]
    IoFailure { message: String },

    #[error("An export job is already running")]
    JobAlreadyRunning,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using SightlineError.
pub type SightlineResult<T> = Result<T, SightlineError>;

/// Serializable classification of a [`SightlineError`], carried by terminal
/// export events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceOpenFailure,
    NoSupportedCodec,
    WriterInitFailure,
    InvalidOutput,
    InferenceFailure,
    IoFailure,
    JobAlreadyRunning,
    Config,
    Unsupported,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::SourceOpenFailure => "source_open_failure",
            ErrorKind::NoSupportedCodec => "no_supported_codec",
            ErrorKind::WriterInitFailure => "writer_init_failure",
            ErrorKind::InvalidOutput => "invalid_output",
            ErrorKind::InferenceFailure => "inference_failure",
            ErrorKind::IoFailure => "io_failure",
            ErrorKind::JobAlreadyRunning => "job_already_running",
            ErrorKind::Config => "config",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SightlineError {
    pub fn source_open(msg: impl Into<String>) -> Self {
        Self::SourceOpen {
            message: msg.into(),
        }
    }

    /// No codec survived probing. `tried` lists the candidates for the message.
    pub fn no_supported_codec(tried: &[String]) -> Self {
        let detail = if tried.is_empty() {
            String::new()
        } else {
            format!(" (tried: {})", tried.join(", "))
        };
        Self::NoSupportedCodec { detail }
    }

    pub fn writer_init(msg: impl Into<String>) -> Self {
        Self::WriterInit {
            message: msg.into(),
        }
    }

    pub fn invalid_output(msg: impl Into<String>) -> Self {
        Self::InvalidOutput {
            message: msg.into(),
        }
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference {
            message: msg.into(),
        }
    }

    pub fn io_failure(msg: impl Into<String>) -> Self {
        Self::IoFailure {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Classify this error for terminal events and persistence.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SightlineError::SourceOpen { .. } => ErrorKind::SourceOpenFailure,
            SightlineError::NoSupportedCodec { .. } => ErrorKind::NoSupportedCodec,
            SightlineError::WriterInit { .. } => ErrorKind::WriterInitFailure,
            SightlineError::InvalidOutput { .. } => ErrorKind::InvalidOutput,
            SightlineError::Inference { .. } => ErrorKind::InferenceFailure,
            SightlineError::IoFailure { .. } | SightlineError::Io(_) => ErrorKind::IoFailure,
            SightlineError::JobAlreadyRunning => ErrorKind::JobAlreadyRunning,
            SightlineError::Config { .. } | SightlineError::Json(_) => ErrorKind::Config,
            SightlineError::Unsupported { .. } => ErrorKind::Unsupported,
            SightlineError::Other(_) => ErrorKind::Internal,
        }
    }
}
