//! Error types for FinGuide

use thiserror::Error;

/// Result type alias for FinGuide operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in FinGuide
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Missing or empty user input (prompt, audio, title)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Embedding model could not be reached or produced unusable output
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    /// Embedding width differs from the store's fixed dimension
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Completion endpoint answered badly or timed out
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// Audio decodable but no recognizable speech
    #[error("could not understand audio")]
    Unintelligible,

    /// Speech-to-text backend failure
    #[error("speech recognition service error: {0}")]
    Stt(String),

    /// Audio input could not be normalized to canonical PCM
    #[error("unsupported audio format: {0}")]
    AudioFormat(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Capture device already owned by another voice loop
    #[error("capture device busy: {0}")]
    DeviceBusy(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Outward-facing classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// User-correctable input problem
    Input,
    /// Audio had no usable speech
    Unintelligible,
    /// Requested resource does not exist
    NotFound,
    /// Exclusive resource already held
    Conflict,
    /// An external model or service failed
    Upstream,
    /// Anything else
    Internal,
}

impl Error {
    /// Classify this error for the outward error taxonomy
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidInput(_) | Self::AudioFormat(_) => ErrorClass::Input,
            Self::Unintelligible => ErrorClass::Unintelligible,
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::DeviceBusy(_) => ErrorClass::Conflict,
            Self::ModelUnavailable(_)
            | Self::GenerationFailed(_)
            | Self::Stt(_)
            | Self::Tts(_)
            | Self::Http(_) => ErrorClass::Upstream,
            Self::Config(_)
            | Self::DimensionMismatch { .. }
            | Self::Audio(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Toml(_)
            | Self::Database(_)
            | Self::Sqlite(_) => ErrorClass::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(Error::InvalidInput("x".into()).class(), ErrorClass::Input);
        assert_eq!(Error::AudioFormat("x".into()).class(), ErrorClass::Input);
        assert_eq!(Error::Unintelligible.class(), ErrorClass::Unintelligible);
        assert_eq!(Error::Stt("down".into()).class(), ErrorClass::Upstream);
        assert_eq!(Error::GenerationFailed("t".into()).class(), ErrorClass::Upstream);
        assert_eq!(
            Error::DimensionMismatch { expected: 3, actual: 2 }.class(),
            ErrorClass::Internal
        );
    }
}
