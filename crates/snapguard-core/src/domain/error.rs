//! Domain-level error taxonomy for snapguard.
//!
//! Validation and recovery never fail; their findings are returned as data.
//! These errors cover the codec, file and configuration boundaries only.

/// Errors produced while parsing XML hierarchies.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XmlError {
    #[error("xml content is empty")]
    Empty,

    #[error("malformed xml at byte {position}: {message}")]
    Malformed { position: u64, message: String },

    #[error("unclosed element <{0}> at end of document")]
    Unclosed(String),

    #[error("document has no root element")]
    NoRoot,
}

/// snapguard domain errors.
#[derive(Debug, thiserror::Error)]
pub enum SnapguardError {
    #[error("invalid script: {0}")]
    InvalidScript(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for snapguard operations.
pub type Result<T> = std::result::Result<T, SnapguardError>;
