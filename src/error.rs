//*** START FILE: src/error.rs ***//
//! Error types for every stage of the verse analysis pipeline.
//!
//! Each error carries a small `Copy` kind enum so callers can branch on the
//! failure class without looking at message text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// --- Provider (LLM) failures ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderErrorKind {
    Timeout,
    RateLimited,
    MalformedResponse,
    Unavailable,
}

impl ProviderErrorKind {
    /// Only transient failures are worth a second attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, ProviderErrorKind::Timeout | ProviderErrorKind::RateLimited)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("provider error ({kind:?}): {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::RateLimited, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::MalformedResponse, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unavailable, message)
    }

    pub fn kind(&self) -> ProviderErrorKind {
        self.kind
    }
}

// --- Normalizer ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizationErrorKind {
    EmptyAlignment,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("normalization failed ({kind:?}): {message}")]
pub struct NormalizationError {
    pub kind: NormalizationErrorKind,
    pub message: String,
}

impl NormalizationError {
    pub fn empty_alignment(message: impl Into<String>) -> Self {
        Self { kind: NormalizationErrorKind::EmptyAlignment, message: message.into() }
    }

    pub fn kind(&self) -> NormalizationErrorKind {
        self.kind
    }
}

// --- Merge/format engine ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatErrorKind {
    LengthMismatch,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("format failed ({kind:?}): {message}")]
pub struct FormatError {
    pub kind: FormatErrorKind,
    pub message: String,
}

impl FormatError {
    pub fn length_mismatch(message: impl Into<String>) -> Self {
        Self { kind: FormatErrorKind::LengthMismatch, message: message.into() }
    }

    pub fn kind(&self) -> FormatErrorKind {
        self.kind
    }
}

// --- Cache store ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    Unavailable,
    /// A row exists but does not deserialize into a valid cache entry.
    Corrupt,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("store error ({kind:?}): {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self { kind: StoreErrorKind::Unavailable, message: message.into() }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self { kind: StoreErrorKind::Corrupt, message: message.into() }
    }

    pub fn kind(&self) -> StoreErrorKind {
        self.kind
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::unavailable(e.to_string())
    }
}

// --- Per-language aggregate, what the caller sees ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisErrorKind {
    Timeout,
    RateLimited,
    MalformedResponse,
    Unavailable,
    EmptyAlignment,
    LengthMismatch,
}

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct AnalysisError {
    #[serde(rename = "error_kind")]
    pub kind: AnalysisErrorKind,
    pub message: String,
}

impl AnalysisError {
    pub fn new(kind: AnalysisErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    /// Used when the caller's deadline expires before a language resolves.
    pub fn deadline_expired(language_code: &str) -> Self {
        Self::new(
            AnalysisErrorKind::Timeout,
            format!("deadline expired before analysis for '{}' completed", language_code),
        )
    }

    pub fn kind(&self) -> AnalysisErrorKind {
        self.kind
    }
}

impl From<ProviderError> for AnalysisError {
    fn from(e: ProviderError) -> Self {
        let kind = match e.kind {
            ProviderErrorKind::Timeout => AnalysisErrorKind::Timeout,
            ProviderErrorKind::RateLimited => AnalysisErrorKind::RateLimited,
            ProviderErrorKind::MalformedResponse => AnalysisErrorKind::MalformedResponse,
            ProviderErrorKind::Unavailable => AnalysisErrorKind::Unavailable,
        };
        AnalysisError::new(kind, e.message)
    }
}

impl From<NormalizationError> for AnalysisError {
    fn from(e: NormalizationError) -> Self {
        match e.kind {
            NormalizationErrorKind::EmptyAlignment => {
                AnalysisError::new(AnalysisErrorKind::EmptyAlignment, e.message)
            }
        }
    }
}

impl From<FormatError> for AnalysisError {
    fn from(e: FormatError) -> Self {
        match e.kind {
            FormatErrorKind::LengthMismatch => {
                AnalysisError::new(AnalysisErrorKind::LengthMismatch, e.message)
            }
        }
    }
}

// --- Configuration ---

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

//*** END FILE: src/error.rs ***//
