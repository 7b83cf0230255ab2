//! Error types for refill-core.
//!
//! Administrative operations (config updates, rule CRUD) surface typed
//! failures to the caller. Evaluation-time failures (one bad tenant pattern,
//! a rule lookup error) are swallowed by the orchestrator and degrade to the
//! next fallback tier; see [`crate::check`].

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration access failed
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed administrative input
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Storage layer failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required identifier was missing or empty
    #[error("missing required identifier: {0}")]
    MissingIdentifier(&'static str),
}

/// Validation errors for administrative input.
///
/// These are the only errors a tenant should ever see for their own
/// configuration mistakes.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A custom pattern entry is empty or exceeds the length bound
    #[error("invalid pattern entry: {0}")]
    InvalidPattern(String),

    /// Default guarantee duration outside the accepted range
    #[error("default guarantee days must be in {min}..={max}, got {got}")]
    DefaultDaysOutOfRange { min: u32, max: u32, got: u32 },

    /// A configured list exceeds its size bound
    #[error("{list} list exceeds maximum of {max} entries")]
    ListTooLong { list: &'static str, max: usize },

    /// A rule keyword is empty or exceeds the length bound
    #[error("invalid rule keyword: {0}")]
    InvalidKeyword(String),

    /// Rule guarantee duration outside the accepted range
    #[error("rule guarantee days must be in {min}..={max}, got {got}")]
    RuleDaysOutOfRange { min: u32, max: u32, got: u32 },

    /// A no-guarantee rule must not carry a duration
    #[error("no-guarantee rules cannot carry a duration")]
    NoGuaranteeWithDuration,

    /// A guarantee rule needs a duration (days or lifetime)
    #[error("guarantee rules require a duration")]
    GuaranteeWithoutDuration,
}

/// Storage errors.
///
/// Ownership failures surface as [`StorageError::NotFound`]: a mutation
/// targeting a rule the caller does not own is indistinguishable from a
/// mutation targeting a rule that does not exist.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying database failure
    #[error("database error: {0}")]
    Database(String),

    /// Row not found (or not owned by the caller)
    #[error("{0} not found")]
    NotFound(&'static str),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(StorageError::from(e))
    }
}
