//! Error types for mnemon-core.

use thiserror::Error;

/// Result type alias using mnemon-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during memory operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown record, attribute or reflection id
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Argument outside its accepted range
    #[error("Invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    /// Underlying persistence failure
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Another writer holds the database lock
    #[error("Conflicting update: {0}")]
    ConflictingUpdate(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a not-found error.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create an invalid-argument error.
    pub fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    /// Whether this error came from argument validation (nothing was written).
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                Self::ConflictingUpdate(err.to_string())
            }
            other => Self::StorageUnavailable(other.to_string()),
        }
    }
}

/// Validate that a value lies in the closed unit interval.
pub(crate) fn ensure_unit_interval(name: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(Error::invalid_argument(
            name,
            format!("expected a value in [0, 1], got {value}"),
        ));
    }
    Ok(())
}
