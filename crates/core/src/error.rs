//! Error types for tally pipelines.

use crate::record::RecordId;
use alloc::string::String;
use thiserror::Error as ThisError;

/// Result type alias for tally operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors reported by pipeline construction, mutation and reads.
///
/// Every error is returned synchronously from the call that caused it and
/// a failing mutation leaves all aggregate state untouched.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum Error {
    /// Insert of an identity that is already stored.
    #[error("record {id} is already present")]
    DuplicateRecord { id: RecordId },

    /// Update or removal of an identity that is not stored.
    #[error("record {id} not found")]
    UnknownRecord { id: RecordId },

    /// The pipeline definition failed validation in `build()`.
    #[error("invalid pipeline: {message}")]
    InvalidPipeline { message: String },

    /// Read of a scope name that the pipeline does not define.
    #[error("scope not found: {name}")]
    UnknownScope { name: String },
}

impl Error {
    /// Creates a duplicate record error.
    pub fn duplicate_record(id: RecordId) -> Self {
        Error::DuplicateRecord { id }
    }

    /// Creates an unknown record error.
    pub fn unknown_record(id: RecordId) -> Self {
        Error::UnknownRecord { id }
    }

    /// Creates an invalid pipeline error.
    pub fn invalid_pipeline(message: impl Into<String>) -> Self {
        Error::InvalidPipeline {
            message: message.into(),
        }
    }

    /// Creates an unknown scope error.
    pub fn unknown_scope(name: impl Into<String>) -> Self {
        Error::UnknownScope { name: name.into() }
    }

    /// Returns true for errors caused by an identity the store does not
    /// agree with (duplicate insert, unknown update/remove).
    pub fn is_identity_error(&self) -> bool {
        matches!(self, Error::DuplicateRecord { .. } | Error::UnknownRecord { .. })
    }
}
