// src/error.rs
use thiserror::Error;

/// Error kinds the rest of the crate needs to tell apart.
///
/// Anything that is just "this operation failed" travels as `anyhow::Error`
/// with context attached; these variants exist for callers that branch on
/// the failure kind (shutdown, security-fatal issuer mismatch, bad startup
/// configuration, corrupt stored data).
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The index refused new work because close() has begun.
    #[error("directory index is shutting down")]
    ShuttingDown,

    /// No certificate in the presented chain was issued by any allowed
    /// issuer. Security-fatal for the request; never a silent failure.
    #[error("no certificate in the chain matches an allowed issuer")]
    NoMatchingIssuer,

    /// Configuration rejected at startup. The process must not come up.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A stored field failed to decode back to its native type. Recoverable:
    /// the reader logs and skips the value, the rest of the document stands.
    #[error("stored field '{field}' failed to decode: {reason}")]
    FieldDecode { field: &'static str, reason: String },
}

impl DirectoryError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        DirectoryError::InvalidConfig(msg.into())
    }

    pub fn field_decode(field: &'static str, reason: impl Into<String>) -> Self {
        DirectoryError::FieldDecode {
            field,
            reason: reason.into(),
        }
    }
}
