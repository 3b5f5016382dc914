//! Errors in the library.
use thiserror::Error;

/// Errors in the library.
///
/// Configuration errors are raised at construction time and are fatal;
/// the caller is expected to fix the agent specification rather than retry.
/// Invariant violations during training (misplaced terminal markers, actions
/// outside their validity mask) indicate an environment-bridge bug and panic
/// instead of going through this type.
#[derive(Error, Debug)]
pub enum ParkrlError {
    /// Invalid value for a configuration field.
    #[error("Invalid configuration of `{field}`: {reason}")]
    Config {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKey(String),

    /// Record value type error.
    #[error("Record value type error: {0}")]
    RecordValueType(String),
}

impl ParkrlError {
    /// Shorthand for a configuration error.
    pub fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Config {
            field,
            reason: reason.into(),
        }
    }
}
