//! Error types for coherence-engine operations.

use thiserror::Error;

use crate::fields::EventField;

/// Errors raised by the consistency engine.
///
/// The distinction between `Validation` and `Forbidden` matters to callers:
/// the former means "the submitted value is malformed", the latter means
/// "the change itself is not allowed for this principal or event state".
#[derive(Error, Debug)]
pub enum CoherenceError {
    /// The submitted value for a field failed an integrity check.
    #[error("Invalid value for {field:?}: {message}")]
    Validation { field: EventField, message: String },

    /// The change is not permitted (immutable field, organizer-only field,
    /// classification change across an exception boundary).
    #[error("Change to {field:?} not allowed: {message}")]
    Forbidden { field: EventField, message: String },

    /// A referenced occurrence or exception does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The recurrence rule string could not be parsed.
    #[error("Invalid RRULE: {0}")]
    InvalidRule(String),

    /// The timezone is not a valid IANA identifier.
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// A collaborator reported a quota or count limit; the whole delta aborts.
    #[error("Capacity limit exceeded: {0}")]
    Capacity(String),

    /// An internal invariant was violated; all derived state must be discarded.
    #[error("Internal invariant violation: {0}")]
    Internal(String),
}

/// Convenience alias used throughout coherence-engine.
pub type Result<T> = std::result::Result<T, CoherenceError>;
