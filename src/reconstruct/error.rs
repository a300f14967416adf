use crate::types::date_span::DateSpan;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReconstructError {
    /// The provider returned a different number of hourly values than the
    /// requested day span holds. Never repaired by truncating or padding.
    #[error("Location '{location}' {span}: expected {expected} hourly values, provider returned {found}")]
    DataShapeMismatch {
        location: String,
        span: DateSpan,
        expected: usize,
        found: usize,
    },

    #[error("UTC offset of {0} seconds is out of range")]
    InvalidUtcOffset(i32),

    #[error("Step must be a positive duration, got {0} seconds")]
    NonPositiveStep(i64),

    #[error("Timestamp overflow after {0} steps")]
    TimestampOverflow(usize),

    #[error("Reconstructed series is not strictly increasing at index {0}")]
    NonUniformStep(usize),

    #[error("Series for variable '{0}' is missing from the payload")]
    MissingSeries(String),
}
