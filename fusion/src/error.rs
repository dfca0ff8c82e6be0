//! Errors raised by the deterministic fusion layer.

/// Error type for fusion operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FusionError {
    #[error("no outcome names supplied")]
    NoOutcomes,

    #[error("invalid weight {weight} for engine {engine}")]
    InvalidWeight { engine: String, weight: f64 },

    #[error("duplicate outcome name: {0}")]
    DuplicateOutcome(String),
}

/// Result type for fusion operations
pub type FusionResult<T> = Result<T, FusionError>;
