//! Error taxonomy for generation, engines, and orchestration.
//!
//! Only [`OrchestrationError`] ever reaches a caller of the orchestrator.
//! Generation failures are absorbed by engine fallbacks; engine failures are
//! absorbed by the fan-in unless every engine fails.
//!
//! | Error                         | Retriable | Surfaces to caller |
//! |-------------------------------|-----------|--------------------|
//! | `GenerationError::Timeout`    | yes       | never              |
//! | `GenerationError::Transport`  | yes       | never              |
//! | `GenerationError::RateLimited`| yes       | never              |
//! | `GenerationError::EmptyResponse` | yes    | never              |
//! | `GenerationError::Configuration` | no     | never              |
//! | `EngineError::*`              | n/a       | via fan-in only    |
//! | `OrchestrationError::*`       | n/a       | yes                |

use std::fmt;
use std::time::Duration;

use fusion::{EngineId, FusionError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single call to the text-generation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("empty response")]
    EmptyResponse,

    #[error("generator misconfigured: {0}")]
    Configuration(String),
}

impl GenerationError {
    /// Whether another attempt could succeed.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Self::Configuration(_))
    }

    /// Classify a provider error message.
    pub fn from_provider(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        if lower.contains("429") || lower.contains("rate limit") {
            Self::RateLimited(message)
        } else {
            Self::Transport(message)
        }
    }
}

/// Failure of a whole reasoning engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Invalid engine input or settings; fails fast.
    #[error("engine misconfigured: {0}")]
    Configuration(String),

    /// The engine did not finish within the orchestrator's budget.
    #[error("engine timed out after {0:?}")]
    Timeout(Duration),

    /// The engine task panicked or was cancelled.
    #[error("engine internal error: {0}")]
    Internal(String),
}

/// One engine branch that produced nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineFailure {
    pub engine: EngineId,
    pub reason: String,
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.engine, self.reason)
    }
}

fn join_failures(failures: &[EngineFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The only errors visible to callers of the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no engines produced a result ({})", join_failures(.failures))]
    NoEnginesAvailable { failures: Vec<EngineFailure> },

    #[error(transparent)]
    Fusion(#[from] FusionError),
}
