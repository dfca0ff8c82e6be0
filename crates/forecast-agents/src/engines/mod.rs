//! Reasoning engines run by the orchestrator.
//!
//! | Module   | Engine id          | Calls per run                          |
//! |----------|--------------------|----------------------------------------|
//! | `search` | `search`           | up to 2 × iterations (expand+evaluate) |
//! | `debate` | `debate`           | 4 openings + 4 rebuttals + 1 judgment  |
//! | `graph`  | `graph_of_thought` | 1                                      |
//!
//! Every engine absorbs collaborator failures with a local fallback and
//! records them in the payload's `DegradationReport`. An engine only returns
//! `Err` for invalid input.

pub mod debate;
pub mod graph;
pub mod search;

#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

use async_trait::async_trait;
use fusion::{EngineId, EngineResult};
use tokio::time::Instant;

use crate::errors::EngineError;

pub use debate::DebateEngine;
pub use graph::GraphEngine;
pub use search::SearchEngine;

/// Shared input handed to every engine of one orchestration run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningContext {
    pub query: String,
    pub outcomes: Vec<String>,
    /// Compact rendering of the data indicators.
    pub data_summary: String,
    /// Simulation description, when a simulation result is available.
    pub simulation_note: Option<String>,
    /// Wall-clock budget for the run. Engines that iterate stop early and
    /// answer from what they have.
    pub deadline: Option<Instant>,
}

impl ReasoningContext {
    pub fn new(query: impl Into<String>, outcomes: Vec<String>, data_summary: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            outcomes,
            data_summary: data_summary.into(),
            simulation_note: None,
            deadline: None,
        }
    }

    pub fn with_simulation_note(mut self, note: impl Into<String>) -> Self {
        self.simulation_note = Some(note.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `ceiling`, shortened to whatever is left before the deadline.
    pub fn call_timeout(&self, ceiling: Duration) -> Duration {
        match self.deadline {
            Some(d) => ceiling.min(d.saturating_duration_since(Instant::now())),
            None => ceiling,
        }
    }

    /// Fails when there is nothing to forecast.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.outcomes.is_empty() {
            return Err(EngineError::Configuration("no outcomes to forecast".into()));
        }
        if self.outcomes.iter().any(|o| o.trim().is_empty()) {
            return Err(EngineError::Configuration("outcome names must be non-empty".into()));
        }
        Ok(())
    }
}

/// One independent reasoning strategy.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    fn id(&self) -> EngineId;

    async fn reason(&self, ctx: &ReasoningContext) -> Result<EngineResult, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_outcomes_are_rejected() {
        let ctx = ReasoningContext::new("Q", vec![], "");
        assert!(matches!(ctx.validate(), Err(EngineError::Configuration(_))));
        let ctx = ReasoningContext::new("Q", vec!["A".into(), " ".into()], "");
        assert!(ctx.validate().is_err());
        assert!(ReasoningContext::new("Q", vec!["A".into()], "").validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn call_timeout_shrinks_towards_the_deadline() {
        let ceiling = Duration::from_secs(150);
        let open = ReasoningContext::new("Q", vec!["A".into()], "");
        assert_eq!(open.call_timeout(ceiling), ceiling);
        assert!(!open.deadline_passed());

        let ctx = open.with_deadline(Instant::now() + Duration::from_secs(200));
        assert_eq!(ctx.call_timeout(ceiling), ceiling);
        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(ctx.call_timeout(ceiling), Duration::from_secs(80));
        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(ctx.call_timeout(ceiling), Duration::ZERO);
        assert!(ctx.deadline_passed());
    }
}
