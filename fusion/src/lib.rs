//! Fusion: the deterministic core of the forecasting pipeline.
//!
//! This crate holds everything that does not touch the network:
//!
//! - [`extract`]: layered recovery of JSON objects from free-form model text
//! - [`distribution`]: outcome-probability maps and normalization
//! - [`search`]: the arena reasoning tree and UCB1 selection
//! - [`debate`]: personas, the debate phase machine, and the transcript
//! - [`ensemble`]: engine result envelopes and weighted fusion
//! - [`resilience`]: degraded-mode bookkeeping
//! - [`drift`]: staleness and calibration monitoring
//! - [`signals`]: model/crowd/reputation signal fusion
//!
//! Engines that call a text-generation service live in `forecast-agents`
//! and build on these types.

pub mod debate;
pub mod distribution;
pub mod drift;
pub mod ensemble;
pub mod error;
pub mod extract;
pub mod resilience;
pub mod search;
pub mod signals;

pub use distribution::Distribution;
pub use ensemble::{
    EngineId, EnginePayload, EngineResult, EnsembleAggregator, EnsembleResult, EnsembleWeights,
    FusedOutcome,
};
pub use error::{FusionError, FusionResult};
pub use extract::extract_structured;
pub use resilience::{DegradationLevel, DegradationReport};
