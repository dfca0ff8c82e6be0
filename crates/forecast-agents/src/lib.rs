//! Multi-engine probabilistic forecasting over a text-generation service.
//!
//! - [`generation`]: the collaborator trait, rig-backed client, usage log
//! - [`engines`]: tree search, persona debate, graph-of-thought
//! - [`orchestrator`]: concurrent fan-out, ensemble fan-in, variable reruns
//! - [`config`]: TOML + environment configuration
//! - [`telemetry`]: per-run JSONL records
//! - [`signals`]: crowd/reputation fusion and divergence checks
//!
//! Deterministic pieces (search tree, debate transcript, fusion) live in the
//! `fusion` crate.

pub mod config;
pub mod engines;
pub mod errors;
pub mod generation;
pub mod orchestrator;
pub mod prompts;
pub mod signals;
pub mod telemetry;

pub use config::ForecastConfig;
pub use engines::{DebateEngine, GraphEngine, ReasoningContext, ReasoningEngine, SearchEngine};
pub use errors::{EngineError, EngineFailure, GenerationError, OrchestrationError};
pub use generation::{RigTextGenerator, TextGenerator, UsageLog};
pub use orchestrator::{DataContext, Orchestrator, PredictionTask, ReasoningReport};
