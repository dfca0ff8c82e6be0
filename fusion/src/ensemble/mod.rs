//! Ensemble fusion of reasoning-engine outputs.
//!
//! - [`result`]: the `EngineResult` envelope and typed engine payloads.
//! - [`aggregator`]: weighted fusion, confidence intervals, consensus.

pub mod aggregator;
pub mod result;

pub use aggregator::{
    consensus, sample_std, EnsembleAggregator, EnsembleResult, EnsembleWeights, FusedOutcome,
    DEGENERATE_HALF_WIDTH, SINGLE_ENGINE_HALF_WIDTH, UNLISTED_ENGINE_WEIGHT,
};
pub use result::{
    CausalEdge, CausalGraph, CausalNode, DebateTrace, Dimension, EngineId, EnginePayload,
    EngineResult, GraphReasoning, Interaction, ScoredOutcome, SearchTrace, SimulationResult,
    SupportSplit,
};
