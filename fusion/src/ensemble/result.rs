//! The normalized envelope every reasoning engine returns.
//!
//! `EngineResult` carries a probability mapping plus a typed, engine-specific
//! payload. Probability extraction for fusion is an exhaustive match over the
//! payload variants rather than probing for fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::debate::{DebateTranscript, KeyArgument};
use crate::distribution::Distribution;
use crate::resilience::DegradationReport;
use crate::search::PathSummary;

/// Engine family identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineId {
    Search,
    Debate,
    Simulation,
    GraphOfThought,
}

impl EngineId {
    pub const ALL: [EngineId; 4] = [
        Self::Search,
        Self::Debate,
        Self::Simulation,
        Self::GraphOfThought,
    ];
}

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Search => write!(f, "search"),
            Self::Debate => write!(f, "debate"),
            Self::Simulation => write!(f, "simulation"),
            Self::GraphOfThought => write!(f, "graph_of_thought"),
        }
    }
}

/// Tree-search explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchTrace {
    /// Best paths by mean value.
    pub top_paths: Vec<PathSummary>,
    pub iterations_run: u32,
    pub converged: bool,
    pub tree_size: usize,
    pub max_depth: usize,
    /// Mean value of the best path, 0.5 when nothing was visited.
    pub confidence: f64,
    pub degradation: DegradationReport,
}

/// Debate explanation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateTrace {
    pub transcript: DebateTranscript,
    /// The judge's confidence.
    pub consensus: f64,
    pub reasoning: String,
    pub key_arguments: Vec<KeyArgument>,
    pub degradation: DegradationReport,
}

/// Two-sided support split reported by the population simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SupportSplit {
    pub government_support: f64,
    pub opposition_support: f64,
}

impl SupportSplit {
    /// Split with `government` on one side and the remainder on the other.
    pub fn from_government(government: f64) -> Self {
        let g = government.clamp(0.0, 1.0);
        Self {
            government_support: g,
            opposition_support: 1.0 - g,
        }
    }
}

/// Pre-computed population simulation output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub final_distribution: SupportSplit,
    #[serde(default)]
    pub agent_count: u32,
    #[serde(default)]
    pub ticks: u32,
}

impl SimulationResult {
    /// Neutral 50/50 placeholder.
    pub fn neutral() -> Self {
        Self {
            final_distribution: SupportSplit::from_government(0.5),
            agent_count: 0,
            ticks: 0,
        }
    }

    /// One-line description for prompts.
    pub fn note(&self) -> String {
        format!(
            "Simulation ({} agents, {} ticks): government support {:.1}%, opposition support {:.1}%",
            self.agent_count,
            self.ticks,
            self.final_distribution.government_support * 100.0,
            self.final_distribution.opposition_support * 100.0
        )
    }
}

/// One analytical dimension of a graph-of-thought decomposition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dimension {
    pub name: String,
    pub analysis: String,
    /// Outcome → signed impact.
    pub impact: BTreeMap<String, f64>,
}

/// Interaction between two dimensions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Interaction {
    pub from: String,
    pub to: String,
    pub effect: String,
    pub strength: f64,
}

/// An outcome scored by the graph-of-thought engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoredOutcome {
    pub name: String,
    pub probability: f64,
    pub confidence_interval: Option<[f64; 2]>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CausalNode {
    pub id: String,
    pub label: String,
    pub probability: f64,
    pub confidence: f64,
    pub category: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CausalEdge {
    pub source: String,
    pub target: String,
    pub weight: f64,
    /// `positive` or `negative`.
    #[serde(rename = "type")]
    pub polarity: String,
    pub description: String,
}

/// Directed graph of the factors driving each outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CausalGraph {
    pub nodes: Vec<CausalNode>,
    pub edges: Vec<CausalEdge>,
}

/// Graph-of-thought decomposition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphReasoning {
    pub dimensions: Vec<Dimension>,
    #[serde(alias = "cross_interactions")]
    pub interactions: Vec<Interaction>,
    pub outcomes: Vec<ScoredOutcome>,
    pub causal_graph: CausalGraph,
    pub degradation: DegradationReport,
}

/// Engine-specific payload, tagged by engine family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "engine", content = "raw", rename_all = "snake_case")]
pub enum EnginePayload {
    Search(SearchTrace),
    Debate(DebateTrace),
    Simulation(SimulationResult),
    GraphOfThought(GraphReasoning),
}

/// Normalized result of one engine.
///
/// `outcome_probabilities` need not sum to exactly 1; the aggregator
/// normalizes after fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResult {
    pub outcome_probabilities: Distribution,
    #[serde(flatten)]
    pub payload: EnginePayload,
}

impl EngineResult {
    pub fn new(outcome_probabilities: Distribution, payload: EnginePayload) -> Self {
        Self {
            outcome_probabilities,
            payload,
        }
    }

    /// Wrap a simulation result. Its mapping is derived at fusion time.
    pub fn simulation(result: SimulationResult) -> Self {
        Self::new(Distribution::new(), EnginePayload::Simulation(result))
    }

    pub fn engine(&self) -> EngineId {
        match &self.payload {
            EnginePayload::Search(_) => EngineId::Search,
            EnginePayload::Debate(_) => EngineId::Debate,
            EnginePayload::Simulation(_) => EngineId::Simulation,
            EnginePayload::GraphOfThought(_) => EngineId::GraphOfThought,
        }
    }

    /// Degradation report of generated payloads; `None` for simulation.
    pub fn degradation(&self) -> Option<&DegradationReport> {
        match &self.payload {
            EnginePayload::Search(t) => Some(&t.degradation),
            EnginePayload::Debate(t) => Some(&t.degradation),
            EnginePayload::GraphOfThought(g) => Some(&g.degradation),
            EnginePayload::Simulation(_) => None,
        }
    }

    /// Probability mapping used for fusion.
    ///
    /// Tries, in order: the direct mapping; the payload's scored outcome
    /// list; a simulation split across the first two outcomes. Empty when
    /// none apply.
    pub fn extract_probabilities(&self, outcomes: &[String]) -> Distribution {
        if !self.outcome_probabilities.is_empty() {
            return self.outcome_probabilities.clone();
        }
        match &self.payload {
            EnginePayload::GraphOfThought(graph) => graph
                .outcomes
                .iter()
                .filter(|o| !o.name.is_empty() && o.probability.is_finite())
                .map(|o| (o.name.clone(), o.probability.max(0.0)))
                .collect(),
            EnginePayload::Simulation(sim) if outcomes.len() >= 2 => {
                let g = sim.final_distribution.government_support.clamp(0.0, 1.0);
                [(outcomes[0].clone(), g), (outcomes[1].clone(), 1.0 - g)].into()
            }
            _ => Distribution::new(),
        }
    }
}
