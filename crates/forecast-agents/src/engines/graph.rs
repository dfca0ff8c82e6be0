//! Graph-of-thought engine: one structured decomposition call.
//!
//! The collaborator returns analytical dimensions, their interactions, a
//! scored outcome list, and a causal graph. The payload feeds fusion through
//! its outcome list; the causal graph is surfaced in the orchestrator report.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fusion::ensemble::{CausalGraph, CausalNode, Dimension, GraphReasoning, ScoredOutcome};
use fusion::{DegradationReport, Distribution, EngineId, EnginePayload, EngineResult};
use serde_json::Value;
use tracing::{info, warn};

use super::{ReasoningContext, ReasoningEngine};
use crate::errors::EngineError;
use crate::generation::{generate_structured, GenerationRequest, TaskTag, TextGenerator};
use crate::prompts;

/// Half-width of the fallback confidence interval.
const FALLBACK_INTERVAL: f64 = 0.08;
const FALLBACK_NODE_CONFIDENCE: f64 = 0.7;
const FALLBACK_DIMENSIONS: [&str; 3] = ["Economic", "Political", "Social"];

pub struct GraphEngine {
    generator: Arc<dyn TextGenerator>,
    call_timeout: Duration,
}

impl GraphEngine {
    pub fn new(generator: Arc<dyn TextGenerator>, call_timeout: Duration) -> Self {
        Self {
            generator,
            call_timeout,
        }
    }

    async fn decompose(&self, ctx: &ReasoningContext) -> Result<GraphReasoning, String> {
        let (system, user) = prompts::graph_reasoning(
            &ctx.query,
            &ctx.data_summary,
            ctx.simulation_note.as_deref(),
            &ctx.outcomes,
        );
        let timeout = ctx.call_timeout(self.call_timeout);
        let request = GenerationRequest::new(TaskTag::GraphReasoning, system, user, timeout);
        let map = generate_structured(self.generator.as_ref(), &request)
            .await
            .map_err(|e| e.to_string())?;
        if map.is_empty() {
            return Err("no JSON object in response".into());
        }

        let mut graph: GraphReasoning =
            serde_json::from_value(Value::Object(map)).map_err(|e| format!("malformed response: {e}"))?;
        graph
            .outcomes
            .retain(|o| !o.name.trim().is_empty() && o.probability.is_finite() && o.probability >= 0.0);
        if graph.outcomes.is_empty() {
            return Err("no usable outcomes in response".into());
        }
        Ok(graph)
    }
}

#[async_trait]
impl ReasoningEngine for GraphEngine {
    fn id(&self) -> EngineId {
        EngineId::GraphOfThought
    }

    async fn reason(&self, ctx: &ReasoningContext) -> Result<EngineResult, EngineError> {
        ctx.validate()?;
        let mut report = DegradationReport::default();

        let graph = match self.decompose(ctx).await {
            Ok(mut graph) => {
                report.record_success();
                info!(
                    dimensions = graph.dimensions.len(),
                    nodes = graph.causal_graph.nodes.len(),
                    edges = graph.causal_graph.edges.len(),
                    "graph reasoning complete"
                );
                graph.degradation = report;
                graph
            }
            Err(reason) => {
                warn!(%reason, "graph reasoning fell back");
                report.record_fallback(format!("graph: {reason}"));
                let mut graph = fallback_graph(&ctx.outcomes);
                graph.degradation = report;
                graph
            }
        };

        Ok(EngineResult::new(
            Distribution::new(),
            EnginePayload::GraphOfThought(graph),
        ))
    }
}

/// Uniform outcomes, three generic dimensions, one causal node per outcome.
pub fn fallback_graph(outcomes: &[String]) -> GraphReasoning {
    let p = if outcomes.is_empty() {
        0.0
    } else {
        1.0 / outcomes.len() as f64
    };

    GraphReasoning {
        dimensions: FALLBACK_DIMENSIONS
            .iter()
            .map(|name| Dimension {
                name: name.to_string(),
                analysis: format!("{name} factors affecting the outcome"),
                impact: Default::default(),
            })
            .collect(),
        interactions: Vec::new(),
        outcomes: outcomes
            .iter()
            .map(|o| ScoredOutcome {
                name: o.clone(),
                probability: p,
                confidence_interval: Some([
                    (p - FALLBACK_INTERVAL).max(0.0),
                    (p + FALLBACK_INTERVAL).min(1.0),
                ]),
                reasoning: format!("Based on multi-dimensional analysis of {o}"),
            })
            .collect(),
        causal_graph: CausalGraph {
            nodes: outcomes
                .iter()
                .enumerate()
                .map(|(i, o)| CausalNode {
                    id: format!("outcome_{i}"),
                    label: o.clone(),
                    probability: p,
                    confidence: FALLBACK_NODE_CONFIDENCE,
                    category: "outcome".into(),
                })
                .collect(),
            edges: Vec::new(),
        },
        degradation: DegradationReport::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::mock::Scripted;
    use crate::errors::GenerationError;

    fn ctx() -> ReasoningContext {
        ReasoningContext::new("Who wins?", vec!["A".into(), "B".into()], "none")
            .with_simulation_note("Simulation (10 agents, 5 ticks): government support 60.0%")
    }

    fn graph_of(result: &EngineResult) -> &GraphReasoning {
        match &result.payload {
            EnginePayload::GraphOfThought(g) => g,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn parses_decomposition() {
        let generator = Scripted::new(|req| {
            assert!(req.user_text().contains("government support 60.0%"));
            Ok(r#"{
                "dimensions": [{"name": "Economy", "analysis": "growth", "impact": {"A": 0.3}}],
                "cross_interactions": [{"from": "Economy", "to": "Mood", "effect": "lifts", "strength": 0.4}],
                "outcomes": [
                    {"name": "A", "probability": 0.65, "confidence_interval": [0.55, 0.75], "reasoning": "r"},
                    {"name": "B", "probability": 0.35, "confidence_interval": [0.25, 0.45], "reasoning": "r"}
                ],
                "causal_graph": {
                    "nodes": [{"id": "n1", "label": "Economy", "probability": 0.6, "confidence": 0.8, "category": "factor"}],
                    "edges": [{"source": "n1", "target": "A", "weight": 0.5, "type": "positive", "description": "d"}]
                }
            }"#
            .into())
        });
        let engine = GraphEngine::new(Arc::new(generator), Duration::from_secs(5));
        let result = engine.reason(&ctx()).await.unwrap();
        let g = graph_of(&result);
        assert_eq!(g.interactions.len(), 1);
        assert_eq!(g.causal_graph.edges[0].polarity, "positive");
        assert!(!g.degradation.is_degraded());

        let probs = result.extract_probabilities(&ctx().outcomes);
        assert_eq!(probs["A"], 0.65);
        assert_eq!(probs["B"], 0.35);
    }

    #[tokio::test]
    async fn failure_yields_deterministic_fallback() {
        let engine = GraphEngine::new(
            Arc::new(Scripted::new(|_| Err(GenerationError::Transport("down".into())))),
            Duration::from_secs(5),
        );
        let result = engine.reason(&ctx()).await.unwrap();
        let g = graph_of(&result);
        assert!(g.degradation.is_degraded());
        assert_eq!(g.dimensions.len(), 3);
        assert_eq!(g.causal_graph.nodes.len(), 2);
        assert_eq!(g.causal_graph.nodes[1].id, "outcome_1");
        let a = &g.outcomes[0];
        assert_eq!(a.probability, 0.5);
        let [lo, hi] = a.confidence_interval.unwrap();
        assert!((lo - 0.42).abs() < 1e-12 && (hi - 0.58).abs() < 1e-12);
    }

    #[tokio::test]
    async fn response_without_outcomes_falls_back() {
        let engine = GraphEngine::new(
            Arc::new(Scripted::new(|_| Ok(r#"{"dimensions": []}"#.into()))),
            Duration::from_secs(5),
        );
        let result = engine.reason(&ctx()).await.unwrap();
        let g = graph_of(&result);
        assert!(g.degradation.is_degraded());
        assert_eq!(g.outcomes.len(), 2);
    }
}
