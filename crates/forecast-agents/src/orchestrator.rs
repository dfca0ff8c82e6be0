//! Concurrent fan-out over the reasoning engines and fan-in through the
//! ensemble aggregator.
//!
//! ```text
//!                 ┌─► search ─────────┐
//! task + data ────┼─► debate ─────────┼──► join ──► EnsembleAggregator ──► ReasoningReport
//!                 └─► graph_of_thought┘      ▲
//!                   simulation result ───────┘
//! ```
//!
//! Each engine runs on its own task under `engine_timeout`. A failed, timed
//! out, or panicked engine is logged and left out; the run only fails when
//! nothing at all survives.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use fusion::ensemble::{CausalGraph, FusedOutcome, SimulationResult};
use fusion::{
    Distribution, EngineId, EnginePayload, EngineResult, EnsembleAggregator, FusionError,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ForecastConfig;
use crate::engines::{DebateEngine, GraphEngine, ReasoningContext, ReasoningEngine, SearchEngine};
use crate::errors::{EngineError, EngineFailure, OrchestrationError};
use crate::generation::{TextGenerator, UsageLog, UsageSummary};

/// What to forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionTask {
    /// Category of question, e.g. `election`.
    pub kind: String,
    pub question: String,
    pub outcomes: Vec<String>,
    #[serde(default)]
    pub key_variables: Vec<String>,
}

impl PredictionTask {
    /// Query text shared by every engine.
    ///
    /// Falls back to `kind: outcome, outcome, ...` when the question is blank.
    pub fn query(&self) -> String {
        if self.question.trim().is_empty() {
            format!("{}: {}", self.kind, self.outcomes.join(", "))
        } else {
            self.question.clone()
        }
    }

    fn validate(&self) -> Result<(), OrchestrationError> {
        if self.outcomes.is_empty() {
            return Err(OrchestrationError::Configuration(
                "task has no outcomes".into(),
            ));
        }
        let mut seen = BTreeSet::new();
        for outcome in &self.outcomes {
            if outcome.trim().is_empty() {
                return Err(OrchestrationError::Configuration(
                    "outcome names must be non-empty".into(),
                ));
            }
            if !seen.insert(outcome.as_str()) {
                return Err(FusionError::DuplicateOutcome(outcome.clone()).into());
            }
        }
        Ok(())
    }
}

/// Indicator snapshot handed to the engines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataContext {
    pub indicators: BTreeMap<String, f64>,
}

impl DataContext {
    pub fn new(indicators: BTreeMap<String, f64>) -> Self {
        Self { indicators }
    }

    /// Compact JSON rendering for prompts.
    pub fn summary(&self) -> String {
        if self.indicators.is_empty() {
            return "No indicator data available".to_string();
        }
        serde_json::to_string(&self.indicators).unwrap_or_default()
    }

    /// Overwrite indicators whose key matches an override key.
    ///
    /// Keys compare after lowercasing and replacing spaces with `_`. Returns
    /// how many indicators changed.
    pub fn apply_overrides(&mut self, overrides: &BTreeMap<String, f64>) -> usize {
        let wanted: BTreeMap<String, f64> = overrides
            .iter()
            .map(|(k, v)| (override_key(k), *v))
            .collect();
        let mut applied = 0;
        for (key, value) in self.indicators.iter_mut() {
            if let Some(new_value) = wanted.get(&override_key(key)) {
                debug!(indicator = %key, old = *value, new = *new_value, "indicator overridden");
                *value = *new_value;
                applied += 1;
            }
        }
        applied
    }
}

fn override_key(key: &str) -> String {
    key.trim().to_lowercase().replace(' ', "_")
}

/// Fused forecast plus everything needed to explain it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningReport {
    pub outcomes: Vec<FusedOutcome>,
    pub engine_weights: BTreeMap<EngineId, f64>,
    pub consensus: f64,
    /// Results that survived, including the simulation when supplied.
    pub engines: BTreeMap<EngineId, EngineResult>,
    pub failures: Vec<EngineFailure>,
    /// From the graph-of-thought engine; empty when it did not run.
    pub causal_graph: CausalGraph,
    /// Generator calls made during this run.
    pub usage: UsageSummary,
}

impl ReasoningReport {
    pub fn distribution(&self) -> Distribution {
        self.outcomes
            .iter()
            .map(|o| (o.name.clone(), o.probability))
            .collect()
    }

    pub fn leading(&self) -> Option<&FusedOutcome> {
        self.outcomes
            .iter()
            .max_by(|a, b| a.probability.total_cmp(&b.probability))
    }
}

/// How long past the run deadline an engine may take before it is cancelled.
const BACKSTOP_GRACE: Duration = Duration::from_secs(30);

pub struct Orchestrator {
    engines: Vec<Arc<dyn ReasoningEngine>>,
    rerun_engines: Vec<Arc<dyn ReasoningEngine>>,
    aggregator: EnsembleAggregator,
    engine_timeout: Duration,
    usage: UsageLog,
}

impl Orchestrator {
    /// Search, debate, and (when enabled) graph engines over one generator.
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        config: &ForecastConfig,
        usage: UsageLog,
    ) -> Result<Self, OrchestrationError> {
        config.validate().map_err(OrchestrationError::Configuration)?;
        let call_timeout = config.generation.call_timeout();

        let search = SearchEngine::new(generator.clone(), config.search.clone(), call_timeout);
        let rerun_search = SearchEngine::new(generator.clone(), config.search.clone(), call_timeout)
            .with_iterations(config.orchestrator.rerun_search_iterations);
        let debate: Arc<dyn ReasoningEngine> = Arc::new(DebateEngine::new(
            generator.clone(),
            config.debate.clone(),
            call_timeout,
        ));

        let mut engines: Vec<Arc<dyn ReasoningEngine>> = vec![Arc::new(search), debate.clone()];
        let mut rerun_engines: Vec<Arc<dyn ReasoningEngine>> = vec![Arc::new(rerun_search), debate];
        if config.graph.enabled {
            let graph: Arc<dyn ReasoningEngine> = Arc::new(GraphEngine::new(generator, call_timeout));
            engines.push(graph.clone());
            rerun_engines.push(graph);
        }

        let aggregator = EnsembleAggregator::with_weights(config.ensemble.clone())?;
        Ok(Self {
            engines,
            rerun_engines,
            aggregator,
            engine_timeout: config.orchestrator.engine_timeout(),
            usage,
        })
    }

    /// Explicit engine set, used for both `reason` and `rerun_with_overrides`.
    pub fn with_engines(
        engines: Vec<Arc<dyn ReasoningEngine>>,
        aggregator: EnsembleAggregator,
        engine_timeout: Duration,
        usage: UsageLog,
    ) -> Self {
        Self {
            rerun_engines: engines.clone(),
            engines,
            aggregator,
            engine_timeout,
            usage,
        }
    }

    pub fn engine_ids(&self) -> Vec<EngineId> {
        self.engines.iter().map(|e| e.id()).collect()
    }

    pub fn usage(&self) -> &UsageLog {
        &self.usage
    }

    /// Run every engine concurrently and fuse what survives.
    pub async fn reason(
        &self,
        task: &PredictionTask,
        data: &DataContext,
        simulation: Option<SimulationResult>,
    ) -> Result<ReasoningReport, OrchestrationError> {
        task.validate()?;
        let mut ctx = ReasoningContext::new(task.query(), task.outcomes.clone(), data.summary());
        if let Some(sim) = &simulation {
            ctx = ctx.with_simulation_note(sim.note());
        }
        self.fan_out(&self.engines, ctx, simulation).await
    }

    /// Re-run with some indicators replaced.
    ///
    /// Uses the reduced search budget. The graph prompt sees a neutral
    /// simulation placeholder, which is not fused.
    pub async fn rerun_with_overrides(
        &self,
        task: &PredictionTask,
        data: &DataContext,
        overrides: &BTreeMap<String, f64>,
    ) -> Result<ReasoningReport, OrchestrationError> {
        task.validate()?;
        let mut data = data.clone();
        let applied = data.apply_overrides(overrides);
        info!(requested = overrides.len(), applied, "rerunning with overrides");

        let ctx = ReasoningContext::new(task.query(), task.outcomes.clone(), data.summary())
            .with_simulation_note(SimulationResult::neutral().note());
        self.fan_out(&self.rerun_engines, ctx, None).await
    }

    async fn fan_out(
        &self,
        engines: &[Arc<dyn ReasoningEngine>],
        ctx: ReasoningContext,
        simulation: Option<SimulationResult>,
    ) -> Result<ReasoningReport, OrchestrationError> {
        // Engines see the deadline and wind down on their own; the outer
        // timeout only catches an engine that ignores it.
        let mark = self.usage.mark();
        let deadline = Instant::now() + self.engine_timeout;
        let ctx = Arc::new(ctx.with_deadline(deadline));
        let timeout = self.engine_timeout + BACKSTOP_GRACE;
        let mut join_set: JoinSet<(EngineId, Result<EngineResult, EngineError>)> = JoinSet::new();

        for engine in engines {
            let engine = engine.clone();
            let ctx = ctx.clone();
            join_set.spawn(async move {
                let id = engine.id();
                let result = match tokio::time::timeout(timeout, engine.reason(&ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::Timeout(timeout)),
                };
                (id, result)
            });
        }

        let mut results: BTreeMap<EngineId, EngineResult> = BTreeMap::new();
        let mut failures = Vec::new();
        let mut settled = BTreeSet::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((id, Ok(result))) => {
                    debug!(engine = %id, "engine finished");
                    settled.insert(id);
                    results.insert(id, result);
                }
                Ok((id, Err(e))) => {
                    warn!(engine = %id, error = %e, "engine failed");
                    settled.insert(id);
                    failures.push(EngineFailure {
                        engine: id,
                        reason: e.to_string(),
                    });
                }
                Err(e) => warn!(error = %e, "engine task panicked"),
            }
        }
        for engine in engines {
            let id = engine.id();
            if !settled.contains(&id) {
                failures.push(EngineFailure {
                    engine: id,
                    reason: "engine task panicked".into(),
                });
            }
        }

        if let Some(sim) = simulation {
            results.insert(EngineId::Simulation, EngineResult::simulation(sim));
        }

        if results.is_empty() {
            warn!(failed = failures.len(), "no engines produced a result");
            return Err(OrchestrationError::NoEnginesAvailable { failures });
        }

        let ensemble = self.aggregator.aggregate(&results, &ctx.outcomes)?;
        let causal_graph = match results.get(&EngineId::GraphOfThought).map(|r| &r.payload) {
            Some(EnginePayload::GraphOfThought(graph)) => graph.causal_graph.clone(),
            _ => CausalGraph::default(),
        };

        info!(
            engines_ok = results.len(),
            engines_failed = failures.len(),
            consensus = ensemble.consensus,
            "orchestration complete"
        );

        Ok(ReasoningReport {
            outcomes: ensemble.outcomes,
            engine_weights: ensemble.engine_weights,
            consensus: ensemble.consensus,
            engines: results,
            failures,
            causal_graph,
            usage: self.usage.summary_since(mark),
        })
    }
}
