//! Monte-Carlo tree search over reasoning branches.
//!
//! ```text
//! for each iteration:
//!   select      UCB1 descent to a leaf
//!   expand      2-3 generated branches (or 3 fixed analytical ones)
//!   evaluate    generated plausibility score (or uniform draw in the fallback range)
//!   backprop    leaf → root
//!   every `convergence_interval` iterations: stop if the best root child moved < tolerance
//! ```
//!
//! The tree lives for one `search` call. A context deadline ends the loop
//! early and the answer comes from the partial tree. Collaborator failures
//! never escape; only a zero iteration budget or an empty outcome list is an
//! error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fusion::distribution::{self, Distribution};
use fusion::ensemble::SearchTrace;
use fusion::extract;
use fusion::search::{NodeId, SearchTree};
use fusion::{DegradationReport, EngineId, EnginePayload, EngineResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use tracing::{debug, info};

use super::{ReasoningContext, ReasoningEngine};
use crate::config::SearchConfig;
use crate::errors::EngineError;
use crate::generation::{generate_structured, GenerationRequest, TaskTag, TextGenerator};
use crate::prompts;

/// Branches attached per expansion at most.
const MAX_BRANCHES: usize = 3;

/// Fixed analytical categories used when expansion fails.
const FALLBACK_BRANCHES: [(&str, &str); 3] = [
    ("Analyze economic factors", "Economic analysis"),
    ("Analyze political dynamics", "Political dynamics"),
    ("Analyze social sentiment", "Social sentiment"),
];

/// Per-outcome adjustment per unit of best-path value above 0.5.
const NUDGE_SCALE: f64 = 0.1;
const PROBABILITY_FLOOR: f64 = 0.05;
const PROBABILITY_CEILING: f64 = 0.95;

pub struct SearchEngine {
    generator: Arc<dyn TextGenerator>,
    config: SearchConfig,
    call_timeout: Duration,
}

impl SearchEngine {
    pub fn new(generator: Arc<dyn TextGenerator>, config: SearchConfig, call_timeout: Duration) -> Self {
        Self {
            generator,
            config,
            call_timeout,
        }
    }

    /// Same engine with a different iteration budget.
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.config.iterations = iterations;
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub async fn search(&self, ctx: &ReasoningContext) -> Result<EngineResult, EngineError> {
        if self.config.iterations == 0 {
            return Err(EngineError::Configuration(
                "search iterations must be positive".into(),
            ));
        }
        ctx.validate()?;

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut tree = SearchTree::new(format!("Root: {}", ctx.query), self.config.exploration);
        let mut report = DegradationReport::default();
        let interval = self.config.convergence_interval.max(1);
        let mut previous_best: Option<f64> = None;
        let mut converged = false;
        let mut iterations_run = 0;

        for iteration in 1..=self.config.iterations {
            if ctx.deadline_passed() {
                info!(iteration, "search deadline reached; answering from partial tree");
                break;
            }
            let mut node = tree.select();

            let depth = tree.depth(node);
            if depth < self.config.max_depth {
                let state = tree.node(node).state.clone();
                let timeout = ctx.call_timeout(self.call_timeout);
                let branches = self
                    .expand(&ctx.query, &state, depth, timeout, &mut report)
                    .await;
                let new_children: Vec<NodeId> = branches
                    .into_iter()
                    .map(|(action, child_state)| tree.add_child(node, child_state, action))
                    .collect();
                if let Some(&child) = new_children.choose(&mut rng) {
                    node = child;
                }
            }

            let state = tree.node(node).state.clone();
            let timeout = ctx.call_timeout(self.call_timeout);
            let score = self
                .evaluate(&ctx.query, &state, timeout, &mut report, &mut rng)
                .await;
            tree.backpropagate(node, score);
            iterations_run = iteration;

            if iteration % interval == 0 {
                if let Some(best) = tree.most_visited_child(tree.root()) {
                    let value = tree.mean_value(best);
                    if let Some(prev) = previous_best {
                        if (value - prev).abs() < self.config.convergence_tolerance {
                            info!(iteration, value, "search converged");
                            converged = true;
                            break;
                        }
                    }
                    previous_best = Some(value);
                }
            }
        }

        let top_paths: Vec<_> = tree
            .collect_paths()
            .into_iter()
            .take(self.config.top_paths)
            .collect();
        let best_value = top_paths.first().map(|p| p.mean_value);
        let probabilities = derive_probabilities(&ctx.outcomes, best_value, &mut rng);

        info!(
            iterations = iterations_run,
            converged,
            tree_size = tree.len(),
            fallbacks = report.fallbacks,
            "search complete"
        );

        let trace = SearchTrace {
            top_paths,
            iterations_run,
            converged,
            tree_size: tree.len(),
            max_depth: tree.max_depth(),
            confidence: best_value.unwrap_or(0.5),
            degradation: report,
        };
        Ok(EngineResult::new(probabilities, EnginePayload::Search(trace)))
    }

    /// Generated `(action, state)` branches, or the fixed fallback set.
    async fn expand(
        &self,
        query: &str,
        state: &str,
        depth: usize,
        timeout: Duration,
        report: &mut DegradationReport,
    ) -> Vec<(String, String)> {
        let (system, user) = prompts::search_expand(query, state, depth);
        let request = GenerationRequest::new(TaskTag::SearchExpand, system, user, timeout);

        let failure = match generate_structured(self.generator.as_ref(), &request).await {
            Ok(map) => match parse_branches(map.get("branches"), state) {
                Some(branches) => {
                    report.record_success();
                    return branches;
                }
                None => "no branches in response".to_string(),
            },
            Err(e) => e.to_string(),
        };

        debug!(depth, reason = %failure, "expansion fell back");
        report.record_fallback(format!("expand at depth {depth}: {failure}"));
        FALLBACK_BRANCHES
            .iter()
            .map(|(action, suffix)| (action.to_string(), format!("{state} → {suffix}")))
            .collect()
    }

    /// Plausibility score in [0, 1].
    async fn evaluate(
        &self,
        query: &str,
        state: &str,
        timeout: Duration,
        report: &mut DegradationReport,
        rng: &mut StdRng,
    ) -> f64 {
        let (system, user) = prompts::search_evaluate(query, state);
        let request = GenerationRequest::new(TaskTag::SearchEvaluate, system, user, timeout);

        let failure = match generate_structured(self.generator.as_ref(), &request).await {
            Ok(map) => match extract::f64_field(&map, "score") {
                Some(score) => {
                    report.record_success();
                    return score.clamp(0.0, 1.0);
                }
                None => "no score in response".to_string(),
            },
            Err(e) => e.to_string(),
        };

        debug!(reason = %failure, "evaluation fell back");
        report.record_fallback(format!("evaluate: {failure}"));
        let [lo, hi] = self.config.fallback_score_range;
        if lo < hi {
            rng.gen_range(lo..=hi)
        } else {
            lo
        }
    }
}

#[async_trait]
impl ReasoningEngine for SearchEngine {
    fn id(&self) -> EngineId {
        EngineId::Search
    }

    async fn reason(&self, ctx: &ReasoningContext) -> Result<EngineResult, EngineError> {
        self.search(ctx).await
    }
}

/// Up to three branches; `None` when the list is missing or empty.
fn parse_branches(value: Option<&Value>, state: &str) -> Option<Vec<(String, String)>> {
    let items = value?.as_array()?;
    let branches: Vec<(String, String)> = items
        .iter()
        .filter_map(Value::as_object)
        .take(MAX_BRANCHES)
        .map(|b| {
            let action = extract::string_field(b, "action").unwrap_or_else(|| "explore".into());
            let child_state =
                extract::string_field(b, "state").unwrap_or_else(|| format!("{state} → {action}"));
            (action, child_state)
        })
        .collect();
    (!branches.is_empty()).then_some(branches)
}

/// Random near-uniform split nudged toward the first outcome by the best path value.
fn derive_probabilities(outcomes: &[String], best_value: Option<f64>, rng: &mut StdRng) -> Distribution {
    let mut probs: Distribution = outcomes
        .iter()
        .map(|o| (o.clone(), rng.gen_range(0.1..0.5)))
        .collect();
    distribution::normalize(&mut probs);

    if let Some(best) = best_value {
        let adjustment = (best - 0.5) * NUDGE_SCALE;
        for (i, outcome) in outcomes.iter().enumerate() {
            let direction = if i == 0 { 1.0 } else { -0.5 };
            if let Some(p) = probs.get_mut(outcome) {
                *p += adjustment * direction;
            }
        }
    }

    for p in probs.values_mut() {
        *p = p.clamp(PROBABILITY_FLOOR, PROBABILITY_CEILING);
    }
    distribution::normalize(&mut probs);
    probs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::mock::{Hanging, Scripted};
    use crate::errors::GenerationError;

    fn ctx() -> ReasoningContext {
        ReasoningContext::new(
            "Who wins the election?",
            vec!["Government".into(), "Opposition".into(), "Hung".into()],
            "gdp_growth=1.2",
        )
    }

    fn config(iterations: u32) -> SearchConfig {
        SearchConfig {
            iterations,
            seed: Some(7),
            ..SearchConfig::default()
        }
    }

    fn engine(generator: Arc<dyn TextGenerator>, iterations: u32) -> SearchEngine {
        SearchEngine::new(generator, config(iterations), Duration::from_secs(5))
    }

    fn trace(result: &EngineResult) -> &SearchTrace {
        match &result.payload {
            EnginePayload::Search(t) => t,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    /// Two branches per expansion, constant score.
    fn well_behaved() -> Scripted {
        Scripted::new(|req| match req.task {
            TaskTag::SearchExpand => Ok(r#"{"branches": [
                {"action": "polls", "state": "polls favour incumbents"},
                {"action": "economy"}
            ]}"#
            .into()),
            TaskTag::SearchEvaluate => Ok(r#"{"score": 0.6, "rationale": "ok"}"#.into()),
            _ => Err(GenerationError::Configuration("unexpected task".into())),
        })
    }

    #[tokio::test]
    async fn failing_generator_still_yields_distribution() {
        let generator = Arc::new(Scripted::failing());
        let result = engine(generator.clone(), 12).search(&ctx()).await.unwrap();
        assert_eq!(result.engine(), EngineId::Search);
        assert_eq!(result.outcome_probabilities.len(), 3);
        let total: f64 = result.outcome_probabilities.values().sum();
        assert!((total - 1.0).abs() < 1e-2);

        let t = trace(&result);
        assert_eq!(t.iterations_run, 12);
        assert!(t.degradation.is_degraded());
        assert_eq!(t.degradation.calls, t.degradation.fallbacks);
        assert_eq!(generator.calls(), t.degradation.calls as usize);
        // root plus three fallback branches per expansion
        assert!(t.tree_size >= 4);
        assert!(t.top_paths.iter().all(|p| (0.3..=0.7).contains(&p.mean_value)));
    }

    #[tokio::test]
    async fn fallback_branches_use_fixed_categories() {
        let result = engine(Arc::new(Scripted::failing()), 1).search(&ctx()).await.unwrap();
        let t = trace(&result);
        assert_eq!(t.tree_size, 4);
        assert_eq!(t.top_paths.len(), 1);
        let path = &t.top_paths[0];
        assert!(FALLBACK_BRANCHES
            .iter()
            .any(|(action, _)| path.description == format!("root → {action}")));
        assert!(path.leaf_state.starts_with("Root: Who wins the election? → "));
    }

    #[tokio::test]
    async fn generated_branches_are_attached() {
        let result = engine(Arc::new(well_behaved()), 1).search(&ctx()).await.unwrap();
        let t = trace(&result);
        assert_eq!(t.tree_size, 3);
        let state = &t.top_paths[0].leaf_state;
        assert!(
            state == "polls favour incumbents" || state == "Root: Who wins the election? → economy"
        );
        assert!(!t.degradation.is_degraded());
    }

    #[tokio::test]
    async fn constant_scores_converge_early() {
        let result = engine(Arc::new(well_behaved()), 80).search(&ctx()).await.unwrap();
        let t = trace(&result);
        assert!(t.converged);
        assert_eq!(t.iterations_run, 40);
        assert!((t.confidence - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn strong_best_path_favours_first_outcome() {
        let generator = Scripted::new(|req| match req.task {
            TaskTag::SearchEvaluate => Ok(r#"{"score": 1.0}"#.into()),
            _ => Err(GenerationError::Transport("down".into())),
        });
        let a = engine(Arc::new(generator), 5).search(&ctx()).await.unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let baseline = derive_probabilities(&ctx().outcomes, None, &mut rng);
        let mut rng = StdRng::seed_from_u64(7);
        let nudged = derive_probabilities(&ctx().outcomes, Some(1.0), &mut rng);
        assert!(nudged["Government"] > baseline["Government"]);
        assert!(nudged["Opposition"] < baseline["Opposition"]);
        assert!((a.outcome_probabilities.values().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn same_seed_same_result() {
        let a = engine(Arc::new(Scripted::failing()), 10).search(&ctx()).await.unwrap();
        let b = engine(Arc::new(Scripted::failing()), 10).search(&ctx()).await.unwrap();
        assert_eq!(a.outcome_probabilities, b.outcome_probabilities);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_generator_times_out_into_fallback() {
        let result = engine(Arc::new(Hanging), 2).search(&ctx()).await.unwrap();
        let t = trace(&result);
        assert_eq!(t.iterations_run, 2);
        assert_eq!(t.degradation.fallbacks, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_the_loop_with_a_partial_tree() {
        let ctx = ctx().with_deadline(tokio::time::Instant::now() + Duration::from_secs(12));
        let result = engine(Arc::new(Hanging), 50).search(&ctx).await.unwrap();
        let t = trace(&result);
        // 5s + 5s, then 2s and 0s against the deadline
        assert_eq!(t.iterations_run, 2);
        assert!(!t.converged);
        assert_eq!(t.degradation.fallbacks, 4);
        assert!(t.tree_size > 1);
        assert_eq!(result.outcome_probabilities.len(), 3);
        let total: f64 = result.outcome_probabilities.values().sum();
        assert!((total - 1.0).abs() < 1e-2);
    }

    #[tokio::test]
    async fn zero_iterations_is_a_configuration_error() {
        let generator = Arc::new(Scripted::failing());
        let err = engine(generator.clone(), 0).search(&ctx()).await.unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert_eq!(generator.calls(), 0);
    }

    #[test]
    fn branches_are_capped_and_defaulted() {
        let v: Value = serde_json::json!([
            {"action": "a"}, {"state": "s"}, {"action": "c", "state": "t"}, {"action": "d"}
        ]);
        let b = parse_branches(Some(&v), "S").unwrap();
        assert_eq!(b.len(), 3);
        assert_eq!(b[0], ("a".into(), "S → a".into()));
        assert_eq!(b[1], ("explore".into(), "s".into()));
        assert!(parse_branches(Some(&serde_json::json!([])), "S").is_none());
        assert!(parse_branches(None, "S").is_none());
    }

    #[test]
    fn probabilities_stay_inside_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        let p = derive_probabilities(&["A".to_string(), "B".to_string()], Some(1.0), &mut rng);
        assert!(p.values().all(|v| (0.0..=1.0).contains(v)));
        let single = derive_probabilities(&["A".to_string()], Some(0.9), &mut rng);
        assert!((single["A"] - 1.0).abs() < 1e-12);
    }
}
