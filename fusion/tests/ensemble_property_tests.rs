//! Ensemble fusion property tests: validation of the fused distribution
//! across varied engine mixes.
//!
//! Tests verify:
//! - Fused probabilities sum to 1
//! - Every confidence interval brackets its probability inside [0, 1]
//! - Single-engine and zero-engine consensus
//! - High agreement yields high consensus, high spread yields low consensus
//! - Missing engines redistribute their weight

use std::collections::BTreeMap;

use fusion::distribution::Distribution;
use fusion::ensemble::{
    EngineId, EnginePayload, EngineResult, EnsembleAggregator, EnsembleResult, GraphReasoning,
    ScoredOutcome, SimulationResult, SupportSplit,
};

fn names(xs: &[&str]) -> Vec<String> {
    xs.iter().map(|s| s.to_string()).collect()
}

fn dist(pairs: &[(&str, f64)]) -> Distribution {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

/// An engine result whose probabilities come from the graph-of-thought outcome list.
fn graph_result(pairs: &[(&str, f64)]) -> EngineResult {
    EngineResult::new(
        Distribution::new(),
        EnginePayload::GraphOfThought(GraphReasoning {
            outcomes: pairs
                .iter()
                .map(|(n, p)| ScoredOutcome {
                    name: n.to_string(),
                    probability: *p,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
    )
}

/// An engine result with a direct mapping, tagged as the given engine.
fn direct(engine: EngineId, pairs: &[(&str, f64)]) -> (EngineId, EngineResult) {
    let payload = match engine {
        EngineId::Simulation => EnginePayload::Simulation(SimulationResult::neutral()),
        _ => EnginePayload::GraphOfThought(GraphReasoning::default()),
    };
    (engine, EngineResult::new(dist(pairs), payload))
}

fn assert_well_formed(result: &EnsembleResult) {
    let total: f64 = result.outcomes.iter().map(|o| o.probability).sum();
    assert!((total - 1.0).abs() < 1e-2, "probabilities sum to {total}");
    for o in &result.outcomes {
        let [lo, hi] = o.confidence_interval;
        assert!(lo <= o.probability && o.probability <= hi, "{o:?}");
        assert!((0.0..=1.0).contains(&lo) && (0.0..=1.0).contains(&hi), "{o:?}");
    }
    assert!((0.0..=1.0).contains(&result.consensus));
}

/// Deterministic pseudo-random stream for input variety.
fn stream(seed: u64) -> impl FnMut() -> f64 {
    let mut state = seed;
    move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 11) as f64 / (1u64 << 53) as f64
    }
}

// ── Property: distribution and interval shape ──────────────────────

#[test]
fn prop_fused_distribution_is_well_formed() {
    let outcomes = names(&["A", "B", "C", "D"]);
    let agg = EnsembleAggregator::new();
    let mut next = stream(7);

    for engines in 1..=4 {
        for _ in 0..25 {
            let mut results = BTreeMap::new();
            for id in EngineId::ALL.iter().take(engines) {
                let probs: Distribution = outcomes
                    .iter()
                    .map(|o| (o.clone(), next() * 3.0))
                    .collect();
                results.insert(*id, EngineResult::new(probs, EnginePayload::GraphOfThought(GraphReasoning::default())));
            }
            let fused = agg.aggregate(&results, &outcomes).unwrap();
            assert_eq!(fused.outcomes.len(), outcomes.len());
            assert_well_formed(&fused);
            let weight_total: f64 = fused.engine_weights.values().sum();
            assert!((weight_total - 1.0).abs() < 1e-9);
        }
    }
}

#[test]
fn prop_partial_outcome_coverage_is_well_formed() {
    let outcomes = names(&["A", "B", "C"]);
    let results: BTreeMap<_, _> = [
        direct(EngineId::Search, &[("A", 0.9)]),
        direct(EngineId::Debate, &[("C", 0.4), ("Z", 0.6)]),
    ]
    .into();
    let fused = EnsembleAggregator::new().aggregate(&results, &outcomes).unwrap();
    assert_well_formed(&fused);
    assert_eq!(fused.outcomes[1].probability, 0.0);
}

// ── Property: consensus boundaries ─────────────────────────────────

#[test]
fn single_engine_consensus_is_one() {
    let outcomes = names(&["A", "B"]);
    let results: BTreeMap<_, _> = [(EngineId::GraphOfThought, graph_result(&[("A", 0.8), ("B", 0.2)]))].into();
    let fused = EnsembleAggregator::new().aggregate(&results, &outcomes).unwrap();
    assert_eq!(fused.consensus, 1.0);
    assert_well_formed(&fused);
    let a = &fused.outcomes[0];
    assert!((a.probability - 0.8).abs() < 1e-12);
    assert!((a.confidence_interval[0] - 0.7).abs() < 1e-12);
    assert!((a.confidence_interval[1] - 0.9).abs() < 1e-12);
}

#[test]
fn zero_engines_give_uniform_with_zero_consensus() {
    let outcomes = names(&["A", "B", "C", "D"]);
    let fused = EnsembleAggregator::new().aggregate(&BTreeMap::new(), &outcomes).unwrap();
    assert_eq!(fused.consensus, 0.0);
    assert!(fused.engine_weights.is_empty());
    for o in &fused.outcomes {
        assert!((o.probability - 0.25).abs() < 1e-12);
        assert!((o.confidence_interval[0] - 0.10).abs() < 1e-12);
        assert!((o.confidence_interval[1] - 0.40).abs() < 1e-12);
        assert!(o.engine_breakdown.is_empty());
    }
}

#[test]
fn engines_without_recognized_shape_contribute_nothing() {
    let outcomes = names(&["A", "B", "C"]);
    // Simulation needs exactly two leading outcomes; the graph result is empty.
    let results: BTreeMap<_, _> = [
        (EngineId::GraphOfThought, graph_result(&[])),
        (
            EngineId::Simulation,
            EngineResult::simulation(SimulationResult::neutral()),
        ),
    ]
    .into();
    let fused = EnsembleAggregator::new().aggregate(&results, &names(&["A"])).unwrap();
    assert_eq!(fused.consensus, 0.0);

    let fused = EnsembleAggregator::new().aggregate(&results, &outcomes).unwrap();
    assert_eq!(fused.engine_weights.keys().copied().collect::<Vec<_>>(), vec![EngineId::Simulation]);
}

// ── Scenario: agreement vs spread ──────────────────────────────────

#[test]
fn agreeing_engines_fuse_tightly() {
    let outcomes = names(&["A", "B"]);
    let results: BTreeMap<_, _> = [
        direct(EngineId::Search, &[("A", 0.5), ("B", 0.5)]),
        direct(EngineId::Debate, &[("A", 0.52), ("B", 0.48)]),
        direct(EngineId::GraphOfThought, &[("A", 0.49), ("B", 0.51)]),
    ]
    .into();
    let fused = EnsembleAggregator::new().aggregate(&results, &outcomes).unwrap();
    assert_well_formed(&fused);
    assert!(fused.consensus > 0.8, "consensus {}", fused.consensus);
    for o in &fused.outcomes {
        assert!((o.probability - 0.5).abs() < 0.02);
        let width = o.confidence_interval[1] - o.confidence_interval[0];
        assert!(width < 0.1, "interval too wide: {width}");
        assert_eq!(o.engine_breakdown.len(), 3);
    }
}

#[test]
fn spread_engines_have_low_consensus() {
    let outcomes = names(&["A", "B"]);
    let results: BTreeMap<_, _> = [
        direct(EngineId::Search, &[("A", 0.9), ("B", 0.1)]),
        direct(EngineId::Debate, &[("A", 0.2), ("B", 0.8)]),
        direct(EngineId::GraphOfThought, &[("A", 0.5), ("B", 0.5)]),
    ]
    .into();
    let fused = EnsembleAggregator::new().aggregate(&results, &outcomes).unwrap();
    assert_well_formed(&fused);
    assert!(fused.consensus < 0.5, "consensus {}", fused.consensus);
    // 1 − 2·(2.8 / 6)
    assert!((fused.consensus - (1.0 - 2.0 * 2.8 / 6.0)).abs() < 1e-9);
}

// ── Property: weight redistribution ────────────────────────────────

#[test]
fn missing_engine_weight_is_redistributed() {
    let outcomes = names(&["Gov", "Opp"]);
    let results: BTreeMap<_, _> = [
        direct(EngineId::Search, &[("Gov", 1.0), ("Opp", 0.0)]),
        (
            EngineId::Simulation,
            EngineResult::simulation(SimulationResult {
                final_distribution: SupportSplit::from_government(0.0),
                agent_count: 10,
                ticks: 5,
            }),
        ),
    ]
    .into();
    let fused = EnsembleAggregator::new().aggregate(&results, &outcomes).unwrap();
    let search_w = 0.20 / 0.45;
    assert!((fused.engine_weights[&EngineId::Search] - search_w).abs() < 1e-12);
    assert!((fused.probability_of("Gov").unwrap() - search_w).abs() < 1e-12);
    assert_eq!(fused.leading().unwrap().name, "Opp");
}

#[test]
fn aggregation_does_not_mutate_inputs() {
    let outcomes = names(&["A", "B"]);
    let results: BTreeMap<_, _> = [direct(EngineId::Search, &[("A", 3.0), ("B", 1.0)])].into();
    let before = serde_json::to_string(&results).unwrap();
    let _ = EnsembleAggregator::new().aggregate(&results, &outcomes).unwrap();
    assert_eq!(serde_json::to_string(&results).unwrap(), before);
}
