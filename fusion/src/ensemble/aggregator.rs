//! Weighted fusion of heterogeneous engine results.
//!
//! Nominal engine weights are renormalized over the engines that actually
//! contributed, so a missing engine's share is redistributed proportionally
//! among the survivors. Disagreement between engines drives both the
//! confidence intervals and the consensus score.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::result::{EngineId, EngineResult};
use crate::distribution::{self, Distribution};
use crate::error::{FusionError, FusionResult};

/// Weight given to an engine absent from the weight table.
pub const UNLISTED_ENGINE_WEIGHT: f64 = 0.1;

/// Interval half-width used when fewer than two engines contributed.
pub const SINGLE_ENGINE_HALF_WIDTH: f64 = 0.1;

/// Interval half-width of the no-engine degenerate result.
pub const DEGENERATE_HALF_WIDTH: f64 = 0.15;

/// z-score of a two-sided 95% normal interval.
const Z_95: f64 = 1.96;

/// Nominal weight per engine family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnsembleWeights(pub BTreeMap<EngineId, f64>);

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self(
            [
                (EngineId::GraphOfThought, 0.40),
                (EngineId::Simulation, 0.25),
                (EngineId::Search, 0.20),
                (EngineId::Debate, 0.15),
            ]
            .into(),
        )
    }
}

impl EnsembleWeights {
    /// Nominal weight of `engine`, falling back to [`UNLISTED_ENGINE_WEIGHT`].
    pub fn get(&self, engine: EngineId) -> f64 {
        self.0.get(&engine).copied().unwrap_or(UNLISTED_ENGINE_WEIGHT)
    }

    pub fn validate(&self) -> FusionResult<()> {
        match self.0.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            Some((engine, weight)) => Err(FusionError::InvalidWeight {
                engine: engine.to_string(),
                weight: *weight,
            }),
            None => Ok(()),
        }
    }
}

/// One fused outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedOutcome {
    pub name: String,
    pub probability: f64,
    /// `[lo, hi]` with `0 ≤ lo ≤ probability ≤ hi ≤ 1`.
    pub confidence_interval: [f64; 2],
    /// Probability each contributing engine assigned to this outcome.
    pub engine_breakdown: BTreeMap<EngineId, f64>,
}

/// Fused distribution plus agreement metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub outcomes: Vec<FusedOutcome>,
    /// Effective weights over contributing engines; sums to 1 unless empty.
    pub engine_weights: BTreeMap<EngineId, f64>,
    /// 1 = identical engine outputs, 0 = maximal disagreement.
    pub consensus: f64,
}

impl EnsembleResult {
    pub fn distribution(&self) -> Distribution {
        self.outcomes
            .iter()
            .map(|o| (o.name.clone(), o.probability))
            .collect()
    }

    pub fn probability_of(&self, name: &str) -> Option<f64> {
        self.outcomes
            .iter()
            .find(|o| o.name == name)
            .map(|o| o.probability)
    }

    /// Outcome with the highest fused probability.
    pub fn leading(&self) -> Option<&FusedOutcome> {
        self.outcomes
            .iter()
            .max_by(|a, b| a.probability.total_cmp(&b.probability))
    }
}

/// Combines engine results into one distribution.
#[derive(Debug, Clone, Default)]
pub struct EnsembleAggregator {
    weights: EnsembleWeights,
}

impl EnsembleAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weights(weights: EnsembleWeights) -> FusionResult<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &EnsembleWeights {
        &self.weights
    }

    /// Fuse `results` over `outcomes`.
    ///
    /// Never mutates its inputs. With no contributing engine the result is a
    /// uniform distribution with consensus 0.
    pub fn aggregate(
        &self,
        results: &BTreeMap<EngineId, EngineResult>,
        outcomes: &[String],
    ) -> FusionResult<EnsembleResult> {
        check_outcomes(outcomes)?;

        let engine_probs: BTreeMap<EngineId, Distribution> = results
            .iter()
            .filter_map(|(id, result)| {
                let probs: Distribution = result
                    .extract_probabilities(outcomes)
                    .into_iter()
                    .map(|(k, v)| (k, if v.is_finite() { v.max(0.0) } else { 0.0 }))
                    .collect();
                if probs.is_empty() {
                    debug!(engine = %id, "engine contributed no probabilities");
                    None
                } else {
                    Some((*id, probs))
                }
            })
            .collect();

        if engine_probs.is_empty() {
            info!(outcomes = outcomes.len(), "no engine contributed, returning uniform");
            return Ok(degenerate(outcomes));
        }

        let engine_weights = self.active_weights(engine_probs.keys().copied());

        let mut fused: Distribution = outcomes
            .iter()
            .map(|o| {
                let p = engine_probs
                    .iter()
                    .map(|(id, probs)| probs.get(o).copied().unwrap_or(0.0) * engine_weights[id])
                    .sum();
                (o.clone(), p)
            })
            .collect();
        if !distribution::normalize(&mut fused) {
            fused = distribution::uniform(outcomes);
        }

        let fused_outcomes = outcomes
            .iter()
            .map(|o| {
                let breakdown: BTreeMap<EngineId, f64> = engine_probs
                    .iter()
                    .map(|(id, probs)| (*id, probs.get(o).copied().unwrap_or(0.0)))
                    .collect();
                let values: Vec<f64> = breakdown.values().copied().collect();
                let half_width = if values.len() >= 2 {
                    Z_95 * sample_std(&values)
                } else {
                    SINGLE_ENGINE_HALF_WIDTH
                };
                let p = fused[o];
                FusedOutcome {
                    name: o.clone(),
                    probability: p,
                    confidence_interval: [(p - half_width).max(0.0), (p + half_width).min(1.0)],
                    engine_breakdown: breakdown,
                }
            })
            .collect();

        let consensus = consensus(&engine_probs, outcomes);

        info!(
            engines = ?engine_probs.keys().map(ToString::to_string).collect::<Vec<_>>(),
            consensus,
            "ensemble fused"
        );

        Ok(EnsembleResult {
            outcomes: fused_outcomes,
            engine_weights,
            consensus,
        })
    }

    fn active_weights(&self, engines: impl Iterator<Item = EngineId>) -> BTreeMap<EngineId, f64> {
        let mut active: BTreeMap<EngineId, f64> =
            engines.map(|id| (id, self.weights.get(id))).collect();
        let total: f64 = active.values().sum();
        if total > 0.0 {
            active.values_mut().for_each(|w| *w /= total);
        } else {
            let equal = 1.0 / active.len() as f64;
            active.values_mut().for_each(|w| *w = equal);
        }
        active
    }
}

fn check_outcomes(outcomes: &[String]) -> FusionResult<()> {
    if outcomes.is_empty() {
        return Err(FusionError::NoOutcomes);
    }
    let mut seen = HashSet::new();
    match outcomes.iter().find(|o| !seen.insert(o.as_str())) {
        Some(dup) => Err(FusionError::DuplicateOutcome(dup.clone())),
        None => Ok(()),
    }
}

fn degenerate(outcomes: &[String]) -> EnsembleResult {
    let share = 1.0 / outcomes.len() as f64;
    EnsembleResult {
        outcomes: outcomes
            .iter()
            .map(|o| FusedOutcome {
                name: o.clone(),
                probability: share,
                confidence_interval: [
                    (share - DEGENERATE_HALF_WIDTH).max(0.0),
                    (share + DEGENERATE_HALF_WIDTH).min(1.0),
                ],
                engine_breakdown: BTreeMap::new(),
            })
            .collect(),
        engine_weights: BTreeMap::new(),
        consensus: 0.0,
    }
}

/// Sample standard deviation (n − 1 denominator).
pub fn sample_std(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    variance.sqrt()
}

/// `1 − 2·mean |p_i − p_j|` over every engine pair and outcome, floored at 0.
///
/// A single engine agrees with itself: 1.
pub fn consensus(engine_probs: &BTreeMap<EngineId, Distribution>, outcomes: &[String]) -> f64 {
    if engine_probs.len() < 2 {
        return 1.0;
    }
    let probs: Vec<&Distribution> = engine_probs.values().collect();
    let mut total_diff = 0.0;
    let mut pairs = 0usize;
    for (i, a) in probs.iter().enumerate() {
        for b in &probs[i + 1..] {
            for o in outcomes {
                let pa = a.get(o).copied().unwrap_or(0.0);
                let pb = b.get(o).copied().unwrap_or(0.0);
                total_diff += (pa - pb).abs();
                pairs += 1;
            }
        }
    }
    let avg = total_diff / pairs.max(1) as f64;
    (1.0 - 2.0 * avg).max(0.0)
}
