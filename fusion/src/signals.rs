//! Triple signal fusion: model ensemble, crowd, and reputation-weighted crowd.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::drift::Severity;
use crate::ensemble::EnsembleResult;

/// Probability one signal source assigns to an outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSignal {
    pub name: String,
    pub probability: f64,
}

impl OutcomeSignal {
    pub fn new(name: impl Into<String>, probability: f64) -> Self {
        Self {
            name: name.into(),
            probability,
        }
    }

    /// The fused ensemble distribution as a signal.
    pub fn from_ensemble(result: &EnsembleResult) -> Vec<Self> {
        result
            .outcomes
            .iter()
            .map(|o| Self::new(o.name.clone(), o.probability))
            .collect()
    }
}

fn lookup(signal: &[OutcomeSignal], name: &str) -> Option<f64> {
    signal
        .iter()
        .find(|o| o.name == name)
        .map(|o| o.probability)
}

/// Relative weight of each source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub ai: f64,
    pub crowd: f64,
    pub reputation: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            ai: 0.50,
            crowd: 0.30,
            reputation: 0.20,
        }
    }
}

/// A disagreement worth flagging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalAnomaly {
    pub severity: Severity,
    pub outcome: String,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedSignal {
    /// Sorted by outcome name, normalized to sum to 1.
    pub outcomes: Vec<OutcomeSignal>,
    pub anomalies: Vec<SignalAnomaly>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalFusion {
    pub weights: SignalWeights,
    /// AI vs crowd gap above which a warning is raised.
    pub divergence_warning: f64,
    /// Pairwise gap all three sources must exceed for a critical anomaly.
    pub disagreement_critical: f64,
}

impl Default for SignalFusion {
    fn default() -> Self {
        Self {
            weights: SignalWeights::default(),
            divergence_warning: 0.25,
            disagreement_critical: 0.20,
        }
    }
}

impl SignalFusion {
    /// Weighted fusion over the union of outcome names, plus anomalies.
    ///
    /// A source missing an outcome contributes nothing for it.
    pub fn fuse(
        &self,
        ai: &[OutcomeSignal],
        crowd: &[OutcomeSignal],
        reputation: &[OutcomeSignal],
    ) -> FusedSignal {
        let names: BTreeSet<&str> = ai
            .iter()
            .chain(crowd)
            .chain(reputation)
            .map(|o| o.name.as_str())
            .collect();

        let sources = [
            (ai, self.weights.ai),
            (crowd, self.weights.crowd),
            (reputation, self.weights.reputation),
        ];
        let mut outcomes: Vec<OutcomeSignal> = names
            .into_iter()
            .map(|name| {
                let p = sources
                    .iter()
                    .filter_map(|(signal, w)| lookup(signal, name).map(|p| p * w))
                    .sum();
                OutcomeSignal::new(name, p)
            })
            .collect();

        let total: f64 = outcomes.iter().map(|o| o.probability).sum();
        if total > 0.0 {
            outcomes.iter_mut().for_each(|o| o.probability /= total);
        }

        FusedSignal {
            outcomes,
            anomalies: self.detect_anomalies(ai, crowd, reputation),
        }
    }

    fn detect_anomalies(
        &self,
        ai: &[OutcomeSignal],
        crowd: &[OutcomeSignal],
        reputation: &[OutcomeSignal],
    ) -> Vec<SignalAnomaly> {
        let mut anomalies = Vec::new();
        for a in ai {
            let Some(c) = lookup(crowd, &a.name) else {
                continue;
            };
            if (a.probability - c).abs() > self.divergence_warning {
                anomalies.push(SignalAnomaly {
                    severity: Severity::Warning,
                    outcome: a.name.clone(),
                    details: format!(
                        "{}: AI={:.0}% vs Crowd={:.0}%",
                        a.name,
                        a.probability * 100.0,
                        c * 100.0
                    ),
                });
            }
            if let Some(r) = lookup(reputation, &a.name) {
                let gaps = [(a.probability - c).abs(), (a.probability - r).abs(), (c - r).abs()];
                if gaps.iter().all(|g| *g > self.disagreement_critical) {
                    anomalies.push(SignalAnomaly {
                        severity: Severity::Critical,
                        outcome: a.name.clone(),
                        details: format!("{}: all three signals disagree", a.name),
                    });
                }
            }
        }
        anomalies
    }
}
