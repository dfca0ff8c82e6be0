//! Outcome-probability mappings and the small arithmetic shared by every engine.

use std::collections::BTreeMap;

/// Outcome name → probability. Ordered so serialized output is stable.
pub type Distribution = BTreeMap<String, f64>;

/// Equal share for every outcome. Empty input gives an empty map.
pub fn uniform(outcomes: &[String]) -> Distribution {
    if outcomes.is_empty() {
        return Distribution::new();
    }
    let share = 1.0 / outcomes.len() as f64;
    outcomes.iter().map(|o| (o.clone(), share)).collect()
}

/// Sum of all probabilities.
pub fn total(dist: &Distribution) -> f64 {
    dist.values().sum()
}

/// Scale in place so the values sum to 1.
///
/// Returns `false` (leaving the map untouched) when the mass is zero or not finite.
pub fn normalize(dist: &mut Distribution) -> bool {
    let sum = total(dist);
    if sum <= 0.0 || !sum.is_finite() {
        return false;
    }
    for p in dist.values_mut() {
        *p /= sum;
    }
    true
}

/// Restrict `dist` to exactly `outcomes` and renormalize.
///
/// Missing outcomes get 0, negative values are clamped to 0, extra keys are
/// dropped. `None` when nothing usable remains.
pub fn conform(dist: &Distribution, outcomes: &[String]) -> Option<Distribution> {
    let mut out: Distribution = outcomes
        .iter()
        .map(|o| {
            let p = dist.get(o).copied().unwrap_or(0.0);
            (o.clone(), if p.is_finite() { p.max(0.0) } else { 0.0 })
        })
        .collect();
    normalize(&mut out).then_some(out)
}
