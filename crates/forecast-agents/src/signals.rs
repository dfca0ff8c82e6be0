//! Compare a finished forecast against crowd and reputation-weighted signals.

use fusion::drift::{DriftEvent, DriftMonitor, DriftThresholds, SignalSnapshot};
use fusion::signals::{FusedSignal, OutcomeSignal, SignalFusion};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::orchestrator::ReasoningReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalReview {
    pub fused: FusedSignal,
    pub drift: Vec<DriftEvent>,
}

impl ReasoningReport {
    /// The fused engine distribution as the model signal.
    pub fn ai_signal(&self) -> Vec<OutcomeSignal> {
        self.outcomes
            .iter()
            .map(|o| OutcomeSignal::new(o.name.clone(), o.probability))
            .collect()
    }
}

/// Fuse the report with external signals and scan for model/crowd divergence.
pub fn review_signals(
    market_id: &str,
    report: &ReasoningReport,
    crowd: Vec<OutcomeSignal>,
    reputation: Vec<OutcomeSignal>,
    fusion: &SignalFusion,
    thresholds: &DriftThresholds,
) -> SignalReview {
    let snapshot = SignalSnapshot {
        market_id: market_id.to_string(),
        ai: report.ai_signal(),
        crowd,
        reputation,
    };
    let fused = fusion.fuse(&snapshot.ai, &snapshot.crowd, &snapshot.reputation);
    for anomaly in &fused.anomalies {
        warn!(severity = ?anomaly.severity, outcome = %anomaly.outcome, "{}", anomaly.details);
    }

    let drift = DriftMonitor::new(thresholds.clone()).check_signal_divergence(&[snapshot]);
    for event in &drift {
        warn!(severity = ?event.severity, action = %event.action, "Signal divergence");
    }
    SignalReview { fused, drift }
}
