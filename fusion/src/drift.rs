//! Drift monitor: detects when the inputs behind a forecast go stale.
//!
//! Four checks, each producing [`DriftEvent`]s:
//!
//! | Check | Trigger |
//! |---|---|
//! | data expiry | a data source has not synced within its freshness window |
//! | causal decay | a causal edge's weight has decayed since last validation |
//! | calibration drift | recent Brier scores are worse than early ones |
//! | signal divergence | the model and the crowd disagree on an outcome |
//!
//! Thresholds are configuration defaults carried over unchanged; none of
//! them is derived from data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::distribution::Distribution;
use crate::signals::OutcomeSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    DataExpiry,
    CausalDecay,
    CalibrationDrift,
    SignalDivergence,
}

impl std::fmt::Display for DriftKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DataExpiry => write!(f, "data_expiry"),
            Self::CausalDecay => write!(f, "causal_decay"),
            Self::CalibrationDrift => write!(f, "calibration_drift"),
            Self::SignalDivergence => write!(f, "signal_divergence"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessStatus {
    Fresh,
    Stale,
    Expired,
}

/// Detection thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftThresholds {
    /// Per-day decay applied to edges without their own rate.
    pub decay_rate: f64,
    /// Decayed/original ratio below which an edge is critical.
    pub decay_critical_ratio: f64,
    /// Decayed/original ratio below which an edge warns.
    pub decay_warning_ratio: f64,
    /// Brier history length needed before calibration is judged.
    pub calibration_min_samples: usize,
    /// Recent-minus-early mean Brier score that counts as drift.
    pub calibration_delta: f64,
    /// Fraction of the expiry window after which a source is stale.
    pub stale_fraction: f64,
    /// AI vs crowd gap above which a warning is raised.
    pub divergence_warning: f64,
    /// AI vs crowd gap at which the divergence is critical.
    pub divergence_critical: f64,
}

impl Default for DriftThresholds {
    fn default() -> Self {
        Self {
            decay_rate: 0.03,
            decay_critical_ratio: 0.1,
            decay_warning_ratio: 0.3,
            calibration_min_samples: 10,
            calibration_delta: 0.1,
            stale_fraction: 0.7,
            divergence_warning: 0.30,
            divergence_critical: 0.40,
        }
    }
}

impl DriftThresholds {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..1.0).contains(&self.decay_rate) {
            return Err(format!("decay_rate must be in [0, 1), got {}", self.decay_rate));
        }
        if self.decay_critical_ratio > self.decay_warning_ratio {
            return Err("decay_critical_ratio must not exceed decay_warning_ratio".into());
        }
        if self.divergence_warning > self.divergence_critical {
            return Err("divergence_warning must not exceed divergence_critical".into());
        }
        if !(0.0..=1.0).contains(&self.stale_fraction) {
            return Err(format!("stale_fraction must be in [0, 1], got {}", self.stale_fraction));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub name: String,
    pub days_since_sync: f64,
    #[serde(default = "default_expiry_days")]
    pub expiry_days: f64,
    #[serde(default = "default_freshness")]
    pub status: FreshnessStatus,
}

fn default_expiry_days() -> f64 {
    7.0
}

fn default_freshness() -> FreshnessStatus {
    FreshnessStatus::Fresh
}

/// A validated causal relationship whose weight decays over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalEdgeWeight {
    pub id: String,
    pub source: String,
    pub target: String,
    pub original_weight: f64,
    pub current_weight: f64,
    /// Overrides [`DriftThresholds::decay_rate`].
    #[serde(default)]
    pub decay_rate: Option<f64>,
    pub days_since_validation: f64,
}

/// Model, crowd, and reputation signals for one market at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub market_id: String,
    pub ai: Vec<OutcomeSignal>,
    pub crowd: Vec<OutcomeSignal>,
    #[serde(default)]
    pub reputation: Vec<OutcomeSignal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "drift_type", rename_all = "snake_case")]
pub enum DriftDetails {
    DataExpiry {
        source_name: String,
        days_since_sync: f64,
        expiry_days: f64,
        new_status: FreshnessStatus,
    },
    CausalDecay {
        edge: String,
        original_weight: f64,
        current_weight: f64,
        decay_ratio: f64,
        days_since_validation: f64,
    },
    CalibrationDrift {
        early_brier: f64,
        recent_brier: f64,
        degradation: f64,
        sample_size: usize,
    },
    SignalDivergence {
        outcome: String,
        ai_probability: f64,
        crowd_probability: f64,
        reputation_probability: Option<f64>,
        divergence: f64,
    },
}

impl DriftDetails {
    pub fn kind(&self) -> DriftKind {
        match self {
            Self::DataExpiry { .. } => DriftKind::DataExpiry,
            Self::CausalDecay { .. } => DriftKind::CausalDecay,
            Self::CalibrationDrift { .. } => DriftKind::CalibrationDrift,
            Self::SignalDivergence { .. } => DriftKind::SignalDivergence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftEvent {
    pub id: Uuid,
    pub severity: Severity,
    /// Data source, edge, or market id; `None` for system-wide drift.
    pub entity_id: Option<String>,
    pub details: DriftDetails,
    /// What the monitor did or recommends.
    pub action: String,
    pub resolved: bool,
    pub detected_at: DateTime<Utc>,
}

impl DriftEvent {
    fn new(
        severity: Severity,
        entity_id: Option<String>,
        details: DriftDetails,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity,
            entity_id,
            details,
            action: action.into(),
            resolved: false,
            detected_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> DriftKind {
        self.details.kind()
    }
}

/// Inputs for one full scan. Empty slices skip their check.
#[derive(Debug, Default)]
pub struct DriftScan<'a> {
    pub data_sources: &'a [DataSource],
    pub edges: Option<&'a mut [CausalEdgeWeight]>,
    pub brier_history: &'a [f64],
    pub snapshots: &'a [SignalSnapshot],
}

/// `original · (1 − rate)^days`.
pub fn decayed_weight(original: f64, rate: f64, days: f64) -> f64 {
    original * (1.0 - rate).powf(days)
}

/// Multi-class Brier score of `forecast` against the outcome that happened.
pub fn brier_score(forecast: &Distribution, realized: &str) -> f64 {
    let mut score: f64 = forecast
        .iter()
        .map(|(name, p)| {
            let hit = if name == realized { 1.0 } else { 0.0 };
            (p - hit).powi(2)
        })
        .sum();
    if !forecast.contains_key(realized) {
        score += 1.0;
    }
    score
}

/// Adaptation applied for a kind of drift.
pub fn auto_adapt(kind: DriftKind) -> &'static str {
    match kind {
        DriftKind::DataExpiry => "Marked predictions using this data as needing refresh",
        DriftKind::CausalDecay => "Reduced causal edge weight in active predictions",
        DriftKind::CalibrationDrift => "Triggered Platt scaling recalibration",
        DriftKind::SignalDivergence => "Logged anomaly and flagged for manual review",
    }
}

/// Events a monitor keeps before dropping the oldest.
pub const DEFAULT_EVENT_CAPACITY: usize = 1_000;

#[derive(Debug, Clone)]
pub struct DriftMonitor {
    thresholds: DriftThresholds,
    events: Vec<DriftEvent>,
    capacity: usize,
}

impl Default for DriftMonitor {
    fn default() -> Self {
        Self::new(DriftThresholds::default())
    }
}

impl DriftMonitor {
    pub fn new(thresholds: DriftThresholds) -> Self {
        Self::with_capacity(thresholds, DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(thresholds: DriftThresholds, capacity: usize) -> Self {
        Self {
            thresholds,
            events: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The most recent events found by [`run_full_scan`](Self::run_full_scan),
    /// oldest first, at most `capacity` of them.
    pub fn events(&self) -> &[DriftEvent] {
        &self.events
    }

    /// Run every check with input and keep the events.
    pub fn run_full_scan(&mut self, scan: DriftScan<'_>) -> Vec<DriftEvent> {
        let mut found = self.check_data_expiry(scan.data_sources);
        if let Some(edges) = scan.edges {
            found.extend(self.check_causal_decay(edges));
        }
        found.extend(self.check_calibration_drift(scan.brier_history));
        found.extend(self.check_signal_divergence(scan.snapshots));

        if !found.is_empty() {
            info!(events = found.len(), "drift scan found events");
        }
        self.events.extend(found.iter().cloned());
        if self.events.len() > self.capacity {
            let excess = self.events.len() - self.capacity;
            self.events.drain(..excess);
        }
        found
    }

    /// Flag sources past their freshness window and update their status.
    pub fn check_data_expiry(&self, sources: &[DataSource]) -> Vec<DriftEvent> {
        sources
            .iter()
            .filter_map(|ds| {
                let (severity, status) = if ds.days_since_sync > ds.expiry_days {
                    (Severity::Critical, FreshnessStatus::Expired)
                } else if ds.days_since_sync > ds.expiry_days * self.thresholds.stale_fraction {
                    (Severity::Warning, FreshnessStatus::Stale)
                } else {
                    return None;
                };
                let label = match status {
                    FreshnessStatus::Expired => "expired",
                    FreshnessStatus::Stale => "stale",
                    FreshnessStatus::Fresh => "fresh",
                };
                Some(DriftEvent::new(
                    severity,
                    Some(ds.id.clone()),
                    DriftDetails::DataExpiry {
                        source_name: ds.name.clone(),
                        days_since_sync: ds.days_since_sync,
                        expiry_days: ds.expiry_days,
                        new_status: status,
                    },
                    format!("Marked data source as {label}"),
                ))
            })
            .collect()
    }

    /// Decay every edge's current weight; flag edges that fell too far.
    pub fn check_causal_decay(&self, edges: &mut [CausalEdgeWeight]) -> Vec<DriftEvent> {
        let mut events = Vec::new();
        for edge in edges.iter_mut() {
            let rate = edge.decay_rate.unwrap_or(self.thresholds.decay_rate);
            let decayed = decayed_weight(edge.original_weight, rate, edge.days_since_validation);
            let ratio = if edge.original_weight > 0.0 {
                decayed / edge.original_weight
            } else {
                0.0
            };
            edge.current_weight = decayed;

            let (severity, action) = if ratio < self.thresholds.decay_critical_ratio {
                (Severity::Critical, "Recommend removing this causal edge")
            } else if ratio < self.thresholds.decay_warning_ratio {
                (Severity::Warning, "Edge weight significantly reduced")
            } else {
                continue;
            };

            warn!(edge = %edge.id, ratio, %severity, "causal edge decayed");
            events.push(DriftEvent::new(
                severity,
                Some(edge.id.clone()),
                DriftDetails::CausalDecay {
                    edge: format!("{} → {}", edge.source, edge.target),
                    original_weight: edge.original_weight,
                    current_weight: decayed,
                    decay_ratio: ratio,
                    days_since_validation: edge.days_since_validation,
                },
                action,
            ));
        }
        events
    }

    /// Compare the mean Brier score of the later half of `history` to the earlier half.
    pub fn check_calibration_drift(&self, history: &[f64]) -> Vec<DriftEvent> {
        if history.len() < self.thresholds.calibration_min_samples.max(2) {
            return Vec::new();
        }
        let (early, recent) = history.split_at(history.len() / 2);
        let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
        let (early_brier, recent_brier) = (mean(early), mean(recent));
        let degradation = recent_brier - early_brier;
        if degradation <= self.thresholds.calibration_delta {
            return Vec::new();
        }
        warn!(early_brier, recent_brier, "calibration drift detected");
        vec![DriftEvent::new(
            Severity::Warning,
            None,
            DriftDetails::CalibrationDrift {
                early_brier,
                recent_brier,
                degradation,
                sample_size: history.len(),
            },
            "Recommend recalibration with Platt scaling",
        )]
    }

    /// Flag outcomes where the model and the crowd disagree strongly.
    pub fn check_signal_divergence(&self, snapshots: &[SignalSnapshot]) -> Vec<DriftEvent> {
        let mut events = Vec::new();
        for snap in snapshots {
            for ai in &snap.ai {
                let Some(crowd) = snap.crowd.iter().find(|c| c.name == ai.name) else {
                    continue;
                };
                let divergence = (ai.probability - crowd.probability).abs();
                if divergence <= self.thresholds.divergence_warning {
                    continue;
                }
                let severity = if divergence < self.thresholds.divergence_critical {
                    Severity::Warning
                } else {
                    Severity::Critical
                };
                events.push(DriftEvent::new(
                    severity,
                    Some(snap.market_id.clone()),
                    DriftDetails::SignalDivergence {
                        outcome: ai.name.clone(),
                        ai_probability: ai.probability,
                        crowd_probability: crowd.probability,
                        reputation_probability: snap
                            .reputation
                            .iter()
                            .find(|r| r.name == ai.name)
                            .map(|r| r.probability),
                        divergence,
                    },
                    "Flagged for review",
                ));
            }
        }
        events
    }
}
