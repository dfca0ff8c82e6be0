//! Resilience: degraded-mode bookkeeping for engines.
//!
//! Engines never fail because a text-generation call failed; they substitute
//! a local fallback and keep going. The [`DegradationReport`] records how
//! often that happened so consumers can judge how much to trust a result.
//!
//! ```text
//! collaborator call
//!   ├─ usable response      → record_success()
//!   └─ error / timeout / junk → record_fallback(warning)
//!
//! level(): no fallbacks → Full, some → Partial, all → Unavailable
//! ```

use serde::{Deserialize, Serialize};

/// How much of an engine's output came from the collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    /// Every call produced a usable response.
    Full,
    /// Some calls fell back.
    Partial,
    /// Every call fell back; the result is entirely synthesized.
    Unavailable,
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Partial => write!(f, "partial"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Tally of collaborator calls and fallbacks made by one engine run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradationReport {
    pub calls: u32,
    pub fallbacks: u32,
    /// One entry per fallback, oldest first.
    pub warnings: Vec<String>,
}

/// Warnings kept per report; later ones are only counted.
const MAX_WARNINGS: usize = 32;

impl DegradationReport {
    pub fn record_success(&mut self) {
        self.calls += 1;
    }

    pub fn record_fallback(&mut self, warning: impl Into<String>) {
        self.calls += 1;
        self.fallbacks += 1;
        if self.warnings.len() < MAX_WARNINGS {
            self.warnings.push(warning.into());
        }
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: DegradationReport) {
        self.calls += other.calls;
        self.fallbacks += other.fallbacks;
        let room = MAX_WARNINGS.saturating_sub(self.warnings.len());
        self.warnings.extend(other.warnings.into_iter().take(room));
    }

    pub fn level(&self) -> DegradationLevel {
        if self.fallbacks == 0 {
            DegradationLevel::Full
        } else if self.fallbacks >= self.calls {
            DegradationLevel::Unavailable
        } else {
            DegradationLevel::Partial
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.level() != DegradationLevel::Full
    }
}
