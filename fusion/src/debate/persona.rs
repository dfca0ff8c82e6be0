//! The fixed debating viewpoints.

use serde::{Deserialize, Serialize};

/// An analytical viewpoint that argues one side of a debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    Optimist,
    Pessimist,
    Contrarian,
    Historian,
}

impl Persona {
    /// Every persona, in speaking order.
    pub const ALL: [Persona; 4] = [
        Self::Optimist,
        Self::Pessimist,
        Self::Contrarian,
        Self::Historian,
    ];

    /// Capitalized display name used in templated text.
    pub fn title(self) -> &'static str {
        match self {
            Self::Optimist => "Optimist",
            Self::Pessimist => "Pessimist",
            Self::Contrarian => "Contrarian",
            Self::Historian => "Historian",
        }
    }

    /// System instruction describing the persona's analytical bias.
    pub fn instruction(self) -> &'static str {
        match self {
            Self::Optimist => {
                "You are the Optimist. Look for the most favourable reading of the evidence \
                 and the best-case scenarios. Stress strengths, opportunities and upward trends."
            }
            Self::Pessimist => {
                "You are the Pessimist. Surface risks, worst-case scenarios and dangers others \
                 overlook. Stress weaknesses, threats and downward trends."
            }
            Self::Contrarian => {
                "You are the Contrarian. Push against conventional wisdom and popular \
                 assumptions. Find the hidden dynamics most analysts miss."
            }
            Self::Historian => {
                "You are the Historian. Reason from historical precedent. Name specific past \
                 events that resemble this one and project outcomes from those patterns."
            }
        }
    }
}

impl std::fmt::Display for Persona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Optimist => write!(f, "optimist"),
            Self::Pessimist => write!(f, "pessimist"),
            Self::Contrarian => write!(f, "contrarian"),
            Self::Historian => write!(f, "historian"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_instructions_are_distinct() {
        let set: HashSet<_> = Persona::ALL.iter().map(|p| p.instruction()).collect();
        assert_eq!(set.len(), Persona::ALL.len());
        for p in Persona::ALL {
            assert!(p.instruction().contains(p.title()));
        }
    }

    #[test]
    fn test_display_matches_serde() {
        for p in Persona::ALL {
            let json = serde_json::to_string(&p).unwrap();
            assert_eq!(json, format!("\"{p}\""));
        }
    }
}
