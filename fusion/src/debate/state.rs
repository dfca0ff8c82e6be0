//! Debate state machine: phases, transitions, and the three-round transcript.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::persona::Persona;
use crate::distribution::{self, Distribution};
use crate::extract;

/// Confidence assigned when the judge gives none.
pub const DEFAULT_JUDGE_CONFIDENCE: f64 = 0.5;

/// Reasoning text used when the judge call fails.
pub const FALLBACK_JUDGE_REASONING: &str =
    "Judge synthesis based on balanced consideration of all perspectives.";

/// Phase of a debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DebatePhase {
    /// Transcript created, nothing requested yet.
    Idle,
    /// Opening statements in flight.
    Opening,
    /// Rebuttals in flight.
    Rebuttal,
    /// Waiting on the judge.
    Judging,
    /// Judgment recorded; terminal.
    Judged,
}

impl DebatePhase {
    pub fn is_terminal(self) -> bool {
        self == Self::Judged
    }

    /// Valid transitions from this phase.
    pub fn valid_transitions(self) -> &'static [DebatePhase] {
        match self {
            Self::Idle => &[Self::Opening],
            Self::Opening => &[Self::Rebuttal],
            Self::Rebuttal => &[Self::Judging],
            Self::Judging => &[Self::Judged],
            Self::Judged => &[],
        }
    }
}

impl std::fmt::Display for DebatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Opening => write!(f, "opening"),
            Self::Rebuttal => write!(f, "rebuttal"),
            Self::Judging => write!(f, "judging"),
            Self::Judged => write!(f, "judged"),
        }
    }
}

/// A phase transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateTransition {
    pub from: DebatePhase,
    pub to: DebatePhase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Error for invalid state transitions or malformed rounds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {from} → {to}: {reason}")]
pub struct TransitionError {
    pub from: DebatePhase,
    pub to: DebatePhase,
    pub reason: String,
}

/// A persona's round-1 position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpeningStatement {
    pub analysis: String,
    pub probabilities: Distribution,
    pub key_evidence: Vec<String>,
    /// Templated stand-in for a failed call.
    pub fallback: bool,
}

impl OpeningStatement {
    /// Parse a structured response. `None` when there is no analysis text.
    ///
    /// Probabilities are conformed to `outcomes`; an unusable mapping becomes
    /// a uniform split.
    pub fn from_response(response: &Map<String, Value>, outcomes: &[String]) -> Option<Self> {
        let analysis = extract::string_field(response, "analysis")?;
        let raw = extract::probability_map(response, "probabilities");
        Some(Self {
            analysis,
            probabilities: distribution::conform(&raw, outcomes)
                .unwrap_or_else(|| distribution::uniform(outcomes)),
            key_evidence: extract::string_list(response, "key_evidence"),
            fallback: false,
        })
    }

    /// Templated statement with a uniform split.
    pub fn fallback(persona: Persona, query: &str, outcomes: &[String]) -> Self {
        Self {
            analysis: format!("{} perspective on {query}", persona.title()),
            probabilities: distribution::uniform(outcomes),
            key_evidence: vec![format!("General {persona} analysis")],
            fallback: true,
        }
    }
}

/// A persona's round-2 response after reading every opening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rebuttal {
    pub rebuttals: Vec<String>,
    pub updated_probabilities: Distribution,
    pub fallback: bool,
}

impl Rebuttal {
    /// Parse a structured response.
    ///
    /// `None` when it carries neither rebuttals nor usable probabilities. A
    /// response with rebuttals but no usable mapping keeps `prior`'s split.
    pub fn from_response(
        response: &Map<String, Value>,
        outcomes: &[String],
        prior: &OpeningStatement,
    ) -> Option<Self> {
        let rebuttals = extract::string_list(response, "rebuttals");
        let raw = extract::probability_map(response, "updated_probabilities");
        let updated = distribution::conform(&raw, outcomes);
        if rebuttals.is_empty() && updated.is_none() {
            return None;
        }
        Some(Self {
            rebuttals,
            updated_probabilities: updated.unwrap_or_else(|| prior.probabilities.clone()),
            fallback: false,
        })
    }

    /// Maintain the opening position.
    pub fn fallback(persona: Persona, prior: &OpeningStatement) -> Self {
        Self {
            rebuttals: vec![format!("{} maintains position", persona.title())],
            updated_probabilities: prior.probabilities.clone(),
            fallback: true,
        }
    }
}

/// One argument the judge found decisive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyArgument {
    pub from: String,
    pub argument: String,
    pub weight: f64,
}

/// The judge's synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    /// Conformed to exactly the debated outcomes and normalized.
    pub probabilities: Distribution,
    pub reasoning: String,
    pub key_arguments: Vec<KeyArgument>,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub fallback: bool,
}

impl Judgment {
    /// Parse the judge's response. `None` when it holds neither a usable
    /// mapping nor reasoning text.
    pub fn from_response(response: &Map<String, Value>, outcomes: &[String]) -> Option<Self> {
        let raw = extract::probability_map(response, "probabilities");
        let probabilities = distribution::conform(&raw, outcomes);
        let reasoning = extract::string_field(response, "reasoning");
        if probabilities.is_none() && reasoning.is_none() {
            return None;
        }

        let key_arguments = response
            .get("key_arguments")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_object)
                    .filter_map(|arg| {
                        Some(KeyArgument {
                            from: extract::string_field(arg, "from").unwrap_or_default(),
                            argument: extract::string_field(arg, "argument")?,
                            weight: extract::f64_field(arg, "weight")
                                .unwrap_or(0.0)
                                .clamp(0.0, 1.0),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            probabilities: probabilities.unwrap_or_else(|| distribution::uniform(outcomes)),
            reasoning: reasoning.unwrap_or_default(),
            key_arguments,
            confidence: extract::f64_field(response, "confidence")
                .unwrap_or(DEFAULT_JUDGE_CONFIDENCE)
                .clamp(0.0, 1.0),
            fallback: false,
        })
    }

    /// Uniform split, neutral confidence, no arguments.
    pub fn fallback(outcomes: &[String]) -> Self {
        Self {
            probabilities: distribution::uniform(outcomes),
            reasoning: FALLBACK_JUDGE_REASONING.to_string(),
            key_arguments: Vec::new(),
            confidence: DEFAULT_JUDGE_CONFIDENCE,
            fallback: true,
        }
    }
}

/// One recorded round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DebateRound {
    Opening {
        statements: BTreeMap<Persona, OpeningStatement>,
    },
    Rebuttal {
        statements: BTreeMap<Persona, Rebuttal>,
    },
    Judgment {
        judgment: Judgment,
    },
}

/// Ordered record of a single debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateTranscript {
    pub phase: DebatePhase,
    pub rounds: Vec<DebateRound>,
    pub transitions: Vec<DebateTransition>,
    pub created_at: DateTime<Utc>,
}

impl Default for DebateTranscript {
    fn default() -> Self {
        Self::new()
    }
}

impl DebateTranscript {
    pub fn new() -> Self {
        Self {
            phase: DebatePhase::Idle,
            rounds: Vec::new(),
            transitions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn transition(&mut self, to: DebatePhase, reason: &str) -> Result<(), TransitionError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.phase,
                to,
                reason: format!(
                    "not a valid transition (allowed: {:?})",
                    self.phase.valid_transitions()
                ),
            });
        }
        self.transitions.push(DebateTransition {
            from: self.phase,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = to;
        Ok(())
    }

    fn expect_phase(&self, expected: DebatePhase, next: DebatePhase) -> Result<(), TransitionError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.phase,
                to: next,
                reason: format!("round can only be recorded during {expected}"),
            })
        }
    }

    fn require_every_persona<T>(
        &self,
        statements: &BTreeMap<Persona, T>,
        next: DebatePhase,
    ) -> Result<(), TransitionError> {
        match Persona::ALL.iter().find(|p| !statements.contains_key(p)) {
            None => Ok(()),
            Some(missing) => Err(TransitionError {
                from: self.phase,
                to: next,
                reason: format!("missing statement from {missing}"),
            }),
        }
    }

    /// Idle → Opening.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(DebatePhase::Opening, "debate started")
    }

    /// Record round 1 (Opening → Rebuttal). Every persona must be present.
    pub fn record_opening(
        &mut self,
        statements: BTreeMap<Persona, OpeningStatement>,
    ) -> Result<(), TransitionError> {
        self.expect_phase(DebatePhase::Opening, DebatePhase::Rebuttal)?;
        self.require_every_persona(&statements, DebatePhase::Rebuttal)?;
        let fallbacks = statements.values().filter(|s| s.fallback).count();
        self.rounds.push(DebateRound::Opening { statements });
        self.transition(
            DebatePhase::Rebuttal,
            &format!("openings recorded ({fallbacks} fallback)"),
        )
    }

    /// Record round 2 (Rebuttal → Judging). Every persona must be present.
    pub fn record_rebuttals(
        &mut self,
        statements: BTreeMap<Persona, Rebuttal>,
    ) -> Result<(), TransitionError> {
        self.expect_phase(DebatePhase::Rebuttal, DebatePhase::Judging)?;
        self.require_every_persona(&statements, DebatePhase::Judging)?;
        let fallbacks = statements.values().filter(|s| s.fallback).count();
        self.rounds.push(DebateRound::Rebuttal { statements });
        self.transition(
            DebatePhase::Judging,
            &format!("rebuttals recorded ({fallbacks} fallback)"),
        )
    }

    /// Record round 3 (Judging → Judged).
    pub fn record_judgment(&mut self, judgment: Judgment) -> Result<(), TransitionError> {
        self.expect_phase(DebatePhase::Judging, DebatePhase::Judged)?;
        let reason = if judgment.fallback {
            "judge fallback"
        } else {
            "judge ruled"
        };
        self.rounds.push(DebateRound::Judgment { judgment });
        self.transition(DebatePhase::Judged, reason)
    }

    pub fn is_complete(&self) -> bool {
        self.phase.is_terminal() && self.rounds.len() == 3
    }

    pub fn openings(&self) -> Option<&BTreeMap<Persona, OpeningStatement>> {
        self.rounds.iter().find_map(|r| match r {
            DebateRound::Opening { statements } => Some(statements),
            _ => None,
        })
    }

    pub fn rebuttals(&self) -> Option<&BTreeMap<Persona, Rebuttal>> {
        self.rounds.iter().find_map(|r| match r {
            DebateRound::Rebuttal { statements } => Some(statements),
            _ => None,
        })
    }

    pub fn judgment(&self) -> Option<&Judgment> {
        self.rounds.iter().find_map(|r| match r {
            DebateRound::Judgment { judgment } => Some(judgment),
            _ => None,
        })
    }

    /// JSON object of persona → truncated opening analysis, shown to rebutters.
    pub fn opening_digest(&self, max_chars: usize) -> String {
        let digest: BTreeMap<String, String> = self
            .openings()
            .map(|statements| {
                statements
                    .iter()
                    .map(|(p, s)| (p.to_string(), truncate_chars(&s.analysis, max_chars)))
                    .collect()
            })
            .unwrap_or_default();
        serde_json::to_string(&digest).unwrap_or_default()
    }

    /// Compact text of both rounds, shown to the judge.
    pub fn judge_digest(&self, max_chars: usize) -> String {
        let mut out = String::new();
        for persona in Persona::ALL {
            let analysis = self
                .openings()
                .and_then(|s| s.get(&persona))
                .map_or("N/A", |s| s.analysis.as_str());
            let rebuttal = self.rebuttals().and_then(|s| s.get(&persona));
            let rebuttals = rebuttal
                .map(|r| serde_json::to_string(&r.rebuttals).unwrap_or_default())
                .unwrap_or_else(|| "[]".to_string());
            let final_probs = rebuttal
                .map(|r| serde_json::to_string(&r.updated_probabilities).unwrap_or_default())
                .unwrap_or_else(|| "{}".to_string());

            out.push_str(&format!("\n{}:\n", persona.title().to_uppercase()));
            out.push_str(&format!("  Opening: {}\n", truncate_chars(analysis, max_chars)));
            out.push_str(&format!("  Rebuttals: {}\n", truncate_chars(&rebuttals, max_chars)));
            out.push_str(&format!("  Final probs: {final_probs}\n"));
        }
        out
    }
}

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outcomes() -> Vec<String> {
        vec!["A".to_string(), "B".to_string()]
    }

    fn openings(fallback_for: Option<Persona>) -> BTreeMap<Persona, OpeningStatement> {
        Persona::ALL
            .iter()
            .map(|&p| {
                let s = if Some(p) == fallback_for {
                    OpeningStatement::fallback(p, "Who wins?", &outcomes())
                } else {
                    OpeningStatement {
                        analysis: format!("{p} says A"),
                        probabilities: [("A".to_string(), 0.7), ("B".to_string(), 0.3)].into(),
                        key_evidence: vec![],
                        fallback: false,
                    }
                };
                (p, s)
            })
            .collect()
    }

    fn rebuttals(open: &BTreeMap<Persona, OpeningStatement>) -> BTreeMap<Persona, Rebuttal> {
        open.iter()
            .map(|(&p, s)| (p, Rebuttal::fallback(p, s)))
            .collect()
    }

    #[test]
    fn test_full_debate_cycle() {
        let mut t = DebateTranscript::new();
        assert_eq!(t.phase, DebatePhase::Idle);
        t.start().unwrap();
        let open = openings(None);
        t.record_opening(open.clone()).unwrap();
        assert_eq!(t.phase, DebatePhase::Rebuttal);
        t.record_rebuttals(rebuttals(&open)).unwrap();
        assert_eq!(t.phase, DebatePhase::Judging);
        t.record_judgment(Judgment::fallback(&outcomes())).unwrap();
        assert!(t.is_complete());
        assert_eq!(t.rounds.len(), 3);
        assert_eq!(t.transitions.len(), 4);
        assert_eq!(t.transitions[3].to, DebatePhase::Judged);
    }

    #[test]
    fn test_out_of_order_is_rejected() {
        let mut t = DebateTranscript::new();
        let err = t.record_opening(openings(None)).unwrap_err();
        assert_eq!(err.from, DebatePhase::Idle);

        t.start().unwrap();
        let err = t.record_judgment(Judgment::fallback(&outcomes())).unwrap_err();
        assert_eq!(err.from, DebatePhase::Opening);
        assert_eq!(err.to, DebatePhase::Judged);
        assert!(t.rounds.is_empty());
    }

    #[test]
    fn test_missing_persona_is_rejected() {
        let mut t = DebateTranscript::new();
        t.start().unwrap();
        let mut open = openings(None);
        open.remove(&Persona::Historian);
        let err = t.record_opening(open).unwrap_err();
        assert!(err.reason.contains("historian"));
        assert_eq!(t.phase, DebatePhase::Opening);
    }

    #[test]
    fn test_terminal_has_no_transitions() {
        assert!(DebatePhase::Judged.valid_transitions().is_empty());
        assert!(DebatePhase::Judged.is_terminal());
        assert!(!DebatePhase::Judging.is_terminal());
    }

    #[test]
    fn test_opening_fallback_template() {
        let s = OpeningStatement::fallback(Persona::Contrarian, "Who wins?", &outcomes());
        assert_eq!(s.analysis, "Contrarian perspective on Who wins?");
        assert_eq!(s.key_evidence, vec!["General contrarian analysis"]);
        assert_eq!(s.probabilities["A"], 0.5);
        assert!(s.fallback);
    }

    #[test]
    fn test_opening_from_response() {
        let resp = json!({
            "analysis": "Strong economy",
            "probabilities": {"A": 3.0, "B": 1.0, "C": 9.0},
            "key_evidence": ["GDP"]
        });
        let s = OpeningStatement::from_response(resp.as_object().unwrap(), &outcomes()).unwrap();
        assert!((s.probabilities["A"] - 0.75).abs() < 1e-12);
        assert!(!s.probabilities.contains_key("C"));
        assert!(!s.fallback);

        let empty = json!({"probabilities": {"A": 1.0}});
        assert!(OpeningStatement::from_response(empty.as_object().unwrap(), &outcomes()).is_none());
    }

    #[test]
    fn test_rebuttal_keeps_prior_split_without_update() {
        let prior = OpeningStatement::fallback(Persona::Optimist, "q", &outcomes());
        let resp = json!({"rebuttals": ["The pessimist ignores turnout"]});
        let r = Rebuttal::from_response(resp.as_object().unwrap(), &outcomes(), &prior).unwrap();
        assert_eq!(r.updated_probabilities, prior.probabilities);

        let fb = Rebuttal::fallback(Persona::Optimist, &prior);
        assert_eq!(fb.rebuttals, vec!["Optimist maintains position"]);
        assert!(Rebuttal::from_response(&Map::new(), &outcomes(), &prior).is_none());
    }

    #[test]
    fn test_judgment_from_response() {
        let resp = json!({
            "probabilities": {"A": 0.6, "B": 0.2},
            "reasoning": "Balanced",
            "key_arguments": [{"from": "historian", "argument": "1992 parallel", "weight": 1.7}],
            "confidence": 0.8
        });
        let j = Judgment::from_response(resp.as_object().unwrap(), &outcomes()).unwrap();
        assert!((j.probabilities["A"] - 0.75).abs() < 1e-12);
        assert_eq!(j.key_arguments.len(), 1);
        assert_eq!(j.key_arguments[0].weight, 1.0);
        assert_eq!(j.confidence, 0.8);

        let fb = Judgment::fallback(&outcomes());
        assert_eq!(fb.confidence, 0.5);
        assert!(fb.key_arguments.is_empty());
        assert_eq!(fb.reasoning, FALLBACK_JUDGE_REASONING);
    }

    #[test]
    fn test_digests_truncate() {
        let mut t = DebateTranscript::new();
        t.start().unwrap();
        let mut open = openings(None);
        open.get_mut(&Persona::Optimist).unwrap().analysis = "x".repeat(500);
        t.record_opening(open.clone()).unwrap();
        t.record_rebuttals(rebuttals(&open)).unwrap();

        let digest: BTreeMap<String, String> =
            serde_json::from_str(&t.opening_digest(200)).unwrap();
        assert_eq!(digest["optimist"].len(), 200);
        assert_eq!(digest.len(), 4);

        let brief = t.judge_digest(200);
        assert!(brief.contains("OPTIMIST:"));
        assert!(brief.contains("Historian maintains position"));
        assert!(brief.contains("Final probs"));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate_chars("ééé", 2), "éé");
    }
}
