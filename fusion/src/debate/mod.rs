//! Structured multi-persona debate: personas, phases, and the transcript.
//!
//! The debate runs three rounds in a fixed order:
//!
//! ```text
//! Idle ──start──► Opening ──record_opening──► Rebuttal ──record_rebuttals──► Judging ──record_judgment──► Judged
//! ```
//!
//! Every persona must be represented in rounds 1 and 2; a failed call is
//! represented by its fallback statement rather than left out.

pub mod persona;
pub mod state;

pub use persona::Persona;
pub use state::{
    truncate_chars, DebatePhase, DebateRound, DebateTranscript, DebateTransition, Judgment,
    KeyArgument, OpeningStatement, Rebuttal, TransitionError, DEFAULT_JUDGE_CONFIDENCE,
    FALLBACK_JUDGE_REASONING,
};
