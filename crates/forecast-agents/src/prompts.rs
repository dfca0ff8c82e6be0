//! Prompt builders for every collaborator call the engines make.
//!
//! Each builder returns `(system, user)` text. The response shape the model
//! must produce is described by a `JsonSchema` struct below and rendered into
//! the system prompt, so the contract and the parser cannot drift apart.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever prompt text changes.

use std::collections::BTreeMap;

use fusion::debate::Persona;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Prompt version. Bump on any prompt content change.
pub const PROMPT_VERSION: &str = "1.3.0";

// ── Response contracts ─────────────────────────────────────────────

/// One candidate reasoning branch.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Branch {
    #[schemars(description = "Short label for the reasoning step taken")]
    pub action: String,
    #[schemars(description = "The reasoning path so far, including this step")]
    pub state: String,
}

/// Search expansion response.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BranchResponse {
    #[schemars(description = "2-3 distinct branches")]
    pub branches: Vec<Branch>,
}

/// Search evaluation response.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ScoreResponse {
    #[schemars(description = "Plausibility of the reasoning path, 0.0 to 1.0")]
    pub score: f64,
    pub rationale: String,
}

/// Debate round 1.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OpeningResponse {
    pub analysis: String,
    #[schemars(description = "Outcome name → probability")]
    pub probabilities: BTreeMap<String, f64>,
    pub key_evidence: Vec<String>,
}

/// Debate round 2.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RebuttalResponse {
    pub rebuttals: Vec<String>,
    #[schemars(description = "Outcome name → probability after hearing the others")]
    pub updated_probabilities: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WeightedArgument {
    #[schemars(description = "Persona that made the argument")]
    pub from: String,
    pub argument: String,
    #[schemars(description = "Importance, 0.0 to 1.0")]
    pub weight: f64,
}

/// Debate round 3.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JudgeResponse {
    #[schemars(description = "Outcome name → final probability")]
    pub probabilities: BTreeMap<String, f64>,
    pub reasoning: String,
    pub key_arguments: Vec<WeightedArgument>,
    #[schemars(description = "Confidence in the verdict, 0.0 to 1.0")]
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DimensionContract {
    pub name: String,
    pub analysis: String,
    #[schemars(description = "Outcome name → signed impact, -1.0 to 1.0")]
    pub impact: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InteractionContract {
    pub from: String,
    pub to: String,
    pub effect: String,
    pub strength: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OutcomeContract {
    pub name: String,
    pub probability: f64,
    #[schemars(description = "[low, high] bounds of the probability")]
    pub confidence_interval: [f64; 2],
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NodeContract {
    pub id: String,
    pub label: String,
    pub probability: f64,
    pub confidence: f64,
    #[schemars(description = "factor, intermediate or outcome")]
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EdgeContract {
    pub source: String,
    pub target: String,
    pub weight: f64,
    #[serde(rename = "type")]
    #[schemars(description = "positive or negative")]
    pub polarity: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CausalGraphContract {
    pub nodes: Vec<NodeContract>,
    pub edges: Vec<EdgeContract>,
}

/// Graph-of-thought response.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GraphResponse {
    #[schemars(description = "5-8 analytical dimensions")]
    pub dimensions: Vec<DimensionContract>,
    pub cross_interactions: Vec<InteractionContract>,
    pub outcomes: Vec<OutcomeContract>,
    pub causal_graph: CausalGraphContract,
}

/// Render the JSON schema of `T` for embedding in a prompt.
pub fn schema_of<T: JsonSchema>() -> String {
    serde_json::to_string(&schemars::schema_for!(T)).unwrap_or_default()
}

fn respond_with<T: JsonSchema>() -> String {
    format!(
        "Respond with a single JSON object matching this schema and nothing else:\n{}",
        schema_of::<T>()
    )
}

fn outcome_list(outcomes: &[String]) -> String {
    serde_json::to_string(outcomes).unwrap_or_default()
}

// ── Tree search ────────────────────────────────────────────────────

pub const SEARCH_EXPAND_PREAMBLE: &str = "\
You are a reasoning branch generator for a forecasting search. Given a question \
and the reasoning path explored so far, propose 2-3 distinct next reasoning steps. \
Each branch must explore a different angle; do not restate the current path.";

pub fn search_expand(query: &str, state: &str, depth: usize) -> (String, String) {
    (
        format!("{SEARCH_EXPAND_PREAMBLE}\n\n{}", respond_with::<BranchResponse>()),
        format!("Query: {query}\nCurrent state: {state}\nDepth: {depth}"),
    )
}

pub const SEARCH_EVALUATE_PREAMBLE: &str = "\
You evaluate reasoning paths for a forecasting search. Score how plausible and \
well-supported the given path is, from 0.0 (implausible) to 1.0 (highly plausible).";

pub fn search_evaluate(query: &str, state: &str) -> (String, String) {
    (
        format!("{SEARCH_EVALUATE_PREAMBLE}\n\n{}", respond_with::<ScoreResponse>()),
        format!("Query: {query}\nReasoning path: {state}"),
    )
}

// ── Debate ─────────────────────────────────────────────────────────

pub fn debate_opening(
    persona: Persona,
    query: &str,
    data_summary: &str,
    outcomes: &[String],
) -> (String, String) {
    (
        format!(
            "{}\n\nAnalyze this prediction question from your perspective and assign a \
             probability to every possible outcome.\nPossible outcomes: {}\n\n{}",
            persona.instruction(),
            outcome_list(outcomes),
            respond_with::<OpeningResponse>()
        ),
        format!("Question: {query}\nData: {data_summary}"),
    )
}

pub fn debate_rebuttal(
    persona: Persona,
    query: &str,
    opening_digest: &str,
    outcomes: &[String],
) -> (String, String) {
    (
        format!(
            "{}\n\nYou've heard the opening statements. Rebut the arguments you disagree \
             with and update your probabilities.\nPossible outcomes: {}\n\n{}",
            persona.instruction(),
            outcome_list(outcomes),
            respond_with::<RebuttalResponse>()
        ),
        format!("Question: {query}\nOpening statements: {opening_digest}"),
    )
}

pub const JUDGE_PREAMBLE: &str = "\
You are the impartial judge of a structured forecasting debate between an Optimist, \
a Pessimist, a Contrarian and a Historian. Weigh the strength of each argument, not \
the number of speakers who made it. Produce final probabilities, your reasoning, the \
key arguments with their weights, and your confidence in the verdict.";

pub fn debate_judge(query: &str, judge_digest: &str, outcomes: &[String]) -> (String, String) {
    (
        format!(
            "{JUDGE_PREAMBLE}\nPossible outcomes: {}\n\n{}",
            outcome_list(outcomes),
            respond_with::<JudgeResponse>()
        ),
        format!("Question: {query}\n\nDebate transcript:\n{judge_digest}"),
    )
}

// ── Graph of thought ───────────────────────────────────────────────

pub const GRAPH_PREAMBLE: &str = "\
You are a forecasting analyst using graph-of-thought reasoning. Decompose the \
question into 5-8 analytical dimensions (economic, political, social, historical \
and others that matter). Analyze each one, state how the dimensions interact, then \
assign probabilities with confidence intervals to every outcome. Finally build a \
causal graph whose nodes are factors, intermediate effects and outcomes and whose \
edges carry a weight and a positive or negative polarity. Probabilities across \
outcomes must sum to 1.";

pub fn graph_reasoning(
    query: &str,
    data_summary: &str,
    simulation_note: Option<&str>,
    outcomes: &[String],
) -> (String, String) {
    let mut user = format!("Question: {query}\nData: {data_summary}\n");
    if let Some(note) = simulation_note {
        user.push_str(&format!("{note}\n"));
    }
    user.push_str(&format!("Possible outcomes: {}", outcome_list(outcomes)));
    (
        format!("{GRAPH_PREAMBLE}\n\n{}", respond_with::<GraphResponse>()),
        user,
    )
}
