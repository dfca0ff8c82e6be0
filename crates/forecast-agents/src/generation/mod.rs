//! Text-generation collaborator boundary.
//!
//! Engines talk to the model only through [`TextGenerator`]. Every call is
//! bounded by the request's timeout, and every response goes through
//! [`fusion::extract_structured`] before an engine looks at it.

pub mod client;
pub mod usage;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::GenerationError;

pub use client::RigTextGenerator;
pub use usage::{UsageLog, UsageMark, UsageRecord, UsageSummary};

/// What a call is for; selects the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskTag {
    SearchExpand,
    SearchEvaluate,
    Debate,
    GraphReasoning,
}

impl std::fmt::Display for TaskTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SearchExpand => write!(f, "search_expand"),
            Self::SearchEvaluate => write!(f, "search_evaluate"),
            Self::Debate => write!(f, "debate"),
            Self::GraphReasoning => write!(f, "graph_reasoning"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// One logical call to the collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub task: TaskTag,
    pub messages: Vec<ChatMessage>,
    /// Upper bound for the whole call, retries included.
    pub timeout: Duration,
    /// Overrides the client's default temperature.
    pub temperature: Option<f64>,
}

impl GenerationRequest {
    /// System instruction plus one user message.
    pub fn new(
        task: TaskTag,
        system: impl Into<String>,
        user: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            task,
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            timeout,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// All system messages joined by blank lines.
    pub fn system_text(&self) -> String {
        self.joined(Role::System)
    }

    /// All user messages joined by blank lines.
    pub fn user_text(&self) -> String {
        self.joined(Role::User)
    }

    fn joined(&self, role: Role) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == role)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Approximate prompt size in characters.
    pub fn prompt_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }
}

/// Prompt in, text out. May fail or hang; callers bound it with a timeout.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// Generate with `request.timeout` enforced, then extract a JSON object.
///
/// A hang becomes [`GenerationError::Timeout`]. Unparseable text yields an
/// empty map, which callers treat as "no result".
pub async fn generate_structured(
    generator: &dyn TextGenerator,
    request: &GenerationRequest,
) -> Result<Map<String, Value>, GenerationError> {
    let text = tokio::time::timeout(request.timeout, generator.generate(request))
        .await
        .map_err(|_| GenerationError::Timeout(request.timeout))??;

    if text.trim().is_empty() {
        return Err(GenerationError::EmptyResponse);
    }

    let parsed = fusion::extract_structured(&text);
    if parsed.is_empty() {
        debug!(task = %request.task, chars = text.len(), "response held no JSON object");
    }
    Ok(parsed)
}
