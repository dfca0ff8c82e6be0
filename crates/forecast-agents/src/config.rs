//! Forecast configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variables (`FORECAST_BASE_URL`, `FORECAST_API_KEY`,
//!    `FORECAST_<TASK>_MODEL`, `FORECAST_FALLBACK_MODEL`)
//! 2. TOML file passed with `--config`
//! 3. Built-in defaults
//!
//! ## Model routing
//!
//! | Task tag        | Model role | Default                     |
//! |-----------------|------------|-----------------------------|
//! | search expand   | balanced   | anthropic/claude-sonnet-4   |
//! | search evaluate | balanced   | anthropic/claude-sonnet-4   |
//! | debate          | balanced   | anthropic/claude-sonnet-4   |
//! | graph reasoning | deep       | anthropic/claude-opus-4     |
//! | timeout fallback| fast       | anthropic/claude-haiku      |

use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use fusion::drift::DriftThresholds;
use fusion::EnsembleWeights;
use serde::{Deserialize, Serialize};

use crate::generation::TaskTag;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_BALANCED_MODEL: &str = "anthropic/claude-sonnet-4";
const DEFAULT_DEEP_MODEL: &str = "anthropic/claude-opus-4";
const DEFAULT_FAST_MODEL: &str = "anthropic/claude-haiku";

const ENV_BASE_URL: &str = "FORECAST_BASE_URL";
const ENV_API_KEY: &str = "FORECAST_API_KEY";
const ENV_SEARCH_MODEL: &str = "FORECAST_SEARCH_MODEL";
const ENV_DEBATE_MODEL: &str = "FORECAST_DEBATE_MODEL";
const ENV_GRAPH_MODEL: &str = "FORECAST_GRAPH_MODEL";
const ENV_FALLBACK_MODEL: &str = "FORECAST_FALLBACK_MODEL";

/// Per-task model assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskModels {
    /// Branch expansion and path evaluation.
    pub search: String,
    /// Persona statements and the judge.
    pub debate: String,
    /// Graph-of-thought decomposition.
    pub graph: String,
}

impl Default for TaskModels {
    fn default() -> Self {
        Self {
            search: env::var(ENV_SEARCH_MODEL).unwrap_or_else(|_| DEFAULT_BALANCED_MODEL.into()),
            debate: env::var(ENV_DEBATE_MODEL).unwrap_or_else(|_| DEFAULT_BALANCED_MODEL.into()),
            graph: env::var(ENV_GRAPH_MODEL).unwrap_or_else(|_| DEFAULT_DEEP_MODEL.into()),
        }
    }
}

/// Text-generation client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// OpenAI-compatible API base URL.
    pub base_url: String,
    pub api_key: String,
    pub models: TaskModels,
    /// Model used for retries after a timeout.
    pub fallback_model: String,
    pub attempt_timeout_secs: u64,
    pub fallback_attempt_timeout_secs: u64,
    /// Budget for one logical call including retries.
    pub call_timeout_secs: u64,
    pub max_retries: u32,
    pub temperature: f64,
    /// Maximum entries kept in the usage log.
    pub usage_log_capacity: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: env::var(ENV_BASE_URL).unwrap_or_else(|_| DEFAULT_BASE_URL.into()),
            api_key: env::var(ENV_API_KEY).unwrap_or_default(),
            models: TaskModels::default(),
            fallback_model: env::var(ENV_FALLBACK_MODEL)
                .unwrap_or_else(|_| DEFAULT_FAST_MODEL.into()),
            attempt_timeout_secs: 60,
            fallback_attempt_timeout_secs: 30,
            call_timeout_secs: 150,
            max_retries: 2,
            temperature: 0.4,
            usage_log_capacity: 10_000,
        }
    }
}

impl GenerationConfig {
    pub fn model_for(&self, task: TaskTag) -> &str {
        match task {
            TaskTag::SearchExpand | TaskTag::SearchEvaluate => &self.models.search,
            TaskTag::Debate => &self.models.debate,
            TaskTag::GraphReasoning => &self.models.graph,
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn fallback_attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.fallback_attempt_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("generation.base_url must not be empty".into());
        }
        if self.attempt_timeout_secs == 0
            || self.fallback_attempt_timeout_secs == 0
            || self.call_timeout_secs == 0
        {
            return Err("generation timeouts must be > 0".into());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!(
                "generation.temperature must be in [0, 2], got {}",
                self.temperature
            ));
        }
        if self.usage_log_capacity == 0 {
            return Err("generation.usage_log_capacity must be > 0".into());
        }
        Ok(())
    }
}

/// Tree-search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub iterations: u32,
    pub max_depth: usize,
    /// UCB1 exploration constant.
    pub exploration: f64,
    /// Iterations between convergence checks.
    pub convergence_interval: u32,
    pub convergence_tolerance: f64,
    pub top_paths: usize,
    /// Range a failed evaluation's score is drawn from.
    pub fallback_score_range: [f64; 2],
    /// Fixed RNG seed; entropy when absent.
    pub seed: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            iterations: 80,
            max_depth: 4,
            exploration: fusion::search::DEFAULT_EXPLORATION,
            convergence_interval: 20,
            convergence_tolerance: 0.05,
            top_paths: 5,
            fallback_score_range: [0.3, 0.7],
            seed: None,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.iterations == 0 {
            return Err("search.iterations must be > 0".into());
        }
        if self.max_depth == 0 {
            return Err("search.max_depth must be > 0".into());
        }
        if !(self.exploration >= 0.0 && self.exploration.is_finite()) {
            return Err(format!(
                "search.exploration must be >= 0, got {}",
                self.exploration
            ));
        }
        if self.convergence_interval == 0 {
            return Err("search.convergence_interval must be > 0".into());
        }
        if self.top_paths == 0 {
            return Err("search.top_paths must be > 0".into());
        }
        let [lo, hi] = self.fallback_score_range;
        if !(0.0 <= lo && lo <= hi && hi <= 1.0) {
            return Err(format!(
                "search.fallback_score_range must be ordered inside [0, 1], got [{lo}, {hi}]"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateConfig {
    /// Characters of each statement shown to later rounds.
    pub summary_chars: usize,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self { summary_chars: 200 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub enabled: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Budget for each engine branch.
    pub engine_timeout_secs: u64,
    /// Search iterations used by variable reruns.
    pub rerun_search_iterations: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            engine_timeout_secs: 600,
            rerun_search_iterations: 30,
        }
    }
}

impl OrchestratorConfig {
    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub generation: GenerationConfig,
    pub search: SearchConfig,
    pub debate: DebateConfig,
    pub graph: GraphConfig,
    pub ensemble: EnsembleWeights,
    pub drift: DriftThresholds,
    pub orchestrator: OrchestratorConfig,
}

impl ForecastConfig {
    /// Parse a TOML file. Missing sections and fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Defaults or `path`, then environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok());
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    /// Overwrite generation settings with any values `lookup` returns.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let g = &mut self.generation;
        let targets: [(&str, &mut String); 6] = [
            (ENV_BASE_URL, &mut g.base_url),
            (ENV_API_KEY, &mut g.api_key),
            (ENV_SEARCH_MODEL, &mut g.models.search),
            (ENV_DEBATE_MODEL, &mut g.models.debate),
            (ENV_GRAPH_MODEL, &mut g.models.graph),
            (ENV_FALLBACK_MODEL, &mut g.fallback_model),
        ];
        for (key, slot) in targets {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *slot = value;
            }
        }
    }

    /// First violated constraint, if any.
    pub fn validate(&self) -> Result<(), String> {
        self.generation.validate()?;
        self.search.validate()?;
        self.ensemble.validate().map_err(|e| e.to_string())?;
        self.drift.validate()?;
        if self.orchestrator.engine_timeout_secs == 0 {
            return Err("orchestrator.engine_timeout_secs must be > 0".into());
        }
        if self.orchestrator.rerun_search_iterations == 0 {
            return Err("orchestrator.rerun_search_iterations must be > 0".into());
        }
        Ok(())
    }
}

/// Check if an inference endpoint is reachable (GET /models).
pub async fn check_endpoint(url: &str) -> bool {
    let models_url = format!("{}/models", url.trim_end_matches('/'));
    match reqwest::Client::new()
        .get(&models_url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}
