//! rig-core backed text generator with retry, timeout, and model fallback.
//!
//! ```text
//! attempt 0: task model, attempt_timeout
//!   ├─ ok           → return
//!   ├─ timeout      → attempt n+1 on fallback_model with fallback_attempt_timeout
//!   └─ other error  → sleep (n+1)s, attempt n+1 on the same model
//! after max_retries the last error is returned
//! ```

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;
use tracing::{debug, warn};

use super::usage::{UsageLog, UsageRecord};
use super::{GenerationRequest, TaskTag, TextGenerator};
use crate::config::GenerationConfig;
use crate::errors::GenerationError;

/// Retry and fallback-model policy for one logical call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub attempt_timeout: Duration,
    pub fallback_model: String,
    pub fallback_attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            attempt_timeout: config.attempt_timeout(),
            fallback_model: config.fallback_model.clone(),
            fallback_attempt_timeout: config.fallback_attempt_timeout(),
        }
    }

    /// Run `attempt(model)` under this policy, logging every attempt to `usage`.
    pub async fn run<F, Fut>(
        &self,
        task: TaskTag,
        model: &str,
        prompt_chars: usize,
        usage: &UsageLog,
        mut attempt: F,
    ) -> Result<String, GenerationError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<String, GenerationError>>,
    {
        let mut model = model.to_string();
        let mut timeout = self.attempt_timeout;
        let mut last_error = GenerationError::EmptyResponse;

        for n in 0..=self.max_retries {
            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, attempt(model.clone())).await {
                Err(_) => Err(GenerationError::Timeout(timeout)),
                Ok(Ok(text)) if text.trim().is_empty() => Err(GenerationError::EmptyResponse),
                Ok(other) => other,
            };

            usage.record(UsageRecord {
                task,
                model: model.clone(),
                attempt: n,
                elapsed_ms: started.elapsed().as_millis() as u64,
                prompt_chars,
                response_chars: result.as_ref().map_or(0, |t| t.chars().count()),
                error: result.as_ref().err().map(ToString::to_string),
                timestamp: Utc::now(),
            });

            let err = match result {
                Ok(text) => {
                    debug!(%task, %model, attempt = n, "generation succeeded");
                    return Ok(text);
                }
                Err(e) => e,
            };

            if !err.is_retriable() || n == self.max_retries {
                warn!(%task, %model, attempt = n, error = %err, "generation failed");
                return Err(err);
            }

            match err {
                GenerationError::Timeout(_) => {
                    warn!(%task, %model, attempt = n, fallback = %self.fallback_model, "generation timed out, switching model");
                    model = self.fallback_model.clone();
                    timeout = self.fallback_attempt_timeout;
                }
                ref other => {
                    warn!(%task, %model, attempt = n, error = %other, "generation error, retrying");
                    tokio::time::sleep(Duration::from_secs(u64::from(n) + 1)).await;
                }
            }
            last_error = err;
        }

        Err(last_error)
    }
}

/// [`TextGenerator`] over an OpenAI-compatible endpoint via rig.
pub struct RigTextGenerator {
    client: openai::CompletionsClient,
    config: GenerationConfig,
    policy: RetryPolicy,
    usage: UsageLog,
}

impl RigTextGenerator {
    pub fn new(config: GenerationConfig, usage: UsageLog) -> Result<Self, GenerationError> {
        if config.api_key.is_empty() {
            return Err(GenerationError::Configuration(
                "api key is empty (set FORECAST_API_KEY)".into(),
            ));
        }
        let client = openai::CompletionsClient::builder()
            .api_key(&config.api_key)
            .base_url(&config.base_url)
            .build()
            .map_err(|e| GenerationError::Configuration(format!("failed to build client: {e}")))?;
        Ok(Self {
            client,
            policy: RetryPolicy::from_config(&config),
            config,
            usage,
        })
    }

    pub fn usage(&self) -> &UsageLog {
        &self.usage
    }

    async fn attempt(
        &self,
        model: &str,
        preamble: &str,
        prompt: &str,
        temperature: f64,
    ) -> Result<String, GenerationError> {
        let agent = self
            .client
            .agent(model)
            .preamble(preamble)
            .temperature(temperature)
            .build();
        agent
            .prompt(prompt)
            .await
            .map_err(|e| GenerationError::from_provider(e.to_string()))
    }
}

#[async_trait]
impl TextGenerator for RigTextGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let system = request.system_text();
        let user = request.user_text();
        let (preamble, prompt) = (system.as_str(), user.as_str());
        let temperature = request.temperature.unwrap_or(self.config.temperature);
        let model = self.config.model_for(request.task);

        self.policy
            .run(
                request.task,
                model,
                request.prompt_chars(),
                &self.usage,
                move |m| async move { self.attempt(&m, preamble, prompt, temperature).await },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            attempt_timeout: Duration::from_secs(60),
            fallback_model: "fast".into(),
            fallback_attempt_timeout: Duration::from_secs(30),
        }
    }

    /// Returns scripted results in order and records which model was asked.
    fn scripted(
        script: Vec<Option<Result<String, GenerationError>>>,
    ) -> (
        Arc<Mutex<Vec<String>>>,
        impl FnMut(String) -> std::pin::Pin<Box<dyn Future<Output = Result<String, GenerationError>> + Send>>,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_inner = seen.clone();
        let mut script = script.into_iter();
        let f = move |model: String| {
            seen_inner.lock().unwrap().push(model);
            let next = script.next().flatten();
            let fut: std::pin::Pin<Box<dyn Future<Output = _> + Send>> = match next {
                Some(r) => Box::pin(async move { r }),
                // None = hang until the attempt timeout fires
                None => Box::pin(std::future::pending()),
            };
            fut
        };
        (seen, f)
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_switches_to_fallback_model() {
        let usage = UsageLog::with_capacity(10);
        let (seen, f) = scripted(vec![None, Some(Ok("{\"ok\":1}".into()))]);
        let out = policy()
            .run(TaskTag::GraphReasoning, "deep", 10, &usage, f)
            .await
            .unwrap();
        assert_eq!(out, "{\"ok\":1}");
        assert_eq!(*seen.lock().unwrap(), vec!["deep", "fast"]);

        let records = usage.snapshot();
        assert_eq!(records.len(), 2);
        assert!(records[0].error.as_deref().unwrap().contains("timed out"));
        assert!(records[1].succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_retry_same_model_then_give_up() {
        let usage = UsageLog::with_capacity(10);
        let err = || Some(Err(GenerationError::Transport("reset".into())));
        let (seen, f) = scripted(vec![err(), err(), err()]);
        let started = tokio::time::Instant::now();
        let result = policy().run(TaskTag::Debate, "balanced", 10, &usage, f).await;
        assert!(matches!(result, Err(GenerationError::Transport(_))));
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert!(seen.lock().unwrap().iter().all(|m| m == "balanced"));
        // back-off of 1s then 2s
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(usage.summary().failures, 3);
    }

    #[tokio::test]
    async fn configuration_errors_do_not_retry() {
        let usage = UsageLog::with_capacity(10);
        let (seen, f) = scripted(vec![Some(Err(GenerationError::Configuration("bad".into())))]);
        let result = policy().run(TaskTag::Debate, "balanced", 10, &usage, f).await;
        assert!(matches!(result, Err(GenerationError::Configuration(_))));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blank_responses_are_retried() {
        let usage = UsageLog::with_capacity(10);
        let (_, f) = scripted(vec![Some(Ok("  ".into())), Some(Ok("done".into()))]);
        let out = policy()
            .run(TaskTag::SearchEvaluate, "balanced", 10, &usage, f)
            .await;
        assert_eq!(out.unwrap(), "done");
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let config = GenerationConfig {
            api_key: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            RigTextGenerator::new(config, UsageLog::default()),
            Err(GenerationError::Configuration(_))
        ));
    }
}
