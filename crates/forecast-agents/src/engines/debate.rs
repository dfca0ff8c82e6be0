//! Three-round persona debate.
//!
//! ```text
//! round 1  JoinSet × 4 personas  → opening statements   (fallback: templated, uniform)
//! round 2  JoinSet × 4 personas  → rebuttals            (fallback: keep opening split)
//! round 3  judge, sequential     → judgment             (fallback: uniform, confidence 0.5)
//! ```
//!
//! A round only starts after every task of the previous round has settled.
//! A persona whose task fails or panics is represented by its fallback, so
//! the transcript always holds exactly three rounds.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fusion::debate::{DebateTranscript, Judgment, OpeningStatement, Persona, Rebuttal};
use fusion::ensemble::DebateTrace;
use fusion::{distribution, DegradationReport, EngineId, EnginePayload, EngineResult};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{ReasoningContext, ReasoningEngine};
use crate::config::DebateConfig;
use crate::errors::EngineError;
use crate::generation::{generate_structured, GenerationRequest, TaskTag, TextGenerator};
use crate::prompts;

pub struct DebateEngine {
    generator: Arc<dyn TextGenerator>,
    config: DebateConfig,
    call_timeout: Duration,
}

impl DebateEngine {
    pub fn new(generator: Arc<dyn TextGenerator>, config: DebateConfig, call_timeout: Duration) -> Self {
        Self {
            generator,
            config,
            call_timeout,
        }
    }

    pub async fn run(
        &self,
        ctx: &ReasoningContext,
        outcomes: &[String],
    ) -> Result<EngineResult, EngineError> {
        if outcomes.is_empty() {
            return Err(EngineError::Configuration("no outcomes to debate".into()));
        }
        let outcomes: Arc<[String]> = outcomes.into();
        let mut transcript = DebateTranscript::new();
        let mut report = DegradationReport::default();
        transcript.start().map_err(internal)?;

        // Round 1
        let results = run_round("opening", |persona| {
            let generator = self.generator.clone();
            let (system, user) =
                prompts::debate_opening(persona, &ctx.query, &ctx.data_summary, &outcomes);
            let timeout = ctx.call_timeout(self.call_timeout);
            let request = GenerationRequest::new(TaskTag::Debate, system, user, timeout);
            let outcomes = outcomes.clone();
            async move {
                let map = generate_structured(generator.as_ref(), &request)
                    .await
                    .map_err(|e| e.to_string())?;
                OpeningStatement::from_response(&map, &outcomes)
                    .ok_or_else(|| "no analysis in response".to_string())
            }
        })
        .await;
        let openings = settle("opening", results, &mut report, |persona| {
            OpeningStatement::fallback(persona, &ctx.query, &outcomes)
        });
        transcript.record_opening(openings.clone()).map_err(internal)?;

        // Round 2
        let digest = transcript.opening_digest(self.config.summary_chars);
        let results = run_round("rebuttal", |persona| {
            let generator = self.generator.clone();
            let (system, user) = prompts::debate_rebuttal(persona, &ctx.query, &digest, &outcomes);
            let timeout = ctx.call_timeout(self.call_timeout);
            let request = GenerationRequest::new(TaskTag::Debate, system, user, timeout);
            let outcomes = outcomes.clone();
            let prior = openings.get(&persona).cloned();
            async move {
                let prior = prior.ok_or_else(|| "no opening statement".to_string())?;
                let map = generate_structured(generator.as_ref(), &request)
                    .await
                    .map_err(|e| e.to_string())?;
                Rebuttal::from_response(&map, &outcomes, &prior)
                    .ok_or_else(|| "no rebuttals or probabilities in response".to_string())
            }
        })
        .await;
        let rebuttals = settle("rebuttal", results, &mut report, |persona| match openings.get(&persona) {
            Some(prior) => Rebuttal::fallback(persona, prior),
            None => Rebuttal::fallback(
                persona,
                &OpeningStatement::fallback(persona, &ctx.query, &outcomes),
            ),
        });
        transcript.record_rebuttals(rebuttals).map_err(internal)?;

        // Round 3
        let judgment = self.judge(ctx, &transcript, &outcomes, &mut report).await;
        let mut probabilities = judgment.probabilities.clone();
        if probabilities.is_empty() {
            probabilities = distribution::uniform(&outcomes);
        }
        let consensus = judgment.confidence;
        let reasoning = judgment.reasoning.clone();
        let key_arguments = judgment.key_arguments.clone();
        transcript.record_judgment(judgment).map_err(internal)?;

        info!(
            consensus,
            calls = report.calls,
            fallbacks = report.fallbacks,
            "debate judged"
        );

        let trace = DebateTrace {
            transcript,
            consensus,
            reasoning,
            key_arguments,
            degradation: report,
        };
        Ok(EngineResult::new(probabilities, EnginePayload::Debate(trace)))
    }

    async fn judge(
        &self,
        ctx: &ReasoningContext,
        transcript: &DebateTranscript,
        outcomes: &[String],
        report: &mut DegradationReport,
    ) -> Judgment {
        let digest = transcript.judge_digest(self.config.summary_chars);
        let (system, user) = prompts::debate_judge(&ctx.query, &digest, outcomes);
        let timeout = ctx.call_timeout(self.call_timeout);
        let request = GenerationRequest::new(TaskTag::Debate, system, user, timeout);

        let failure = match generate_structured(self.generator.as_ref(), &request).await {
            Ok(map) => match Judgment::from_response(&map, outcomes) {
                Some(judgment) => {
                    report.record_success();
                    return judgment;
                }
                None => "no probabilities or reasoning in response".to_string(),
            },
            Err(e) => e.to_string(),
        };

        warn!(reason = %failure, "judge fell back");
        report.record_fallback(format!("judge: {failure}"));
        Judgment::fallback(outcomes)
    }
}

#[async_trait]
impl ReasoningEngine for DebateEngine {
    fn id(&self) -> EngineId {
        EngineId::Debate
    }

    async fn reason(&self, ctx: &ReasoningContext) -> Result<EngineResult, EngineError> {
        ctx.validate()?;
        self.run(ctx, &ctx.outcomes).await
    }
}

fn internal(e: impl std::fmt::Display) -> EngineError {
    EngineError::Internal(e.to_string())
}

/// Spawn one task per persona and wait for all of them.
///
/// Personas whose task panicked are absent from the returned map.
async fn run_round<T, F, Fut>(round: &'static str, mut make: F) -> BTreeMap<Persona, Result<T, String>>
where
    T: Send + 'static,
    F: FnMut(Persona) -> Fut,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
{
    let mut join_set = JoinSet::new();
    for persona in Persona::ALL {
        let task = make(persona);
        join_set.spawn(async move { (persona, task.await) });
    }

    let mut results = BTreeMap::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((persona, result)) => {
                debug!(round, %persona, ok = result.is_ok(), "persona settled");
                results.insert(persona, result);
            }
            Err(e) => warn!(round, error = %e, "persona task panicked"),
        }
    }
    results
}

/// One statement per persona, substituting fallbacks for failures.
fn settle<T>(
    round: &'static str,
    mut results: BTreeMap<Persona, Result<T, String>>,
    report: &mut DegradationReport,
    fallback: impl Fn(Persona) -> T,
) -> BTreeMap<Persona, T> {
    Persona::ALL
        .into_iter()
        .map(|persona| {
            let statement = match results.remove(&persona) {
                Some(Ok(statement)) => {
                    report.record_success();
                    statement
                }
                Some(Err(reason)) => {
                    warn!(round, %persona, %reason, "persona fell back");
                    report.record_fallback(format!("{round} {persona}: {reason}"));
                    fallback(persona)
                }
                None => {
                    report.record_fallback(format!("{round} {persona}: task panicked"));
                    fallback(persona)
                }
            };
            (persona, statement)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::mock::Scripted;
    use crate::errors::GenerationError;
    use fusion::debate::{DebatePhase, DEFAULT_JUDGE_CONFIDENCE};

    fn outcomes() -> Vec<String> {
        vec!["Yes".into(), "No".into()]
    }

    fn ctx() -> ReasoningContext {
        ReasoningContext::new("Will the bill pass?", outcomes(), "whip_count=0.52")
    }

    fn engine(generator: Scripted) -> DebateEngine {
        DebateEngine::new(Arc::new(generator), DebateConfig::default(), Duration::from_secs(5))
    }

    fn trace(result: &EngineResult) -> &DebateTrace {
        match &result.payload {
            EnginePayload::Debate(t) => t,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    fn persona_of(request: &GenerationRequest) -> Option<Persona> {
        let system = request.system_text();
        Persona::ALL
            .into_iter()
            .find(|p| system.starts_with(p.instruction()))
    }

    #[tokio::test]
    async fn failing_generator_completes_all_rounds() {
        let generator = Arc::new(Scripted::failing());
        let engine = DebateEngine::new(generator.clone(), DebateConfig::default(), Duration::from_secs(5));
        let result = engine.run(&ctx(), &outcomes()).await.unwrap();
        let t = trace(&result);
        assert_eq!(generator.calls(), 9);
        assert_eq!(t.transcript.rounds.len(), 3);
        assert_eq!(t.transcript.phase, DebatePhase::Judged);
        assert!(t.transcript.is_complete());
        assert_eq!(
            result.outcome_probabilities.keys().cloned().collect::<Vec<_>>(),
            vec!["No".to_string(), "Yes".to_string()]
        );
        assert_eq!(t.consensus, DEFAULT_JUDGE_CONFIDENCE);
        assert!(t.key_arguments.is_empty());
        assert_eq!(t.degradation.calls, 9);
        assert_eq!(t.degradation.fallbacks, 9);
    }

    #[tokio::test]
    async fn openings_are_independent_per_persona() {
        let generator = Scripted::new(|req| {
            if req.system_text().contains("You've heard the opening statements") {
                return Err(GenerationError::Transport("skip".into()));
            }
            match persona_of(req) {
                Some(p) => Ok(format!(
                    r#"{{"analysis": "view of {p}", "probabilities": {{"Yes": 0.6, "No": 0.4}}}}"#
                )),
                None => Err(GenerationError::Transport("judge down".into())),
            }
        });
        let result = engine(generator).run(&ctx(), &outcomes()).await.unwrap();
        let openings = trace(&result).transcript.openings().unwrap();
        assert_eq!(openings.len(), 4);
        for persona in Persona::ALL {
            let s = &openings[&persona];
            assert_eq!(s.analysis, format!("view of {persona}"));
            assert!(!s.fallback);
        }
        // rebuttal fallbacks keep the opening split
        let rebuttals = trace(&result).transcript.rebuttals().unwrap();
        assert!(rebuttals.values().all(|r| r.fallback && (r.updated_probabilities["Yes"] - 0.6).abs() < 1e-9));
    }

    #[tokio::test]
    async fn judge_result_drives_output() {
        let generator = Scripted::new(|req| {
            if req.system_text().starts_with(prompts::JUDGE_PREAMBLE) {
                Ok(r#"```json
{"probabilities": {"Yes": 3, "No": 1, "Maybe": 5}, "reasoning": "whips hold",
 "key_arguments": [{"from": "historian", "argument": "precedent", "weight": 0.8}],
 "confidence": 0.72}
```"#
                    .into())
            } else {
                Err(GenerationError::Transport("down".into()))
            }
        });
        let result = engine(generator).run(&ctx(), &outcomes()).await.unwrap();
        let t = trace(&result);
        assert!((result.outcome_probabilities["Yes"] - 0.75).abs() < 1e-9);
        assert!((result.outcome_probabilities["No"] - 0.25).abs() < 1e-9);
        assert!(!result.outcome_probabilities.contains_key("Maybe"));
        assert_eq!(t.consensus, 0.72);
        assert_eq!(t.reasoning, "whips hold");
        assert_eq!(t.key_arguments.len(), 1);
        assert_eq!(t.degradation.fallbacks, 8);
    }

    #[tokio::test]
    async fn panicking_persona_gets_fallback() {
        let generator = Scripted::new(|req| {
            if persona_of(req) == Some(Persona::Contrarian) {
                panic!("contrarian exploded");
            }
            Err(GenerationError::Transport("down".into()))
        });
        let result = engine(generator).run(&ctx(), &outcomes()).await.unwrap();
        let openings = trace(&result).transcript.openings().unwrap();
        assert!(openings[&Persona::Contrarian].fallback);
        assert_eq!(openings.len(), 4);
        assert_eq!(trace(&result).transcript.rounds.len(), 3);
    }

    #[tokio::test]
    async fn empty_outcomes_fail_fast() {
        let generator = Arc::new(Scripted::failing());
        let engine = DebateEngine::new(generator.clone(), DebateConfig::default(), Duration::from_secs(5));
        let err = engine.run(&ctx(), &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert_eq!(generator.calls(), 0);
    }
}
