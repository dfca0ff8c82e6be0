use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use forecast_agents::config::{check_endpoint, ForecastConfig};
use forecast_agents::telemetry::{append_telemetry, RunTelemetry};
use forecast_agents::signals::{review_signals, SignalReview};
use forecast_agents::{
    DataContext, OrchestrationError, Orchestrator, PredictionTask, ReasoningReport,
    RigTextGenerator, UsageLog,
};
use fusion::ensemble::SimulationResult;
use fusion::signals::{OutcomeSignal, SignalFusion};
use serde::Serialize;
use tracing::{info, warn};

/// Run every reasoning engine on one question and print the fused forecast.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Question to forecast
    #[arg(long)]
    question: String,

    /// Candidate outcome (repeat for each outcome)
    #[arg(long = "outcome", required = true)]
    outcomes: Vec<String>,

    /// Category of the question
    #[arg(long, default_value = "forecast")]
    kind: String,

    /// Indicator as key=value (repeatable)
    #[arg(long = "data", value_parser = parse_key_value)]
    data: Vec<(String, f64)>,

    /// Re-run with indicator overrides as key=value (repeatable)
    #[arg(long = "override", value_parser = parse_key_value)]
    overrides: Vec<(String, f64)>,

    /// Government support from a pre-computed simulation, 0..1
    #[arg(long)]
    simulation_support: Option<f64>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Search iterations (overrides search.iterations)
    #[arg(long)]
    iterations: Option<u32>,

    /// Seed for the search engine's random choices
    #[arg(long)]
    seed: Option<u64>,

    /// Skip the graph-of-thought engine
    #[arg(long, default_value_t = false)]
    no_graph: bool,

    /// Crowd probability as outcome=p (repeatable); enables signal fusion
    #[arg(long = "crowd", value_parser = parse_key_value)]
    crowd: Vec<(String, f64)>,

    /// Reputation-weighted crowd probability as outcome=p (repeatable)
    #[arg(long = "reputation", value_parser = parse_key_value)]
    reputation: Vec<(String, f64)>,

    /// Append a run summary to this JSONL file
    #[arg(long)]
    telemetry: Option<PathBuf>,
}

#[derive(Serialize)]
struct Output<'a> {
    #[serde(flatten)]
    report: &'a ReasoningReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    signals: Option<SignalReview>,
}

fn to_signals(pairs: Vec<(String, f64)>) -> Vec<OutcomeSignal> {
    pairs
        .into_iter()
        .map(|(name, p)| OutcomeSignal::new(name, p))
        .collect()
}

fn parse_key_value(raw: &str) -> Result<(String, f64), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid number in '{raw}': {e}"))?;
    if !value.is_finite() {
        return Err(format!("value in '{raw}' must be finite"));
    }
    Ok((key.trim().to_string(), value))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = ForecastConfig::load(args.config.as_deref())?;
    if let Some(iterations) = args.iterations {
        config.search.iterations = iterations;
    }
    if args.seed.is_some() {
        config.search.seed = args.seed;
    }
    if args.no_graph {
        config.graph.enabled = false;
    }
    config.validate().map_err(anyhow::Error::msg)?;

    info!(
        base_url = %config.generation.base_url,
        search_model = %config.generation.models.search,
        graph = config.graph.enabled,
        prompt_version = forecast_agents::prompts::PROMPT_VERSION,
        "Forecast orchestrator starting"
    );
    if !check_endpoint(&config.generation.base_url).await {
        warn!(url = %config.generation.base_url, "Inference endpoint not reachable; engines will fall back");
    }

    let usage = UsageLog::with_capacity(config.generation.usage_log_capacity);
    let generator = RigTextGenerator::new(config.generation.clone(), usage.clone())
        .context("failed to build text generator")?;
    let orchestrator = Orchestrator::new(Arc::new(generator), &config, usage.clone())?;

    let task = PredictionTask {
        kind: args.kind,
        question: args.question,
        outcomes: args.outcomes,
        key_variables: args.data.iter().map(|(k, _)| k.clone()).collect(),
    };
    let data = DataContext::new(args.data.into_iter().collect());
    let simulation = match args.simulation_support {
        Some(g) if !(0.0..=1.0).contains(&g) => {
            anyhow::bail!("--simulation-support must be within 0..1, got {g}")
        }
        Some(g) => Some(SimulationResult {
            final_distribution: fusion::ensemble::SupportSplit::from_government(g),
            agent_count: 0,
            ticks: 0,
        }),
        None => None,
    };

    let started_at = Utc::now();
    let clock = Instant::now();
    let outcome = if args.overrides.is_empty() {
        orchestrator.reason(&task, &data, simulation).await
    } else {
        let overrides: BTreeMap<String, f64> = args.overrides.into_iter().collect();
        orchestrator.rerun_with_overrides(&task, &data, &overrides).await
    };

    if let Some(path) = &args.telemetry {
        let run = match &outcome {
            Ok(report) => RunTelemetry::from_report(report, started_at, clock.elapsed()),
            Err(e) => {
                let failed = match e {
                    OrchestrationError::NoEnginesAvailable { failures } => {
                        failures.iter().map(|f| f.engine).collect()
                    }
                    _ => Vec::new(),
                };
                let summary = usage.summary();
                RunTelemetry::failed(
                    started_at,
                    clock.elapsed(),
                    failed,
                    summary.calls,
                    summary.failures,
                )
            }
        };
        append_telemetry(&run, path);
    }

    let report = outcome?;
    if let Some(leading) = report.leading() {
        info!(
            outcome = %leading.name,
            probability = leading.probability,
            consensus = report.consensus,
            "Forecast complete"
        );
    }
    let signals = (!args.crowd.is_empty()).then(|| {
        review_signals(
            &task.query(),
            &report,
            to_signals(args.crowd),
            to_signals(args.reputation),
            &SignalFusion::default(),
            &config.drift,
        )
    });
    let output = Output {
        report: &report,
        signals,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_parsing() {
        assert_eq!(parse_key_value("gdp = 1.5").unwrap(), ("gdp".to_string(), 1.5));
        assert!(parse_key_value("gdp").is_err());
        assert!(parse_key_value("gdp=high").is_err());
        assert!(parse_key_value("gdp=inf").is_err());
    }

    #[test]
    fn args_parse_repeated_flags() {
        let args = Args::try_parse_from([
            "forecast-agents",
            "--question",
            "Who wins?",
            "--outcome",
            "A",
            "--outcome",
            "B",
            "--data",
            "turnout=0.6",
            "--no-graph",
        ])
        .unwrap();
        assert_eq!(args.outcomes, vec!["A", "B"]);
        assert_eq!(args.data, vec![("turnout".to_string(), 0.6)]);
        assert!(args.no_graph);
        assert_eq!(args.kind, "forecast");
    }
}
