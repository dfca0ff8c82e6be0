//! Per-run telemetry for forecasting sessions.
//!
//! One `RunTelemetry` line is appended to a JSONL file per orchestration run.
//! `TelemetryReader` loads such a file back for aggregate analysis.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fusion::EngineId;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::orchestrator::ReasoningReport;

/// Summary of one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTelemetry {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub engines_ok: Vec<EngineId>,
    pub engines_failed: Vec<EngineId>,
    /// `None` when the run produced no report.
    pub consensus: Option<f64>,
    /// Leading outcome and its fused probability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leading: Option<(String, f64)>,
    pub generator_calls: usize,
    pub generator_failures: usize,
}

impl RunTelemetry {
    pub fn from_report(report: &ReasoningReport, started_at: DateTime<Utc>, elapsed: Duration) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            elapsed_ms: elapsed.as_millis() as u64,
            engines_ok: report.engines.keys().copied().collect(),
            engines_failed: report.failures.iter().map(|f| f.engine).collect(),
            consensus: Some(report.consensus),
            leading: report.leading().map(|o| (o.name.clone(), o.probability)),
            generator_calls: report.usage.calls,
            generator_failures: report.usage.failures,
        }
    }

    /// A run that ended in an orchestration error.
    pub fn failed(
        started_at: DateTime<Utc>,
        elapsed: Duration,
        engines_failed: Vec<EngineId>,
        generator_calls: usize,
        generator_failures: usize,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            elapsed_ms: elapsed.as_millis() as u64,
            engines_ok: Vec::new(),
            engines_failed,
            consensus: None,
            leading: None,
            generator_calls,
            generator_failures,
        }
    }
}

/// Append `run` to the JSONL file at `path`, creating it if needed.
pub fn append_telemetry(run: &RunTelemetry, path: &Path) {
    match serde_json::to_string(run) {
        Ok(json) => {
            use std::io::Write;
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{json}") {
                        warn!("Failed to append telemetry: {e}");
                    } else {
                        info!(path = %path.display(), run_id = %run.run_id, "Appended run telemetry");
                    }
                }
                Err(e) => warn!("Failed to open telemetry file: {e}"),
            }
        }
        Err(e) => warn!("Failed to serialize telemetry: {e}"),
    }
}

/// Aggregates over many runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateAnalytics {
    pub total_runs: usize,
    /// Share of runs that produced a report.
    pub success_rate: f64,
    /// Mean consensus over successful runs.
    pub average_consensus: f64,
    pub average_elapsed_ms: f64,
    pub generator_failure_rate: f64,
    pub engine_failure_counts: BTreeMap<EngineId, usize>,
}

/// Reads `RunTelemetry` lines back from a JSONL file.
pub struct TelemetryReader {
    runs: Vec<RunTelemetry>,
}

impl TelemetryReader {
    pub fn read_from_file(path: &Path) -> std::io::Result<Self> {
        use std::fs::File;
        use std::io::{BufRead, BufReader};

        let reader = BufReader::new(File::open(path)?);
        let mut runs = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let run: RunTelemetry = serde_json::from_str(&line)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            runs.push(run);
        }
        Ok(Self { runs })
    }

    pub fn runs(&self) -> &[RunTelemetry] {
        &self.runs
    }

    pub fn aggregate_analytics(&self) -> AggregateAnalytics {
        let total_runs = self.runs.len();
        if total_runs == 0 {
            return AggregateAnalytics::default();
        }

        let consensus: Vec<f64> = self.runs.iter().filter_map(|r| r.consensus).collect();
        let calls: usize = self.runs.iter().map(|r| r.generator_calls).sum();
        let failures: usize = self.runs.iter().map(|r| r.generator_failures).sum();
        let mut engine_failure_counts = BTreeMap::new();
        for engine in self.runs.iter().flat_map(|r| &r.engines_failed) {
            *engine_failure_counts.entry(*engine).or_insert(0) += 1;
        }

        AggregateAnalytics {
            total_runs,
            success_rate: consensus.len() as f64 / total_runs as f64,
            average_consensus: if consensus.is_empty() {
                0.0
            } else {
                consensus.iter().sum::<f64>() / consensus.len() as f64
            },
            average_elapsed_ms: self.runs.iter().map(|r| r.elapsed_ms as f64).sum::<f64>()
                / total_runs as f64,
            generator_failure_rate: if calls == 0 {
                0.0
            } else {
                failures as f64 / calls as f64
            },
            engine_failure_counts,
        }
    }
}
