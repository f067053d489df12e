//! Execution boundary for strategy runs.
//!
//! A caller hands a [`RunRequest`] (strategy id plus resolved parameters) to a
//! [`StrategyRunner`] and gets back either a [`RunResponse`] naming where the
//! results were written, or an error. [`InProcessRunner`] drives the engine
//! directly; [`ProcessRunner`] launches an isolated unit that receives the
//! parameter map as one JSON object on stdin.

use crate::engine::BacktestEngine;
use crate::error::EngineError;
use crate::parameters::ResolvedParameters;
use crate::performance::PerformanceSummary;
use crate::results::ResultStore;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub strategy: String,
    pub parameters: ResolvedParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub run_id: Uuid,
    pub equity_path: PathBuf,
    pub trades_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<PerformanceSummary>,
}

#[async_trait]
pub trait StrategyRunner: Send + Sync {
    async fn run(&self, request: &RunRequest) -> Result<RunResponse, EngineError>;
}

pub struct InProcessRunner {
    engine: BacktestEngine,
}

impl InProcessRunner {
    pub fn new(engine: BacktestEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl StrategyRunner for InProcessRunner {
    async fn run(&self, request: &RunRequest) -> Result<RunResponse, EngineError> {
        let report = self.engine.run(&request.strategy, &request.parameters).await?;
        Ok(RunResponse {
            run_id: report.run_id,
            equity_path: self.engine.results().equity_path(),
            trades_path: self.engine.results().trades_path(),
            summary: Some(report.summary),
        })
    }
}

pub struct ProcessRunner {
    program: PathBuf,
    args: Vec<String>,
    results: ResultStore,
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        results: ResultStore,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            results,
            timeout,
        }
    }
}

#[async_trait]
impl StrategyRunner for ProcessRunner {
    async fn run(&self, request: &RunRequest) -> Result<RunResponse, EngineError> {
        let run_id = Uuid::new_v4();
        let payload = Value::Object(request.parameters.to_json_object()).to_string();

        info!(
            "Launching {} for run {} ({})",
            self.program.display(),
            run_id,
            request.strategy
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("RESULTS_DIR", self.results.dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| EngineError::RunnerFailure {
                status: "spawn failed".to_string(),
                message: format!("could not launch {}: {}", self.program.display(), err),
                diagnostics: String::new(),
            })?;

        let stdin = child.stdin.take();
        let completion = async move {
            if let Some(mut stdin) = stdin {
                // A unit may exit without reading its input; its exit status decides.
                if let Err(err) = stdin.write_all(payload.as_bytes()).await {
                    debug!("Strategy unit stdin closed early: {}", err);
                }
            }
            child.wait_with_output().await
        };

        // Dropping the timed-out future drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, completion).await {
            Ok(result) => result.map_err(|err| EngineError::RunnerFailure {
                status: "wait failed".to_string(),
                message: format!("failed to collect output of {}: {}", self.program.display(), err),
                diagnostics: String::new(),
            })?,
            Err(_) => {
                warn!("Run {} exceeded {}s and was killed", run_id, self.timeout.as_secs());
                return Err(EngineError::RunnerFailure {
                    status: "timed out".to_string(),
                    message: format!(
                        "{} did not finish within {}s",
                        self.program.display(),
                        self.timeout.as_secs()
                    ),
                    diagnostics: String::new(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            warn!("Run {} failed with {}", run_id, output.status);
            return Err(EngineError::RunnerFailure {
                status: output.status.to_string(),
                message: format!("{} exited unsuccessfully", self.program.display()),
                diagnostics: collect_diagnostics(&stderr, &stdout),
            });
        }

        info!("Run {} finished with {}", run_id, output.status);
        Ok(RunResponse {
            run_id,
            equity_path: self.results.equity_path(),
            trades_path: self.results.trades_path(),
            summary: summary_from_stdout(&stdout),
        })
    }
}

fn collect_diagnostics(stderr: &str, stdout: &str) -> String {
    let mut diagnostics = String::new();
    if !stderr.trim().is_empty() {
        diagnostics.push_str(stderr.trim_end());
    }
    if !stdout.trim().is_empty() {
        if !diagnostics.is_empty() {
            diagnostics.push('\n');
        }
        diagnostics.push_str("[stdout]\n");
        diagnostics.push_str(stdout.trim_end());
    }
    diagnostics
}

/// A unit may print its report; a `summary` field is picked up when present.
fn summary_from_stdout(stdout: &str) -> Option<PerformanceSummary> {
    let report: Value = serde_json::from_str(stdout.trim()).ok()?;
    serde_json::from_value(report.get("summary")?.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_prefer_stderr_and_label_stdout() {
        assert_eq!(collect_diagnostics("boom\n", ""), "boom");
        assert_eq!(collect_diagnostics("", "partial\n"), "[stdout]\npartial");
        assert_eq!(collect_diagnostics("boom", "partial"), "boom\n[stdout]\npartial");
        assert_eq!(collect_diagnostics(" \n", ""), "");
    }

    #[test]
    fn summary_is_optional_in_unit_output() {
        assert!(summary_from_stdout("not json").is_none());
        assert!(summary_from_stdout("{\"runId\": 1}").is_none());

        let stdout = serde_json::json!({
            "summary": {
                "closedTrades": 2, "winningTrades": 1, "losingTrades": 1, "winRate": 0.5,
                "realizedPnl": 1.0, "initialCapital": 100.0, "finalCapital": 101.0,
                "maxDrawdown": 2.0, "maxDrawdownPercent": 1.9, "positionOpen": false
            }
        })
        .to_string();
        let summary = summary_from_stdout(&stdout).unwrap();
        assert_eq!(summary.closed_trades, 2);
        assert_eq!(summary.final_capital, 101.0);
    }
}
