use serde::Serialize;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the preset store, the resolver and the backtest pipeline.
///
/// Absence is never an error here: missing scopes, presets and result
/// documents come back as `None` or an empty collection.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("document {} is corrupt: {reason}", path.display())]
    CorruptStore { path: PathBuf, reason: String },

    #[error("missing required parameter `{0}`")]
    MissingParameter(String),

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("invalid storage path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("market data request failed: {0}")]
    UpstreamFailure(String),

    #[error("strategy runner failed ({status}): {message}")]
    RunnerFailure {
        status: String,
        message: String,
        diagnostics: String,
    },

    #[error("price series has {bars} bars but signal series has {signals} points")]
    SeriesMismatch { bars: usize, signals: usize },

    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CorruptStore,
    MissingParameter,
    InvalidParameter,
    InvalidPath,
    UpstreamFailure,
    RunnerFailure,
    SeriesMismatch,
    Io,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::CorruptStore => "corrupt_store",
            ErrorKind::MissingParameter => "missing_parameter",
            ErrorKind::InvalidParameter => "invalid_parameter",
            ErrorKind::InvalidPath => "invalid_path",
            ErrorKind::UpstreamFailure => "upstream_failure",
            ErrorKind::RunnerFailure => "runner_failure",
            ErrorKind::SeriesMismatch => "series_mismatch",
            ErrorKind::Io => "io",
        }
    }
}

/// Structured failure handed to whatever sits in front of the engine.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::CorruptStore { .. } => ErrorKind::CorruptStore,
            EngineError::MissingParameter(_) => ErrorKind::MissingParameter,
            EngineError::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            EngineError::InvalidPath { .. } => ErrorKind::InvalidPath,
            EngineError::UpstreamFailure(_) => ErrorKind::UpstreamFailure,
            EngineError::RunnerFailure { .. } => ErrorKind::RunnerFailure,
            EngineError::SeriesMismatch { .. } => ErrorKind::SeriesMismatch,
            EngineError::Io { .. } => ErrorKind::Io,
        }
    }

    pub fn report(&self) -> FailureReport {
        let diagnostics = match self {
            EngineError::RunnerFailure { diagnostics, .. } if !diagnostics.is_empty() => {
                Some(diagnostics.clone())
            }
            _ => None,
        };
        FailureReport {
            kind: self.kind(),
            message: self.to_string(),
            diagnostics,
        }
    }

    pub(crate) fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        EngineError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_failure_report_carries_diagnostics() {
        let error = EngineError::RunnerFailure {
            status: "exit status: 2".to_string(),
            message: "strategy unit exited unsuccessfully".to_string(),
            diagnostics: "Traceback: boom".to_string(),
        };
        let report = error.report();
        assert_eq!(report.kind, ErrorKind::RunnerFailure);
        assert_eq!(report.diagnostics.as_deref(), Some("Traceback: boom"));

        let json = serde_json::to_value(&report).expect("report serializes");
        assert_eq!(json["kind"], "runner_failure");
    }

    #[test]
    fn reports_without_diagnostics_omit_the_field() {
        let report = EngineError::MissingParameter("ema_fast".to_string()).report();
        assert_eq!(report.kind.as_str(), "missing_parameter");
        assert!(report.message.contains("ema_fast"));
        let json = serde_json::to_value(&report).expect("report serializes");
        assert!(json.get("diagnostics").is_none());
    }
}
