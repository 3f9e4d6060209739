use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LanguageConfig;
use crate::sandbox::{JobArtifacts, RunOutcome, RunReport};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Compiling,
    Running,
    Completed,
    Failed,
}

/// One compile-and-run attempt for a single source/input pair
///
/// The job exclusively owns the paths in `artifacts` for its whole lifetime.
#[derive(Debug)]
pub struct Job {
    pub artifacts: JobArtifacts,
    pub language: LanguageConfig,
    pub status: JobStatus,
    /// Bounds of the run phase, compile time excluded
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(artifacts: JobArtifacts, language: LanguageConfig) -> Self {
        Self {
            artifacts,
            language,
            status: JobStatus::Created,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.artifacts.id
    }

    pub fn transition(&mut self, next: JobStatus) {
        log::debug!("Job {}: {:?} -> {:?}", self.id(), self.status, next);
        self.status = next;
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    Success,
    CompilationError,
    RuntimeError,
    TimeLimitExceeded,
    InvalidInput,
}

/// Terminal result of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub kind: VerdictKind,
    /// Trimmed standard output, empty unless the run succeeded
    pub output: String,
    /// Run phase only; absent when nothing was run
    pub execution_time_ms: Option<u64>,
    /// Best effort, 0 when the host cannot measure it
    pub memory_used_kb: u64,
    pub error: Option<String>,
    /// Compiler output or the program's stderr
    pub diagnostics: Option<String>,
}

impl Verdict {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            kind: VerdictKind::InvalidInput,
            output: String::new(),
            execution_time_ms: None,
            memory_used_kb: 0,
            error: Some(message.into()),
            diagnostics: None,
        }
    }

    pub fn compilation_error(diagnostics: String) -> Self {
        Self {
            kind: VerdictKind::CompilationError,
            output: String::new(),
            execution_time_ms: None,
            memory_used_kb: 0,
            error: Some(diagnostics.clone()),
            diagnostics: Some(diagnostics),
        }
    }

    pub fn runtime_error(message: impl Into<String>, diagnostics: Option<String>) -> Self {
        Self {
            kind: VerdictKind::RuntimeError,
            output: String::new(),
            execution_time_ms: None,
            memory_used_kb: 0,
            error: Some(message.into()),
            diagnostics,
        }
    }

    pub fn from_run(report: RunReport) -> Self {
        let kind = match report.outcome {
            RunOutcome::Success => VerdictKind::Success,
            RunOutcome::RuntimeError => VerdictKind::RuntimeError,
            RunOutcome::TimeLimitExceeded => VerdictKind::TimeLimitExceeded,
        };

        Self {
            kind,
            output: report.output,
            execution_time_ms: Some(report.elapsed_ms),
            memory_used_kb: report.memory_kb,
            error: (kind != VerdictKind::Success).then_some(report.message),
            diagnostics: (!report.stderr.is_empty()).then_some(report.stderr),
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == VerdictKind::Success
    }
}
