use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use super::launcher::{ExitKind, LaunchOutcome, LaunchRequest, ProcessLauncher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    RuntimeError,
    TimeLimitExceeded,
}

/// Result of a single program execution
#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Standard output with trailing whitespace removed
    pub output: String,
    pub stderr: String,
    pub elapsed_ms: u64,
    /// Peak resident memory, 0 when the launcher cannot measure it
    pub memory_kb: u64,
    /// Human-readable summary of a failed run
    pub message: String,
}

/// Executes a prepared program against a job's input file
pub struct Runner {
    launcher: Arc<dyn ProcessLauncher>,
    output_limit: usize,
}

impl Runner {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, output_limit: usize) -> Self {
        Self {
            launcher,
            output_limit,
        }
    }

    /// Runs `command` with `input` on stdin, bounded by `timeout`
    ///
    /// Never fails: launcher errors come back as a runtime error report.
    pub fn run(
        &self,
        command: &[String],
        input: &Path,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> RunReport {
        let start_time = Instant::now();
        let launched = self.launch(command, input, timeout, cancel);

        match launched {
            Ok(outcome) => classify(outcome, timeout),
            Err(e) => {
                log::warn!("Program launch failed: {e:#}");
                let message = format!("{e:#}");
                RunReport {
                    outcome: RunOutcome::RuntimeError,
                    output: String::new(),
                    stderr: message.clone(),
                    elapsed_ms: start_time.elapsed().as_millis() as u64,
                    memory_kb: 0,
                    message,
                }
            }
        }
    }

    fn launch(
        &self,
        command: &[String],
        input: &Path,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<LaunchOutcome> {
        let request = LaunchRequest::from_template(
            command,
            &Default::default(),
            timeout,
            self.output_limit,
            cancel,
        )?
        .stdin(input);

        self.launcher.launch(&request)
    }
}

/// Maps a terminated process onto the three run outcomes
pub fn classify(outcome: LaunchOutcome, timeout: Duration) -> RunReport {
    let stderr = String::from_utf8_lossy(&outcome.stderr).into_owned();
    let elapsed_ms = outcome.elapsed.as_millis() as u64;
    let memory_kb = outcome.peak_memory_kb.unwrap_or(0);

    let (outcome_kind, message, elapsed_ms) = match outcome.exit {
        ExitKind::Exited(0) => (RunOutcome::Success, String::new(), elapsed_ms),
        // Report the limit itself, not how far past it the kill landed
        ExitKind::TimedOut => (
            RunOutcome::TimeLimitExceeded,
            format!("Time limit exceeded ({} ms)", timeout.as_millis()),
            timeout.as_millis() as u64,
        ),
        ExitKind::Cancelled => (
            RunOutcome::RuntimeError,
            "Execution cancelled".to_string(),
            elapsed_ms,
        ),
        ExitKind::Exited(code) => (
            RunOutcome::RuntimeError,
            format!("Process exited with code {code}"),
            elapsed_ms,
        ),
        ExitKind::Signaled(signal) => (
            RunOutcome::RuntimeError,
            format!("Process terminated by signal {signal}"),
            elapsed_ms,
        ),
    };

    let output = if outcome_kind == RunOutcome::Success {
        String::from_utf8_lossy(&outcome.stdout).trim_end().to_string()
    } else {
        String::new()
    };

    RunReport {
        outcome: outcome_kind,
        output,
        stderr,
        elapsed_ms,
        memory_kb,
        message,
    }
}
