use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio_util::sync::CancellationToken;

/// Trait for the ways a child process can be started and bounded
///
/// Implementations block the calling thread until the child has terminated,
/// been killed on timeout, or been killed because the job was cancelled.
/// Callers inside the async runtime must invoke them from a blocking task.
pub trait ProcessLauncher: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Starts the process and waits for exactly one terminal outcome
    fn launch(&self, request: &LaunchRequest) -> Result<LaunchOutcome>;
}

/// Everything a launcher needs to start one child process
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    /// File fed to the child's standard input; `/dev/null` when absent
    pub stdin: Option<PathBuf>,
    pub timeout: Duration,
    /// Maximum captured bytes per output stream
    pub output_limit: usize,
    pub cancel: CancellationToken,
}

impl LaunchRequest {
    /// Builds a request from a command template such as `["g++", "-o", "%OUTPUT%", "%INPUT%"]`
    pub fn from_template(
        template: &[String],
        mapping: &HashMap<&str, &str>,
        timeout: Duration,
        output_limit: usize,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut argv = apply_template(template, mapping).into_iter();
        let Some(program) = argv.next() else {
            bail!("Empty command template");
        };

        Ok(Self {
            program,
            args: argv.collect(),
            current_dir: None,
            stdin: None,
            timeout,
            output_limit,
            cancel,
        })
    }

    pub fn stdin(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Exited(i32),
    Signaled(i32),
    TimedOut,
    Cancelled,
}

#[derive(Debug)]
pub struct LaunchOutcome {
    pub exit: ExitKind,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Wall time from just before spawn to just after the child was reaped
    pub elapsed: Duration,
    /// Peak resident memory in KB, when the launcher can observe it
    pub peak_memory_kb: Option<u64>,
}

/// Applies template substitutions to every argument of a command template
pub fn apply_template(cmd_template: &[String], mapping: &HashMap<&str, &str>) -> Vec<String> {
    cmd_template
        .iter()
        .map(|s| {
            let mut t = s.clone();
            for (k, v) in mapping.iter() {
                t = t.replace(k, v);
            }
            t
        })
        .collect()
}
