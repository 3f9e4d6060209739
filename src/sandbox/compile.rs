use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::artifacts::ArtifactStore;
use super::launcher::{ExitKind, LaunchRequest, ProcessLauncher};
use crate::config::LanguageConfig;

/// Result of compilation process
#[derive(Debug)]
pub struct CompilationResult {
    pub success: bool,
    pub binary: PathBuf,
    pub diagnostics: String,
}

/// Turns a job's source file into an executable next to the other artifacts
///
/// A compilation only counts as successful when the toolchain exits with code
/// 0, writes nothing to stderr, and leaves the executable behind. Anything the
/// toolchain prints to stderr, warnings included, fails the job.
pub struct Compiler {
    store: Arc<ArtifactStore>,
    launcher: Arc<dyn ProcessLauncher>,
    timeout: Duration,
    output_limit: usize,
}

impl Compiler {
    pub fn new(
        store: Arc<ArtifactStore>,
        launcher: Arc<dyn ProcessLauncher>,
        timeout: Duration,
        output_limit: usize,
    ) -> Self {
        Self {
            store,
            launcher,
            timeout,
            output_limit,
        }
    }

    /// Compiles the source code and returns compilation result
    pub fn compile(
        &self,
        language: &LanguageConfig,
        source: &Path,
        cancel: CancellationToken,
    ) -> CompilationResult {
        let binary = self.store.output_path_for(source);
        let Some(template) = language.compile.as_deref() else {
            return self.failed(binary, format!("{} has no compile command", language.name));
        };

        let source_arg = source.to_string_lossy();
        let binary_arg = binary.to_string_lossy();
        let mapping = HashMap::from([
            ("%INPUT%", source_arg.as_ref()),
            ("%OUTPUT%", binary_arg.as_ref()),
        ]);

        let request = match LaunchRequest::from_template(
            template,
            &mapping,
            self.timeout,
            self.output_limit,
            cancel,
        ) {
            Ok(request) => request,
            Err(e) => return self.failed(binary, format!("{e:#}")),
        };

        let outcome = match self.launcher.launch(&request) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Failed to launch compiler for {}: {e:#}", language.name);
                return self.failed(binary, format!("Failed to launch compiler: {e:#}"));
            }
        };

        let stderr = String::from_utf8_lossy(&outcome.stderr).into_owned();
        match outcome.exit {
            ExitKind::TimedOut => self.failed(
                binary,
                format!("Compilation timed out after {} ms", self.timeout.as_millis()),
            ),
            ExitKind::Cancelled => self.failed(binary, "Compilation cancelled".to_string()),
            ExitKind::Signaled(signal) if stderr.is_empty() => self.failed(
                binary,
                format!("Compiler terminated by signal {signal}"),
            ),
            ExitKind::Signaled(_) => self.failed(binary, stderr),
            ExitKind::Exited(code) if code != 0 && stderr.is_empty() => {
                let stdout = String::from_utf8_lossy(&outcome.stdout).into_owned();
                let diagnostics = if stdout.is_empty() {
                    format!("Compiler exited with code {code}")
                } else {
                    stdout
                };
                self.failed(binary, diagnostics)
            }
            ExitKind::Exited(_) if !stderr.is_empty() => self.failed(binary, stderr),
            ExitKind::Exited(_) if !binary.exists() => {
                self.failed(binary, "Compiler produced no output file".to_string())
            }
            ExitKind::Exited(_) => {
                log::debug!(
                    "Compiled {} in {} ms",
                    source.display(),
                    outcome.elapsed.as_millis()
                );
                CompilationResult {
                    success: true,
                    binary,
                    diagnostics: String::new(),
                }
            }
        }
    }

    /// Builds a failed result, making sure no half-made binary stays around
    fn failed(&self, binary: PathBuf, diagnostics: String) -> CompilationResult {
        if let Err(e) = self.store.remove(&binary) {
            log::warn!("Failed to remove rejected binary {}: {e}", binary.display());
        }

        CompilationResult {
            success: false,
            binary,
            diagnostics,
        }
    }
}
