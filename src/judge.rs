use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::cleanup::CleanupScheduler;
use crate::config::{JudgeConfig, LanguageConfig};
use crate::job::{Job, JobStatus, Verdict};
use crate::sandbox::{ArtifactStore, Compiler, ProcessLauncher, Runner, apply_template};

/// Public entry point of the judging engine
///
/// A `Judge` is cheap to clone; clones share the artifact store, the cleanup
/// scheduler and the pool of job permits.
#[derive(Clone)]
pub struct Judge {
    inner: Arc<JudgeInner>,
}

struct JudgeInner {
    store: Arc<ArtifactStore>,
    compiler: Compiler,
    runner: Runner,
    cleanup: CleanupScheduler,
    languages: Vec<LanguageConfig>,
    permits: Arc<Semaphore>,
    run_timeout: Duration,
    cleanup_delay: Duration,
}

/// Schedules removal of a job's artifacts when dropped, on every exit path
///
/// The guard lives inside the blocking job task, so removal is never
/// scheduled while a child may still use the files.
struct ArtifactGuard {
    cleanup: CleanupScheduler,
    paths: Vec<PathBuf>,
    delay: Duration,
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        self.cleanup
            .schedule_removal(std::mem::take(&mut self.paths), self.delay);
    }
}

impl Judge {
    pub fn new(
        config: &JudgeConfig,
        languages: Vec<LanguageConfig>,
        store: Arc<ArtifactStore>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        let output_limit = config.output_limit_bytes();
        let compiler = Compiler::new(
            store.clone(),
            launcher.clone(),
            config.compile_timeout_ms.into(),
            output_limit,
        );
        let runner = Runner::new(launcher, output_limit);
        let cleanup = CleanupScheduler::new(store.clone());

        log::info!(
            "Judge ready: {} languages, {} concurrent jobs, {} ms run limit",
            languages.len(),
            config.max_concurrent_jobs,
            config.run_timeout_ms.0
        );

        Self {
            inner: Arc::new(JudgeInner {
                store,
                compiler,
                runner,
                cleanup,
                languages,
                permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
                run_timeout: config.run_timeout_ms.into(),
                cleanup_delay: config.cleanup_delay_ms.into(),
            }),
        }
    }

    pub fn cleanup(&self) -> &CleanupScheduler {
        &self.inner.cleanup
    }

    pub fn languages(&self) -> &[LanguageConfig] {
        &self.inner.languages
    }

    /// Compiles and runs `source` against `stdin`, always producing a verdict
    ///
    /// An absent source is rejected before anything touches the disk, while an
    /// empty one is judged like any other. Dropping the returned future kills
    /// the running child process.
    pub async fn execute(&self, language: &str, source: Option<&str>, stdin: Option<&str>) -> Verdict {
        let Some(source) = source else {
            log::info!("Rejected run request without source code");
            return Verdict::invalid_input("Source code is required");
        };
        let Some(language) = self
            .inner
            .languages
            .iter()
            .find(|l| l.name == language)
            .cloned()
        else {
            log::info!("Rejected run request for unsupported language {language}");
            return Verdict::invalid_input(format!("Unsupported language: {language}"));
        };

        let permit = match Arc::clone(&self.inner.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                log::error!("Failed to acquire a job permit: {e}");
                return Verdict::runtime_error("The judge is shutting down", None);
            }
        };

        let job = Job::new(self.inner.store.allocate(&language.extension), language);
        let job_id = job.id().to_string();
        let artifacts = ArtifactGuard {
            cleanup: self.inner.cleanup.clone(),
            paths: job.artifacts.paths(),
            delay: self.inner.cleanup_delay,
        };
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();

        let inner = Arc::clone(&self.inner);
        let source = format!("{source}\n");
        let stdin = stdin.unwrap_or_default().to_string();
        let handle = tokio::task::spawn_blocking(move || {
            // Released only once the child is gone, even if the caller stopped waiting
            let _permit = permit;
            let _artifacts = artifacts;
            inner.process(job, &source, &stdin, cancel)
        });

        let verdict = match handle.await {
            Ok(verdict) => verdict,
            Err(e) => {
                log::error!("Job {job_id} aborted: {e}");
                Verdict::runtime_error("Internal error while judging", Some(e.to_string()))
            }
        };

        log::info!(
            "Job {job_id} finished: {:?}, {} ms, {} KB",
            verdict.kind,
            verdict.execution_time_ms.unwrap_or(0),
            verdict.memory_used_kb
        );
        verdict
    }
}

impl JudgeInner {
    fn process(&self, mut job: Job, source: &str, stdin: &str, cancel: CancellationToken) -> Verdict {
        let verdict = match self.try_process(&mut job, source, stdin, cancel) {
            Ok(verdict) => verdict,
            Err(e) => {
                log::error!("Job {} failed: {e:#}", job.id());
                Verdict::runtime_error("Internal error while judging", Some(format!("{e:#}")))
            }
        };

        job.transition(if verdict.is_success() {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        });
        if let (Some(started), Some(finished)) = (job.started_at, job.finished_at) {
            log::debug!(
                "Job {} ran from {} to {}",
                job.id(),
                started.to_rfc3339(),
                finished.to_rfc3339()
            );
        }
        verdict
    }

    fn try_process(
        &self,
        job: &mut Job,
        source: &str,
        stdin: &str,
        cancel: CancellationToken,
    ) -> Result<Verdict> {
        let source_path = job.artifacts.source.clone();
        let input_path = job.artifacts.input.clone();
        let output_path = job.artifacts.output.clone();

        self.store
            .write(&source_path, source.as_bytes())
            .with_context(|| format!("Failed to write {}", source_path.display()))?;
        self.store
            .write(&input_path, stdin.as_bytes())
            .with_context(|| format!("Failed to write {}", input_path.display()))?;

        if job.language.needs_compilation() {
            job.transition(JobStatus::Compiling);
            let compiled = self
                .compiler
                .compile(&job.language, &source_path, cancel.clone());
            if !compiled.success {
                return Ok(Verdict::compilation_error(compiled.diagnostics));
            }
        }

        job.transition(JobStatus::Running);
        let source_arg = source_path.to_string_lossy();
        let output_arg = output_path.to_string_lossy();
        let mapping = HashMap::from([
            ("%INPUT%", source_arg.as_ref()),
            ("%OUTPUT%", output_arg.as_ref()),
        ]);
        let command = apply_template(&job.language.run, &mapping);

        job.started_at = Some(Utc::now());
        let report = self
            .runner
            .run(&command, &input_path, self.run_timeout, cancel);
        job.finished_at = Some(Utc::now());

        Ok(Verdict::from_run(report))
    }
}
