use std::fs::File;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use super::launcher::{ExitKind, LaunchOutcome, LaunchRequest, ProcessLauncher};

/// A launcher built only on `tokio::process`
///
/// NativeLauncher works on every host tokio supports. It enforces the timeout
/// by killing the direct child only, and it has no way to observe peak memory,
/// so `peak_memory_kb` is always `None`. Prefer the process group launcher on
/// unix hosts.
pub struct NativeLauncher;

enum Finished {
    Exited(io::Result<(ExitStatus, Vec<u8>, Vec<u8>)>),
    Forced(ExitKind),
}

impl ProcessLauncher for NativeLauncher {
    fn name(&self) -> &'static str {
        "native"
    }

    fn launch(&self, request: &LaunchRequest) -> Result<LaunchOutcome> {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle.block_on(self.launch_async(request)),
            Err(_) => tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?
                .block_on(self.launch_async(request)),
        }
    }
}

impl NativeLauncher {
    async fn launch_async(&self, request: &LaunchRequest) -> Result<LaunchOutcome> {
        let stdin = match &request.stdin {
            Some(path) => Stdio::from(
                File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
            ),
            None => Stdio::null(),
        };

        let mut cmd = tokio::process::Command::new(&request.program);
        cmd.args(&request.args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &request.current_dir {
            cmd.current_dir(dir);
        }

        let start_time = Instant::now();
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", request.program))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let finished = {
            let run = async {
                tokio::try_join!(
                    child.wait(),
                    capture_async(stdout, request.output_limit),
                    capture_async(stderr, request.output_limit),
                )
            };

            tokio::select! {
                result = timeout(request.timeout, run) => match result {
                    Ok(exited) => Finished::Exited(exited),
                    Err(_) => Finished::Forced(ExitKind::TimedOut),
                },
                _ = request.cancel.cancelled() => Finished::Forced(ExitKind::Cancelled),
            }
        };

        match finished {
            Finished::Exited(exited) => {
                let (status, stdout, stderr) = exited.context("Failed to collect child output")?;
                Ok(LaunchOutcome {
                    exit: exit_kind(status),
                    stdout,
                    stderr,
                    elapsed: start_time.elapsed(),
                    peak_memory_kb: None,
                })
            }
            Finished::Forced(exit) => {
                if let Err(e) = child.start_kill() {
                    log::warn!("Failed to kill {}: {e}", request.program);
                }
                let _ = child.wait().await;
                Ok(LaunchOutcome {
                    exit,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    elapsed: start_time.elapsed(),
                    peak_memory_kb: None,
                })
            }
        }
    }
}

async fn capture_async<R: AsyncRead + Unpin>(pipe: Option<R>, limit: usize) -> io::Result<Vec<u8>> {
    let Some(mut pipe) = pipe else {
        return Ok(Vec::new());
    };

    let mut buf = Vec::new();
    (&mut pipe).take(limit as u64).read_to_end(&mut buf).await?;

    let discarded = tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await?;
    if discarded > 0 {
        log::warn!("Discarded {discarded} bytes of child output past the {limit} byte limit");
    }

    Ok(buf)
}

fn exit_kind(status: ExitStatus) -> ExitKind {
    if let Some(code) = status.code() {
        return ExitKind::Exited(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitKind::Signaled(signal);
        }
    }

    ExitKind::Exited(-1)
}
