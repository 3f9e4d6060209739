use std::fs::File;
use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use parking_lot::Mutex;

use super::launcher::{ExitKind, LaunchOutcome, LaunchRequest, ProcessLauncher};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
// How long to wait for pipes to close once the process group is gone
const PIPE_GRACE: Duration = Duration::from_millis(500);

/// Launcher that runs every child as the leader of its own process group
///
/// The leader is reaped with `wait4`, which also yields its peak resident
/// memory. On timeout or cancellation the whole group gets `SIGKILL`. The
/// group is killed after a normal exit as well, so nothing the program forked
/// can outlive the job.
pub struct ProcessGroupLauncher;

impl ProcessLauncher for ProcessGroupLauncher {
    fn name(&self) -> &'static str {
        "process_group"
    }

    fn launch(&self, request: &LaunchRequest) -> Result<LaunchOutcome> {
        let stdin = match &request.stdin {
            Some(path) => Stdio::from(
                File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
            ),
            None => Stdio::null(),
        };

        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if let Some(dir) = &request.current_dir {
            cmd.current_dir(dir);
        }

        let start_time = Instant::now();
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", request.program))?;

        let group = Arc::new(ProcessGroup::new(child.id() as libc::pid_t));
        let stdout = spawn_capture(child.stdout.take(), request.output_limit);
        let stderr = spawn_capture(child.stderr.take(), request.output_limit);

        let (tx, rx) = mpsc::channel();
        let waiter = Arc::clone(&group);
        thread::spawn(move || {
            let _ = tx.send(waiter.wait_and_reap());
        });

        let deadline = start_time + request.timeout;
        let (forced, received) = loop {
            let now = Instant::now();
            if now >= deadline {
                break (Some(ExitKind::TimedOut), None);
            }
            if request.cancel.is_cancelled() {
                break (Some(ExitKind::Cancelled), None);
            }
            match rx.recv_timeout((deadline - now).min(POLL_INTERVAL)) {
                Ok(result) => break (None, Some(result)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break (None, None),
            }
        };

        if forced.is_some() {
            group.kill();
        }
        let reaped = match received {
            Some(result) => result,
            None => rx
                .recv()
                .unwrap_or_else(|_| Err(io::Error::other("waiter thread exited without a result"))),
        }
        .with_context(|| format!("Failed to wait for pid {}", group.pid))?;
        let elapsed = start_time.elapsed();

        let stdout = stdout.collect("stdout")?;
        let stderr = stderr.collect("stderr")?;

        Ok(LaunchOutcome {
            exit: forced.unwrap_or(reaped.exit),
            stdout,
            stderr,
            elapsed,
            peak_memory_kb: reaped.peak_memory_kb,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Reaped {
    exit: ExitKind,
    peak_memory_kb: Option<u64>,
}

struct ProcessGroup {
    pid: libc::pid_t,
    // Set once the leader is reaped; guards `killpg` against pid reuse
    reaped: Mutex<Option<Reaped>>,
}

impl ProcessGroup {
    fn new(pid: libc::pid_t) -> Self {
        Self {
            pid,
            reaped: Mutex::new(None),
        }
    }

    /// Sends `SIGKILL` to the group unless its leader was already reaped
    fn kill(&self) {
        let reaped = self.reaped.lock();
        if reaped.is_none() {
            signal_group(self.pid);
        }
    }

    /// Blocks until the leader exits, kills what is left of its group, then reaps it
    fn wait_and_reap(&self) -> io::Result<Reaped> {
        wait_exited(self.pid)?;

        let mut reaped = self.reaped.lock();
        // The unreaped leader pins the group id, so this cannot hit a reused pid
        signal_group(self.pid);
        let result = reap(self.pid)?;
        *reaped = Some(result);
        Ok(result)
    }
}

fn signal_group(pid: libc::pid_t) {
    // ESRCH just means the group is already empty
    unsafe {
        libc::killpg(pid, libc::SIGKILL);
    }
}

/// Waits for the child to exit without reaping it
fn wait_exited(pid: libc::pid_t) -> io::Result<()> {
    loop {
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn reap(pid: libc::pid_t) -> io::Result<Reaped> {
    let mut status: libc::c_int = 0;
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    loop {
        let rc = unsafe { libc::wait4(pid, &mut status, 0, &mut usage) };
        if rc == pid {
            break;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }

    let exit = if libc::WIFEXITED(status) {
        ExitKind::Exited(libc::WEXITSTATUS(status))
    } else if libc::WIFSIGNALED(status) {
        ExitKind::Signaled(libc::WTERMSIG(status))
    } else {
        ExitKind::Exited(-1)
    };

    Ok(Reaped {
        exit,
        peak_memory_kb: peak_memory_kb(&usage),
    })
}

fn peak_memory_kb(usage: &libc::rusage) -> Option<u64> {
    let maxrss = u64::try_from(usage.ru_maxrss).ok()?;
    // Darwin reports bytes, Linux and the BSDs report KB
    let kb = if cfg!(target_os = "macos") {
        maxrss / 1024
    } else {
        maxrss
    };
    (kb > 0).then_some(kb)
}

/// Output read from one pipe so far
#[derive(Default)]
struct CaptureBuffer {
    bytes: Vec<u8>,
    discarded: u64,
    // Set when the launcher stops waiting; the reader then lets go of the pipe
    detached: bool,
}

struct Capture {
    buffer: Arc<Mutex<CaptureBuffer>>,
    done: Receiver<io::Result<()>>,
}

fn spawn_capture<R: Read + Send + 'static>(pipe: Option<R>, limit: usize) -> Capture {
    let buffer = Arc::new(Mutex::new(CaptureBuffer::default()));
    let (tx, rx) = mpsc::channel();
    let shared = Arc::clone(&buffer);
    thread::spawn(move || {
        let result = match pipe {
            Some(pipe) => read_into(pipe, &shared, limit),
            None => Ok(()),
        };
        let _ = tx.send(result);
    });

    Capture { buffer, done: rx }
}

/// Keeps up to `limit` bytes and drains the rest so the writer never stalls
fn read_into<R: Read>(mut reader: R, buffer: &Mutex<CaptureBuffer>, limit: usize) -> io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        let mut captured = buffer.lock();
        if captured.detached {
            return Ok(());
        }
        let kept = n.min(limit.saturating_sub(captured.bytes.len()));
        captured.bytes.extend_from_slice(&chunk[..kept]);
        captured.discarded += (n - kept) as u64;
    }
}

impl Capture {
    /// Returns everything read from the pipe, waiting a short grace for it to close
    ///
    /// A process that left the group can keep the pipe open indefinitely. The
    /// bytes read up to that point are still returned.
    fn collect(self, stream: &str) -> Result<Vec<u8>> {
        match self.done.recv_timeout(PIPE_GRACE) {
            Ok(result) => result.map_err(|e| anyhow!("Failed to read child {stream}: {e}"))?,
            Err(_) => log::warn!(
                "Child {stream} is still held open outside the process group, keeping what was read"
            ),
        }

        let mut buffer = self.buffer.lock();
        buffer.detached = true;
        if buffer.discarded > 0 {
            log::warn!(
                "Discarded {} bytes of child {stream} past the output limit",
                buffer.discarded
            );
        }
        Ok(std::mem::take(&mut buffer.bytes))
    }
}
