use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::sandbox::ArtifactStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemovalTicket(u64);

struct PendingRemoval {
    paths: Vec<PathBuf>,
    timer: CancellationToken,
}

/// Deletes job artifacts some time after the job has answered
///
/// Every scheduled removal sits in the pending table until exactly one of its
/// timer, `flush` or `cancel` takes it out. Whoever takes it out owns it, so a
/// set of paths is never processed twice. Failures are logged and dropped.
#[derive(Clone)]
pub struct CleanupScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<ArtifactStore>,
    pending: Mutex<HashMap<RemovalTicket, PendingRemoval>>,
    next_ticket: AtomicU64,
}

impl CleanupScheduler {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                pending: Mutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(0),
            }),
        }
    }

    /// Queues `paths` for removal after `delay`
    ///
    /// Outside a tokio runtime the files are removed right away.
    pub fn schedule_removal(&self, paths: Vec<PathBuf>, delay: Duration) -> RemovalTicket {
        let ticket = RemovalTicket(self.inner.next_ticket.fetch_add(1, Ordering::Relaxed));
        let timer = CancellationToken::new();
        self.inner.pending.lock().insert(
            ticket,
            PendingRemoval {
                paths,
                timer: timer.clone(),
            },
        );

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                handle.spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {
                            inner.remove_now(ticket);
                        }
                        _ = timer.cancelled() => {}
                    }
                });
            }
            Err(_) => {
                self.inner.remove_now(ticket);
            }
        }

        ticket
    }

    /// Drops a scheduled removal without touching its files
    pub fn cancel(&self, ticket: RemovalTicket) -> bool {
        match self.inner.pending.lock().remove(&ticket) {
            Some(pending) => {
                pending.timer.cancel();
                true
            }
            None => false,
        }
    }

    /// Runs every pending removal now, returning how many were flushed
    pub fn flush(&self) -> usize {
        let drained: Vec<PendingRemoval> = self
            .inner
            .pending
            .lock()
            .drain()
            .map(|(_, pending)| pending)
            .collect();

        for pending in &drained {
            pending.timer.cancel();
            self.inner.remove_paths(&pending.paths);
        }

        drained.len()
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

impl Inner {
    fn remove_now(&self, ticket: RemovalTicket) -> bool {
        // Release the lock before touching the filesystem
        let Some(pending) = self.pending.lock().remove(&ticket) else {
            return false;
        };
        self.remove_paths(&pending.paths);
        true
    }

    fn remove_paths(&self, paths: &[PathBuf]) {
        for path in paths {
            match self.store.remove(path) {
                Ok(true) => log::debug!("Removed artifact {}", path.display()),
                Ok(false) => {}
                Err(e) => log::warn!("Failed to remove artifact {}: {e}", path.display()),
            }
        }
    }
}
