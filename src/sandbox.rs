mod artifacts;
mod compile;
mod launcher;
mod native;
#[cfg(unix)]
mod process_group;
mod runner;

pub use artifacts::{ArtifactStore, JobArtifacts};
pub use compile::{CompilationResult, Compiler};
pub use launcher::{ExitKind, LaunchOutcome, LaunchRequest, ProcessLauncher, apply_template};
pub use native::NativeLauncher;
#[cfg(unix)]
pub use process_group::ProcessGroupLauncher;
pub use runner::{RunOutcome, RunReport, Runner};

use std::sync::Arc;

use crate::config::LauncherKind;

/// Picks the process launcher for this host
///
/// `Auto` selects the process group launcher on unix hosts, which kills whole
/// process trees and measures peak memory. Everywhere else it falls back to
/// the native tokio launcher, which does neither.
pub fn create_launcher(kind: LauncherKind) -> Arc<dyn ProcessLauncher> {
    let launcher: Arc<dyn ProcessLauncher> = match kind {
        #[cfg(unix)]
        LauncherKind::Auto | LauncherKind::ProcessGroup => Arc::new(ProcessGroupLauncher),
        #[cfg(not(unix))]
        LauncherKind::ProcessGroup => {
            log::warn!("Process groups are unavailable on this host, using the native launcher");
            Arc::new(NativeLauncher)
        }
        #[cfg(not(unix))]
        LauncherKind::Auto => Arc::new(NativeLauncher),
        LauncherKind::Native => Arc::new(NativeLauncher),
    };

    log::info!("Using the {} process launcher", launcher.name());
    if launcher.name() == "native" {
        log::warn!("The native launcher cannot measure memory, memoryUsed will read 0");
    }
    launcher
}
