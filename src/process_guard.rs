//! Process lifecycle management for child processes
//!
//! Destructive tools (parted, cryptsetup, pvcreate, mkfs) must never be
//! killed halfway through a write. Two mechanisms guarantee that:
//!
//! - Every child is spawned in its own process group, so a Ctrl+C typed at
//!   the terminal reaches only the installer, not the running tool.
//! - SIGINT, SIGTERM and SIGHUP only raise an [`InterruptFlag`]. The
//!   pipeline checks it between stages, stops, and unwinds what it holds.
//!   A second signal terminates immediately with exit code 130.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::unistd::Pid;

/// Exit code used when a second signal forces termination.
const FORCED_EXIT_CODE: i32 = 130;

/// Shared "stop after this stage" flag.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raise the flag by hand (tests, embedding front ends).
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn inner(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

/// Initialize global signal handlers for graceful shutdown
/// Handles SIGINT (Ctrl+C), SIGTERM, and SIGHUP
/// Call this once at program start
pub fn init_signal_handlers(flag: &InterruptFlag) -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::flag;

    for sig in [SIGINT, SIGTERM, SIGHUP] {
        // Order matters: the conditional shutdown sees the flag before this
        // signal sets it, so only a repeated signal exits.
        flag::register_conditional_shutdown(sig, FORCED_EXIT_CODE, flag.inner())?;
        flag::register(sig, flag.inner())?;
    }

    tracing::debug!("Signal handlers installed for SIGINT, SIGTERM, SIGHUP");
    Ok(())
}

/// Extension trait for std::process::Command to set up process groups
pub trait CommandProcessGroup {
    /// Configure the command to run in its own process group, detached from
    /// the terminal's foreground group.
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: setpgid is async-signal-safe and touches no parent state.
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::from)
            });
        }
        self
    }
}
