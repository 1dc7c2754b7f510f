//! Ledger of live resources the pipeline has acquired on the target disk.
//!
//! Each provisioning step records what it opened (a LUKS mapping, an active
//! volume group, a mount, an enabled swap device) right after the command
//! that created it succeeds. On failure the ledger is unwound in reverse
//! dependency order: swapoff, umount (innermost first), `vgchange -an`,
//! `cryptsetup close`. Unwinding is best-effort; a failed release is logged
//! and the rest still run.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::StepFailure;
use crate::host::{Host, run_checked};
use crate::tools::disk::{Swapoff, Umount};
use crate::tools::encryption::LuksClose;
use crate::tools::lvm::VgChange;
use crate::tool_traits::ToolArgs;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLedger {
    mapper: Option<String>,
    volume_group: Option<String>,
    mounts: Vec<PathBuf>,
    swap: Option<PathBuf>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened_mapper(&mut self, name: &str) {
        self.mapper = Some(name.to_string());
    }

    pub fn activated_volume_group(&mut self, name: &str) {
        self.volume_group = Some(name.to_string());
    }

    pub fn mounted(&mut self, target: &Path) {
        self.mounts.push(target.to_path_buf());
    }

    pub fn enabled_swap(&mut self, device: &Path) {
        self.swap = Some(device.to_path_buf());
    }

    pub fn is_empty(&self) -> bool {
        self.mapper.is_none()
            && self.volume_group.is_none()
            && self.mounts.is_empty()
            && self.swap.is_none()
    }

    pub fn mounts(&self) -> &[PathBuf] {
        &self.mounts
    }

    /// Forget every mount after the tree was unmounted recursively.
    pub fn unmounted_all(&mut self) {
        self.mounts.clear();
    }

    /// Release everything held, innermost first. Returns the releases that
    /// failed; the ledger is empty afterwards either way.
    pub fn unwind(&mut self, host: &mut dyn Host) -> Vec<StepFailure> {
        if self.is_empty() {
            return Vec::new();
        }
        info!("Unwinding acquired resources");

        let mut failures = Vec::new();

        if let Some(device) = self.swap.take() {
            release(host, "swapoff", &Swapoff { device }, &mut failures);
        }

        for target in self.mounts.drain(..).rev() {
            let umount = Umount {
                target,
                recursive: false,
            };
            release(host, "umount", &umount, &mut failures);
        }

        if let Some(volume_group) = self.volume_group.take() {
            let deactivate = VgChange {
                volume_group,
                active: false,
            };
            release(host, "vgchange -an", &deactivate, &mut failures);
        }

        if let Some(mapper_name) = self.mapper.take() {
            release(host, "cryptsetup close", &LuksClose { mapper_name }, &mut failures);
        }

        failures
    }
}

fn release(
    host: &mut dyn Host,
    step: &str,
    tool: &dyn ToolArgs,
    failures: &mut Vec<StepFailure>,
) {
    if let Err(e) = run_checked(host, step, tool) {
        warn!("Unwind step failed: {}", e);
        failures.push(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RecordingHost;

    fn full_ledger() -> ResourceLedger {
        let mut ledger = ResourceLedger::new();
        ledger.opened_mapper("cryptlvm");
        ledger.activated_volume_group("vg0");
        ledger.mounted(Path::new("/mnt"));
        ledger.mounted(Path::new("/mnt/boot"));
        ledger.mounted(Path::new("/mnt/home"));
        ledger.enabled_swap(Path::new("/dev/vg0/swap"));
        ledger
    }

    #[test]
    fn test_unwind_releases_in_reverse_dependency_order() {
        let mut host = RecordingHost::new();
        let mut ledger = full_ledger();

        let failures = ledger.unwind(&mut host);

        assert!(failures.is_empty());
        assert!(ledger.is_empty());
        assert_eq!(
            host.commands(),
            vec![
                "swapoff /dev/vg0/swap",
                "umount /mnt/home",
                "umount /mnt/boot",
                "umount /mnt",
                "vgchange -an vg0",
                "cryptsetup close cryptlvm",
            ]
        );
    }

    #[test]
    fn test_unwind_continues_past_failures() {
        let mut host = RecordingHost::new().fail_when("umount /mnt/boot");
        let mut ledger = full_ledger();

        let failures = ledger.unwind(&mut host);

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].step, "umount");
        assert_eq!(host.commands().len(), 6);
    }

    #[test]
    fn test_empty_ledger_issues_nothing() {
        let mut host = RecordingHost::new();
        assert!(ResourceLedger::new().unwind(&mut host).is_empty());
        assert!(host.commands().is_empty());
    }

    #[test]
    fn test_unwind_is_idempotent() {
        let mut host = RecordingHost::new();
        let mut ledger = full_ledger();
        ledger.unwind(&mut host);
        ledger.unwind(&mut host);
        assert_eq!(host.commands().len(), 6);
    }
}
