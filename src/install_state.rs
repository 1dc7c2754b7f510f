//! Install State Machine
//!
//! [`InstallerContext`] owns the stage a run is in. Stages are entered one at
//! a time, in order, and only once; `Partitioning` additionally needs the
//! destructive confirmation. A failed run remembers which stage it was
//! trying to enter or complete, which is the stage the pipeline reports.
//!
//! ```text
//! NotStarted → Validating → CheckingPreconditions → PreparingLiveSystem
//!   → Partitioning (confirmation) → ProvisioningVolumes → CreatingFilesystems
//!   → InstallingBaseSystem → ConfiguringSystem → ConfiguringInitramfs
//!   → InstallingBootloader → PostInstall → Finishing → Completed
//!
//! any non-terminal stage → Failed
//! ```

use std::fmt;

use thiserror::Error;

/// Installation stages in sequential order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InstallStage {
    NotStarted = 0,

    /// Checking every configuration invariant
    Validating = 1,

    /// Probing the live environment (archiso, UEFI, root, binaries, disk)
    CheckingPreconditions = 2,

    /// Clock sync and optional mirror ranking on the live system
    PreparingLiveSystem = 3,

    /// Wiping and partitioning the target disk; needs confirmation
    Partitioning = 4,

    /// LUKS container (if encrypted), physical volume, volume group, LVs
    ProvisioningVolumes = 5,

    /// mkfs, mount tree and swap
    CreatingFilesystems = 6,

    /// pacstrap and fstab generation
    InstallingBaseSystem = 7,

    /// Timezone, locale, keymap, hostname and root password in the target
    ConfiguringSystem = 8,

    /// HOOKS selection and initramfs rebuild
    ConfiguringInitramfs = 9,

    /// Bootloader installation and boot entry
    InstallingBootloader = 10,

    /// Attached post-install collaborators
    PostInstall = 11,

    /// Unmounting the target and rebooting
    Finishing = 12,

    Completed = 13,

    Failed = 255,
}

impl InstallStage {
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Entering this stage needs the destructive confirmation.
    #[inline]
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::Partitioning)
    }

    /// Returns true once the target disk may have been written to.
    ///
    /// A failure in any of these stages leaves resources (mappings, volume
    /// groups, mounts, swap) that the pipeline unwinds before reporting.
    #[inline]
    pub const fn touches_disk(self) -> bool {
        self.order() >= Self::Partitioning.order() && self.order() <= Self::Finishing.order()
    }

    /// The stage after this one, or None at a terminal stage.
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::Validating),
            Self::Validating => Some(Self::CheckingPreconditions),
            Self::CheckingPreconditions => Some(Self::PreparingLiveSystem),
            Self::PreparingLiveSystem => Some(Self::Partitioning),
            Self::Partitioning => Some(Self::ProvisioningVolumes),
            Self::ProvisioningVolumes => Some(Self::CreatingFilesystems),
            Self::CreatingFilesystems => Some(Self::InstallingBaseSystem),
            Self::InstallingBaseSystem => Some(Self::ConfiguringSystem),
            Self::ConfiguringSystem => Some(Self::ConfiguringInitramfs),
            Self::ConfiguringInitramfs => Some(Self::InstallingBootloader),
            Self::InstallingBootloader => Some(Self::PostInstall),
            Self::PostInstall => Some(Self::Finishing),
            Self::Finishing => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::Validating => "Validating configuration",
            Self::CheckingPreconditions => "Checking preconditions",
            Self::PreparingLiveSystem => "Preparing live system",
            Self::Partitioning => "Partitioning disk",
            Self::ProvisioningVolumes => "Provisioning volumes",
            Self::CreatingFilesystems => "Creating filesystems",
            Self::InstallingBaseSystem => "Installing base system",
            Self::ConfiguringSystem => "Configuring system",
            Self::ConfiguringInitramfs => "Configuring initramfs",
            Self::InstallingBootloader => "Installing bootloader",
            Self::PostInstall => "Running post-install steps",
            Self::Finishing => "Finishing",
            Self::Completed => "Installation complete",
            Self::Failed => "Installation failed",
        }
    }

    /// Approximate progress logged when the stage is entered. pacstrap
    /// dominates the run, hence the jump after `InstallingBaseSystem`.
    pub const fn progress_percent(self) -> u8 {
        match self {
            Self::NotStarted | Self::Failed => 0,
            Self::Validating => 2,
            Self::CheckingPreconditions => 4,
            Self::PreparingLiveSystem => 6,
            Self::Partitioning => 10,
            Self::ProvisioningVolumes => 15,
            Self::CreatingFilesystems => 20,
            Self::InstallingBaseSystem => 25,
            Self::ConfiguringSystem => 70,
            Self::ConfiguringInitramfs => 75,
            Self::InstallingBootloader => 85,
            Self::PostInstall => 90,
            Self::Finishing => 97,
            Self::Completed => 100,
        }
    }
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Rejected stage transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallTransitionError {
    #[error("Cannot skip from {from} to {to} (must transition through intermediate stages)")]
    SkippedStage {
        from: InstallStage,
        to: InstallStage,
    },

    #[error("Cannot go backwards from {from} to {to} (installation is forward-only)")]
    BackwardTransition {
        from: InstallStage,
        to: InstallStage,
    },

    #[error("Cannot transition from terminal state {from} (installation is {})", if *from == InstallStage::Completed { "complete" } else { "failed" })]
    FromTerminalState { from: InstallStage },

    #[error("Stage {stage} requires explicit confirmation (destructive operation)")]
    MissingConfirmation { stage: InstallStage },

    #[error("Already at stage {stage}")]
    AlreadyAtStage { stage: InstallStage },
}

/// Stage tracking for one run.
///
/// # Example
///
/// ```
/// use warding::install_state::{InstallerContext, InstallStage};
///
/// let mut ctx = InstallerContext::new();
/// ctx.transition_to(InstallStage::Validating).unwrap();
///
/// // Partitioning cannot be reached without passing the checks
/// assert!(ctx.transition_to(InstallStage::Partitioning).is_err());
/// assert_eq!(ctx.fail().unwrap(), InstallStage::Partitioning);
/// ```
#[derive(Debug, Clone)]
pub struct InstallerContext {
    current: InstallStage,

    /// Last stage the driver tried to enter, whether or not it got in.
    attempted: InstallStage,

    /// Entered stages with unix timestamps, for the final report
    stage_history: Vec<(InstallStage, u64)>,

    destructive_confirmed: bool,
}

impl Default for InstallerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallerContext {
    pub fn new() -> Self {
        Self {
            current: InstallStage::NotStarted,
            attempted: InstallStage::NotStarted,
            stage_history: Vec::new(),
            destructive_confirmed: false,
        }
    }

    #[inline]
    pub fn current_stage(&self) -> InstallStage {
        self.current
    }

    pub fn stage_history(&self) -> &[(InstallStage, u64)] {
        &self.stage_history
    }

    /// Authorize `Partitioning`. One-way; cannot be revoked.
    pub fn confirm_destructive_operations(&mut self) {
        self.destructive_confirmed = true;
    }

    /// Advance to the next stage in sequence.
    pub fn advance(&mut self) -> Result<InstallStage, InstallTransitionError> {
        let Some(next) = self.current.next() else {
            return Err(InstallTransitionError::FromTerminalState { from: self.current });
        };
        self.transition_to(next)
    }

    /// Enter `target`, which must be the stage right after the current one.
    ///
    /// The target is remembered as attempted even when the transition is
    /// refused, so a later [`fail`](Self::fail) reports it.
    ///
    /// # Errors
    ///
    /// - `FromTerminalState` if the run already completed or failed
    /// - `AlreadyAtStage`, `BackwardTransition` or `SkippedStage` if `target`
    ///   is not the next stage
    /// - `MissingConfirmation` if `target` is destructive and unconfirmed
    pub fn transition_to(
        &mut self,
        target: InstallStage,
    ) -> Result<InstallStage, InstallTransitionError> {
        if self.current.is_terminal() {
            return Err(InstallTransitionError::FromTerminalState { from: self.current });
        }
        self.attempted = target;

        if target == self.current {
            return Err(InstallTransitionError::AlreadyAtStage { stage: target });
        }

        // Failed is only reachable through fail()
        if target == InstallStage::Failed {
            return Err(InstallTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }

        if target.order() < self.current.order() {
            return Err(InstallTransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }

        if self.current.next() != Some(target) {
            return Err(InstallTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }

        if target.is_destructive() && !self.destructive_confirmed {
            return Err(InstallTransitionError::MissingConfirmation { stage: target });
        }

        self.record_stage_transition(target);
        self.current = target;
        Ok(target)
    }

    /// Mark the run as failed and return the stage it failed at: the last
    /// attempted one.
    pub fn fail(&mut self) -> Result<InstallStage, InstallTransitionError> {
        if self.current.is_terminal() {
            return Err(InstallTransitionError::FromTerminalState { from: self.current });
        }

        self.record_stage_transition(InstallStage::Failed);
        self.current = InstallStage::Failed;
        Ok(self.attempted)
    }

    fn record_stage_transition(&mut self, stage: InstallStage) {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        tracing::debug!(stage = %stage, "Stage transition");
        self.stage_history.push((stage, timestamp));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmed_at(stage: InstallStage) -> InstallerContext {
        let mut ctx = InstallerContext::new();
        ctx.confirm_destructive_operations();
        while ctx.current_stage() != stage {
            ctx.advance().unwrap();
        }
        ctx
    }

    #[test]
    fn test_chain_reaches_completed_in_thirteen_steps() {
        let mut ctx = InstallerContext::new();
        ctx.confirm_destructive_operations();

        let mut count = 0;
        while ctx.advance().is_ok() {
            count += 1;
            assert!(count < 30, "stage chain does not terminate");
        }
        assert_eq!(ctx.current_stage(), InstallStage::Completed);
        assert_eq!(count, 13);
        assert_eq!(ctx.stage_history().len(), 13);
    }

    #[test]
    fn test_touches_disk_window() {
        assert!(!InstallStage::PreparingLiveSystem.touches_disk());
        assert!(InstallStage::Partitioning.touches_disk());
        assert!(InstallStage::PostInstall.touches_disk());
        assert!(InstallStage::Finishing.touches_disk());
        assert!(!InstallStage::Completed.touches_disk());
        assert!(!InstallStage::Failed.touches_disk());
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut stage = InstallStage::NotStarted;
        while let Some(next) = stage.next() {
            assert!(next.progress_percent() >= stage.progress_percent(), "{:?}", next);
            stage = next;
        }
        assert_eq!(stage.progress_percent(), 100);
    }

    #[test]
    fn test_cannot_skip_or_go_backwards() {
        let mut ctx = InstallerContext::new();
        let err = ctx.transition_to(InstallStage::Partitioning).unwrap_err();
        assert!(matches!(err, InstallTransitionError::SkippedStage { .. }));

        let mut ctx = confirmed_at(InstallStage::PreparingLiveSystem);
        let err = ctx.transition_to(InstallStage::Validating).unwrap_err();
        assert!(matches!(err, InstallTransitionError::BackwardTransition { .. }));

        let err = ctx.transition_to(InstallStage::PreparingLiveSystem).unwrap_err();
        assert!(matches!(err, InstallTransitionError::AlreadyAtStage { .. }));
    }

    #[test]
    fn test_partitioning_requires_confirmation() {
        let mut ctx = InstallerContext::new();
        for _ in 0..3 {
            ctx.advance().unwrap();
        }
        assert_eq!(ctx.current_stage(), InstallStage::PreparingLiveSystem);

        let err = ctx.advance().unwrap_err();
        assert_eq!(
            err,
            InstallTransitionError::MissingConfirmation {
                stage: InstallStage::Partitioning
            }
        );
        assert_eq!(ctx.current_stage(), InstallStage::PreparingLiveSystem);

        ctx.confirm_destructive_operations();
        assert_eq!(ctx.advance().unwrap(), InstallStage::Partitioning);
    }

    #[test]
    fn test_fail_reports_entered_stage() {
        let mut ctx = confirmed_at(InstallStage::ProvisioningVolumes);
        assert_eq!(ctx.fail().unwrap(), InstallStage::ProvisioningVolumes);
        assert_eq!(ctx.current_stage(), InstallStage::Failed);
    }

    #[test]
    fn test_fail_reports_refused_stage() {
        let mut ctx = InstallerContext::new();
        for _ in 0..3 {
            ctx.advance().unwrap();
        }
        assert!(ctx.transition_to(InstallStage::Partitioning).is_err());
        assert_eq!(ctx.fail().unwrap(), InstallStage::Partitioning);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut ctx = confirmed_at(InstallStage::Completed);
        assert!(matches!(
            ctx.fail().unwrap_err(),
            InstallTransitionError::FromTerminalState { .. }
        ));

        let mut ctx = InstallerContext::new();
        ctx.advance().unwrap();
        ctx.fail().unwrap();
        let err = ctx.advance().unwrap_err();
        assert!(err.to_string().contains("installation is failed"));
    }
}
