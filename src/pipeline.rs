//! Pipeline Driver
//!
//! Runs every stage in order through the forward-only [`InstallerContext`]:
//!
//! ```text
//! Validating → CheckingPreconditions → PreparingLiveSystem → Partitioning
//!   → ProvisioningVolumes → CreatingFilesystems → InstallingBaseSystem
//!   → ConfiguringSystem → ConfiguringInitramfs → InstallingBootloader
//!   → PostInstall → Finishing
//! ```
//!
//! The first failing stage ends the run. If the disk was already touched,
//! the [`ResourceLedger`] is unwound before the failure is reported. The
//! interrupt flag is checked between stages; a running command is always
//! allowed to finish.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::config::{InstallConfig, ValidatedConfig};
use crate::engine::bootloader::{self, BootEntry};
use crate::engine::bootstrap::{self, MirrorRankResult};
use crate::engine::initramfs::{self, Hook};
use crate::engine::mount::{self, MountPlan, TARGET_ROOT};
use crate::engine::partition::{self, PartitionPlan, PartitionedDisk};
use crate::engine::resources::ResourceLedger;
use crate::engine::system;
use crate::engine::volume::{self, VolumeTopology};
use crate::error::{MountError, StageError, StepFailure};
use crate::host::{Host, run_checked};
use crate::install_state::{InstallStage, InstallerContext};
use crate::postinstall::{PostInstallStep, TargetSystem, step_packages};
use crate::preflight;
use crate::process_guard::InterruptFlag;
use crate::tools::disk::Umount;
use crate::tools::system::Reboot;

/// Everything the run derived and did, for the final summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub disk: PathBuf,
    pub partition_plan: PartitionPlan,
    pub partitions: PartitionedDisk,
    pub topology: VolumeTopology,
    pub mount_plan: MountPlan,
    pub hooks: Vec<Hook>,
    pub boot_entry: BootEntry,
    pub packages: Vec<String>,
    pub timezone: String,
    pub mirrors: MirrorRankResult,
    /// Stages entered, in order.
    pub stages: Vec<InstallStage>,
    pub rebooted: bool,
}

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(Box<InstallReport>),
    Failure {
        /// Stage that was being attempted.
        stage: InstallStage,
        error: StageError,
        /// Releases that failed while unwinding.
        unwind_failures: Vec<StepFailure>,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn report(&self) -> Option<&InstallReport> {
        match self {
            Self::Success(report) => Some(&**report),
            Self::Failure { .. } => None,
        }
    }

    pub fn failed_stage(&self) -> Option<InstallStage> {
        match self {
            Self::Success(_) => None,
            Self::Failure { stage, .. } => Some(*stage),
        }
    }

    pub fn error(&self) -> Option<&StageError> {
        match self {
            Self::Success(_) => None,
            Self::Failure { error, .. } => Some(error),
        }
    }
}

/// Per-run state: the state machine and the resources held.
struct Run {
    ctx: InstallerContext,
    ledger: ResourceLedger,
}

/// Drives one installation against a [`Host`].
#[derive(Debug)]
pub struct Pipeline<H: Host> {
    host: H,
    post_install: Vec<Box<dyn PostInstallStep>>,
    interrupt: InterruptFlag,
    confirmed: bool,
}

impl<H: Host> Pipeline<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            post_install: Vec::new(),
            interrupt: InterruptFlag::new(),
            confirmed: false,
        }
    }

    /// Authorize the destructive stages. Without this the run stops before
    /// partitioning.
    pub fn confirm_destructive(mut self) -> Self {
        self.confirmed = true;
        self
    }

    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Attach a post-install step; steps run in the order they were added.
    pub fn with_step(self, step: impl PostInstallStep + 'static) -> Self {
        self.with_boxed_step(Box::new(step))
    }

    pub fn with_boxed_step(mut self, step: Box<dyn PostInstallStep>) -> Self {
        self.post_install.push(step);
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn into_host(self) -> H {
        self.host
    }

    /// Run every stage for `config`.
    pub fn run(&mut self, config: InstallConfig) -> Outcome {
        let mut run = Run {
            ctx: InstallerContext::new(),
            ledger: ResourceLedger::new(),
        };
        if self.confirmed {
            run.ctx.confirm_destructive_operations();
        }

        match self.execute(&mut run, config) {
            Ok(report) => {
                info!("{}", InstallStage::Completed);
                Outcome::Success(Box::new(report))
            }
            Err(err) => {
                let stage = match run.ctx.fail() {
                    Ok(stage) => stage,
                    Err(e) => {
                        warn!("Could not mark the run as failed: {}", e);
                        run.ctx.current_stage()
                    }
                };
                error!("{} failed: {}", stage, err);

                let unwind_failures = if stage.touches_disk() {
                    run.ledger.unwind(&mut self.host)
                } else {
                    Vec::new()
                };

                Outcome::Failure {
                    stage,
                    error: err,
                    unwind_failures,
                }
            }
        }
    }

    fn enter(&self, run: &mut Run, stage: InstallStage) -> Result<(), StageError> {
        run.ctx.transition_to(stage)?;
        if self.interrupt.is_raised() {
            warn!("Interrupt received, stopping at {}", stage);
            return Err(StageError::Interrupted);
        }
        info!(progress = stage.progress_percent(), "{}", stage);
        Ok(())
    }

    fn execute(&mut self, run: &mut Run, config: InstallConfig) -> Result<InstallReport, StageError> {
        self.enter(run, InstallStage::Validating)?;
        let config: ValidatedConfig = config.validate()?;

        self.enter(run, InstallStage::CheckingPreconditions)?;
        let binaries = preflight::required_binaries(&config);
        let facts = self.host.probe_environment(config.disk(), &binaries);
        preflight::check(&facts, &config)?;

        self.enter(run, InstallStage::PreparingLiveSystem)?;
        let mirrors = bootstrap::prepare_live_system(&mut self.host, &config);

        self.enter(run, InstallStage::Partitioning)?;
        let partition_plan = partition::plan(config.boot_size_mib());
        let partitions = partition::partition_disk(&mut self.host, config.disk(), &partition_plan)?;

        self.enter(run, InstallStage::ProvisioningVolumes)?;
        let topology = volume::topology(&config, &partitions.container);
        volume::provision(&mut self.host, &config, &topology, &mut run.ledger)?;

        self.enter(run, InstallStage::CreatingFilesystems)?;
        let mount_plan = mount::mount_plan(&topology, &partitions.esp);
        mount::format_filesystems(&mut self.host, &mount_plan)?;
        mount::mount_filesystems(&mut self.host, &mount_plan, &mut run.ledger)?;
        mount::enable_swap(&mut self.host, &mount_plan, &mut run.ledger)?;

        self.enter(run, InstallStage::InstallingBaseSystem)?;
        let packages = bootstrap::packages(
            &config,
            facts.microcode,
            &step_packages(&self.post_install),
        );
        bootstrap::install_base_system(&mut self.host, &packages)?;

        self.enter(run, InstallStage::ConfiguringSystem)?;
        let timezone = system::resolve_timezone(&mut self.host, &config);
        system::configure_system(&mut self.host, &config, &timezone)?;

        self.enter(run, InstallStage::ConfiguringInitramfs)?;
        let hooks = initramfs::hooks(config.is_encrypted());
        initramfs::configure(&mut self.host, config.is_encrypted())?;

        self.enter(run, InstallStage::InstallingBootloader)?;
        let uuid = if config.is_encrypted() {
            Some(bootloader::container_uuid(&mut self.host, &topology.container)?)
        } else {
            None
        };
        let boot_entry = bootloader::build(
            config.bootloader(),
            config.is_encrypted(),
            &topology,
            uuid.as_deref(),
            facts.microcode,
        )?;
        bootloader::install(&mut self.host, &boot_entry)?;

        self.enter(run, InstallStage::PostInstall)?;
        let target = TargetSystem {
            root: PathBuf::from(TARGET_ROOT),
            hostname: config.hostname().to_string(),
            encrypted: config.is_encrypted(),
        };
        for step in &self.post_install {
            info!("Post-install: {}", step.name());
            step.run(&mut self.host, &target)?;
        }

        self.enter(run, InstallStage::Finishing)?;
        let rebooted = self.finish(&config, &mut run.ledger)?;

        run.ctx.advance()?;
        let stages = run.ctx.stage_history().iter().map(|(stage, _)| *stage).collect();

        Ok(InstallReport {
            disk: config.disk().to_path_buf(),
            partition_plan,
            partitions,
            topology,
            mount_plan,
            hooks,
            boot_entry,
            packages,
            timezone,
            mirrors,
            stages,
            rebooted,
        })
    }

    /// Unmount the target tree, then reboot or release the remaining
    /// resources. A failed reboot is logged; the install itself is complete.
    fn finish(&mut self, config: &ValidatedConfig, ledger: &mut ResourceLedger) -> Result<bool, MountError> {
        run_checked(
            &mut self.host,
            "umount -R",
            &Umount {
                target: Path::new(TARGET_ROOT).to_path_buf(),
                recursive: true,
            },
        )?;
        ledger.unmounted_all();

        if config.reboot() {
            info!("Rebooting into the new system");
            return match run_checked(&mut self.host, "reboot", &Reboot) {
                Ok(_) => Ok(true),
                Err(e) => {
                    warn!("Reboot failed, reboot manually: {}", e);
                    Ok(false)
                }
            };
        }

        for failure in ledger.unwind(&mut self.host) {
            warn!("Could not release {}: {}", failure.step, failure.cause);
        }
        info!("Installation finished; the target is unmounted");
        Ok(false)
    }
}
