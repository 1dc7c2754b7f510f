//! `warding plan`: shows what an install would do without doing it.
//!
//! The pipeline is driven against a [`RecordingHost`] that reports a healthy
//! live ISO, so every derived value and every command comes from the same
//! code path a real install takes.

use std::fmt::Write as _;

use crate::config::InstallConfig;
use crate::engine::initramfs::hooks_line;
use crate::engine::bootloader::grub_cmdline;
use crate::error::StageError;
use crate::host::{Action, RecordingHost};
use crate::install_state::InstallStage;
use crate::pipeline::{InstallReport, Outcome, Pipeline};
use crate::postinstall::PostInstallStep;
use crate::preflight::EnvironmentFacts;
use crate::types::{Bootloader, Microcode};

/// Disk size reported to the preview, large enough for any valid config.
const PREVIEW_DISK_MIB: u64 = 16 * 1024 * 1024;

/// A recorded install: the report plus every action, in order.
#[derive(Debug, Clone)]
pub struct Preview {
    pub report: InstallReport,
    pub actions: Vec<Action>,
}

/// Run `config` against a recording host.
///
/// Fails with the stage error if the config would fail before completion
/// (validation is the only realistic one).
pub fn preview(
    config: InstallConfig,
    microcode: Microcode,
    steps: Vec<Box<dyn PostInstallStep>>,
) -> Result<Preview, (InstallStage, StageError)> {
    let facts = EnvironmentFacts {
        microcode,
        ..EnvironmentFacts::live_iso(PREVIEW_DISK_MIB)
    };
    let mut pipeline = Pipeline::new(RecordingHost::new().with_facts(facts)).confirm_destructive();
    for step in steps {
        pipeline = pipeline.with_boxed_step(step);
    }

    let outcome = pipeline.run(config);
    match outcome {
        Outcome::Success(report) => Ok(Preview {
            report: *report,
            actions: pipeline.into_host().actions().to_vec(),
        }),
        Outcome::Failure { stage, error, .. } => Err((stage, error)),
    }
}

impl Preview {
    /// Human-readable plan: derived layout, then the numbered script.
    pub fn render(&self) -> String {
        let report = &self.report;
        let mut out = String::new();

        let _ = writeln!(out, "Target disk: {}", report.disk.display());
        let _ = writeln!(out, "\nPartitions:\n{}", report.partition_plan.summary());
        let _ = writeln!(out, "\nVolumes:\n{}", report.topology.summary());
        let _ = writeln!(out, "\nMounts:\n{}", report.mount_plan.summary());
        let _ = writeln!(out, "\nInitramfs:\n  {}", hooks_line(&report.hooks));

        let entry = &report.boot_entry;
        let _ = writeln!(out, "\nBootloader: {}", entry.bootloader);
        match entry.bootloader {
            Bootloader::SystemdBoot => {
                let _ = writeln!(out, "  linux {}", entry.kernel);
                for image in &entry.initrd_images {
                    let _ = writeln!(out, "  initrd {}", image);
                }
                let _ = writeln!(out, "  options {}", entry.cmdline);
            }
            Bootloader::Grub => {
                let _ = writeln!(out, "  GRUB_CMDLINE_LINUX=\"{}\"", grub_cmdline(entry));
            }
        }

        let _ = writeln!(out, "\nPackages:\n  {}", report.packages.join(" "));

        let _ = writeln!(out, "\nCommands:");
        for (i, action) in self.actions.iter().enumerate() {
            let _ = writeln!(out, "{:>4}. {}", i + 1, action.render());
        }
        out
    }
}
