//! Partition Planner
//!
//! Produces the fixed two-partition GPT layout every install uses:
//!
//! ```text
//! <disk>1  ESP        0% .. <boot>MiB   FAT32, esp flag
//! <disk>2  container  <boot>MiB .. 100%  lvm flag (LUKS or LVM PV)
//! ```
//!
//! `plan` is pure. `partition_disk` is the only function here that touches
//! the machine.

use std::fmt;
use std::path::{Path, PathBuf};

use strum::Display;
use tracing::info;

use crate::error::DeviceError;
use crate::host::{Host, run_checked};
use crate::tools::disk::{Parted, UdevSettle, Wipefs};

/// A partition boundary as parted understands it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Percentage of the disk (`0%`, `100%`).
    Percent(u8),
    Mib(u32),
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Percent(p) => write!(f, "{}%", p),
            Self::Mib(m) => write!(f, "{}MiB", m),
        }
    }
}

/// GPT flag set on a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum PartitionFlag {
    Esp,
    Lvm,
}

/// One partition of the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    /// 1-based partition number.
    pub number: u32,
    /// GPT partition name.
    pub name: &'static str,
    /// Filesystem type hint written into the GPT entry.
    pub fs_hint: &'static str,
    pub start: Boundary,
    pub end: Boundary,
    pub flag: PartitionFlag,
}

impl PartitionSpec {
    fn to_parted_tokens(&self) -> Vec<String> {
        vec![
            "mkpart".to_string(),
            self.name.to_string(),
            self.fs_hint.to_string(),
            self.start.to_string(),
            self.end.to_string(),
            "set".to_string(),
            self.number.to_string(),
            self.flag.to_string(),
            "on".to_string(),
        ]
    }
}

/// The ESP followed by the container that takes the rest of the disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    pub esp: PartitionSpec,
    pub container: PartitionSpec,
}

impl PartitionPlan {
    /// parted script tokens: `mklabel gpt mkpart ESP fat32 0% ...`
    pub fn to_parted_args(&self) -> Vec<String> {
        let mut args = vec!["mklabel".to_string(), "gpt".to_string()];
        args.extend(self.esp.to_parted_tokens());
        args.extend(self.container.to_parted_tokens());
        args
    }

    pub fn summary(&self) -> String {
        [&self.esp, &self.container]
            .iter()
            .map(|p| {
                format!(
                    "  {}. {:<9} {} .. {} ({}, {} flag)",
                    p.number, p.name, p.start, p.end, p.fs_hint, p.flag
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Partition plan for an ESP of `boot_size_mib`.
pub fn plan(boot_size_mib: u32) -> PartitionPlan {
    PartitionPlan {
        esp: PartitionSpec {
            number: 1,
            name: "ESP",
            fs_hint: "fat32",
            start: Boundary::Percent(0),
            end: Boundary::Mib(boot_size_mib),
            flag: PartitionFlag::Esp,
        },
        container: PartitionSpec {
            number: 2,
            name: "container",
            fs_hint: "ext4",
            start: Boundary::Mib(boot_size_mib),
            end: Boundary::Percent(100),
            flag: PartitionFlag::Lvm,
        },
    }
}

/// Generate partition device path from disk path and partition number.
///
/// NVMe, MMC and loop devices end in a digit and use a `p` separator
/// (`/dev/nvme0n1p1`); everything else appends the number (`/dev/sda1`).
pub fn partition_path(disk: &Path, partition_num: u32) -> PathBuf {
    let disk_str = disk.display().to_string();

    if disk_str.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{}p{}", disk_str, partition_num))
    } else {
        PathBuf::from(format!("{}{}", disk_str, partition_num))
    }
}

/// Device nodes of the partitions created on the disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionedDisk {
    pub esp: PathBuf,
    pub container: PathBuf,
}

impl PartitionedDisk {
    pub fn new(disk: &Path, plan: &PartitionPlan) -> Self {
        Self {
            esp: partition_path(disk, plan.esp.number),
            container: partition_path(disk, plan.container.number),
        }
    }
}

/// Wipe signatures, write the GPT layout and wait for the device nodes.
pub fn partition_disk(
    host: &mut dyn Host,
    disk: &Path,
    plan: &PartitionPlan,
) -> Result<PartitionedDisk, DeviceError> {
    info!("Partitioning {}:\n{}", disk.display(), plan.summary());

    run_checked(
        host,
        "wipefs",
        &Wipefs {
            device: disk.to_path_buf(),
        },
    )?;
    run_checked(
        host,
        "parted",
        &Parted {
            device: disk.to_path_buf(),
            script: plan.to_parted_args(),
        },
    )?;
    run_checked(host, "udevadm settle", &UdevSettle)?;

    Ok(PartitionedDisk::new(disk, plan))
}
