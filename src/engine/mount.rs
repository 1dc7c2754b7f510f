//! Filesystem & Mount Orchestrator
//!
//! Formats the root volume, the ESP and the home volume, then mounts them
//! as `/mnt`, `/mnt/boot`, `/mnt/home`. The swap volume is formatted and
//! activated separately since it has no mount point.
//!
//! The root-before-boot ordering is a property of how [`mount_plan`] builds
//! the list and is re-checked by [`MountPlan::verify_nesting`] before any
//! mount runs.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{DeviceError, MountError};
use crate::host::{Host, run_checked};
use crate::tools::disk::{Mkdir, Mkfs, Mkswap, Mount, Swapon};
use crate::types::{Filesystem, LvRole};

use super::resources::ResourceLedger;
use super::volume::VolumeTopology;

/// Where the target system is assembled.
pub const TARGET_ROOT: &str = "/mnt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    pub device: PathBuf,
    pub target: PathBuf,
    pub filesystem: Filesystem,
}

/// Mounts in the order they must happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPlan {
    pub mounts: Vec<MountPoint>,
    pub swap: PathBuf,
}

impl MountPlan {
    pub fn root(&self) -> &Path {
        Path::new(TARGET_ROOT)
    }

    pub fn targets(&self) -> Vec<&Path> {
        self.mounts.iter().map(|m| m.target.as_path()).collect()
    }

    /// Every mount point must sit inside one mounted before it, and the
    /// first one must be the target root.
    pub fn verify_nesting(&self) -> Result<(), MountError> {
        let Some(first) = self.mounts.first() else {
            return Err(MountError {
                step: "mount plan".to_string(),
                cause: "no mounts planned".to_string(),
            });
        };
        if first.target != self.root() {
            return Err(MountError {
                step: "mount plan".to_string(),
                cause: format!(
                    "{} is mounted before {}",
                    first.target.display(),
                    TARGET_ROOT
                ),
            });
        }

        for (i, mount) in self.mounts.iter().enumerate().skip(1) {
            let has_parent = self.mounts[..i]
                .iter()
                .any(|earlier| mount.target.starts_with(&earlier.target));
            if !has_parent {
                return Err(MountError {
                    step: "mount plan".to_string(),
                    cause: format!(
                        "{} has no mounted parent before it",
                        mount.target.display()
                    ),
                });
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> String {
        let mut lines: Vec<String> = self
            .mounts
            .iter()
            .map(|m| {
                format!(
                    "  {} -> {} ({})",
                    m.device.display(),
                    m.target.display(),
                    m.filesystem
                )
            })
            .collect();
        lines.push(format!("  {} -> swap", self.swap.display()));
        lines.join("\n")
    }
}

/// Build the mount plan: root, then boot, then home if the topology has one.
pub fn mount_plan(topology: &VolumeTopology, esp: &Path) -> MountPlan {
    let root = Path::new(TARGET_ROOT);
    let mut mounts = vec![
        MountPoint {
            device: topology.device_path(LvRole::Root),
            target: root.to_path_buf(),
            filesystem: Filesystem::Ext4,
        },
        MountPoint {
            device: esp.to_path_buf(),
            target: root.join("boot"),
            filesystem: Filesystem::Fat32,
        },
    ];
    if topology.has(LvRole::Home) {
        mounts.push(MountPoint {
            device: topology.device_path(LvRole::Home),
            target: root.join("home"),
            filesystem: Filesystem::Ext4,
        });
    }

    MountPlan {
        mounts,
        swap: topology.device_path(LvRole::Swap),
    }
}

/// mkfs every planned mount and mkswap the swap volume.
pub fn format_filesystems(host: &mut dyn Host, plan: &MountPlan) -> Result<(), DeviceError> {
    for mount in &plan.mounts {
        run_checked(
            host,
            &format!("mkfs {}", mount.target.display()),
            &Mkfs {
                filesystem: mount.filesystem,
                device: mount.device.clone(),
            },
        )?;
    }
    run_checked(
        host,
        "mkswap",
        &Mkswap {
            device: plan.swap.clone(),
        },
    )?;
    Ok(())
}

/// Create each mount point inside its parent and mount it, in plan order.
pub fn mount_filesystems(
    host: &mut dyn Host,
    plan: &MountPlan,
    ledger: &mut ResourceLedger,
) -> Result<(), MountError> {
    plan.verify_nesting()?;
    info!("Mounting target:\n{}", plan.summary());

    for mount in &plan.mounts {
        let step = format!("mount {}", mount.target.display());
        run_checked(
            host,
            &step,
            &Mkdir {
                path: mount.target.clone(),
            },
        )?;
        run_checked(
            host,
            &step,
            &Mount {
                source: mount.device.clone(),
                target: mount.target.clone(),
            },
        )?;
        ledger.mounted(&mount.target);
    }
    Ok(())
}

pub fn enable_swap(
    host: &mut dyn Host,
    plan: &MountPlan,
    ledger: &mut ResourceLedger,
) -> Result<(), MountError> {
    run_checked(
        host,
        "swapon",
        &Swapon {
            device: plan.swap.clone(),
        },
    )?;
    ledger.enabled_swap(&plan.swap);
    Ok(())
}
