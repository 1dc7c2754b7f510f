//! Volume Manager
//!
//! Builds the storage stack on the container partition:
//!
//! ```text
//! container partition
//!   └─ [LUKS2 → /dev/mapper/cryptlvm]      (only when encrypted)
//!        └─ PV → VG vg0 → LV swap, [LV home], LV root (100%FREE)
//! ```
//!
//! Order is fixed and never reordered: luksFormat, open, pvcreate, vgcreate,
//! swap, home, root. Root is always created last so it can take every
//! remaining extent.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::ValidatedConfig;
use crate::error::DeviceError;
use crate::host::{Host, run_checked};
use crate::tools::encryption::{LuksFormat, LuksOpen};
use crate::tools::lvm::{LvCreate, PvCreate, VgCreate};
use crate::types::{LvRole, LvSize};

use super::resources::ResourceLedger;

pub const VOLUME_GROUP: &str = "vg0";
pub const CRYPT_MAPPER: &str = "cryptlvm";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalVolume {
    pub role: LvRole,
    pub size: LvSize,
}

impl LogicalVolume {
    pub fn name(&self) -> String {
        self.role.to_string()
    }
}

/// The derived storage stack for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeTopology {
    /// Partition that holds either the LUKS container or the PV.
    pub container: PathBuf,
    pub encrypted: bool,
    /// Device handed to `pvcreate`.
    pub physical_volume: PathBuf,
    pub volume_group: String,
    /// In creation order: swap, home (if any), root.
    pub logical_volumes: Vec<LogicalVolume>,
}

impl VolumeTopology {
    pub fn volume(&self, role: LvRole) -> Option<&LogicalVolume> {
        self.logical_volumes.iter().find(|lv| lv.role == role)
    }

    pub fn has(&self, role: LvRole) -> bool {
        self.volume(role).is_some()
    }

    /// `/dev/<vg>/<lv>`
    pub fn device_path(&self, role: LvRole) -> PathBuf {
        PathBuf::from(format!("/dev/{}/{}", self.volume_group, role))
    }

    /// `/dev/mapper/<vg>-<lv>`, the name the encrypt hook resolves at boot.
    pub fn mapper_path(&self, role: LvRole) -> PathBuf {
        PathBuf::from(format!("/dev/mapper/{}-{}", self.volume_group, role))
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "  {} -> PV {}{}",
            self.container.display(),
            self.physical_volume.display(),
            if self.encrypted { " (LUKS2)" } else { "" }
        )];
        for lv in &self.logical_volumes {
            let size = match lv.size {
                LvSize::Fixed { mib } => format!("{} MiB", mib),
                LvSize::RemainingFree => "100%FREE".to_string(),
            };
            lines.push(format!(
                "  {} ({})",
                self.device_path(lv.role).display(),
                size
            ));
        }
        lines.join("\n")
    }
}

/// Derive the topology for `config` on `container`.
pub fn topology(config: &ValidatedConfig, container: &Path) -> VolumeTopology {
    let encrypted = config.is_encrypted();
    let physical_volume = if encrypted {
        PathBuf::from(format!("/dev/mapper/{}", CRYPT_MAPPER))
    } else {
        container.to_path_buf()
    };

    let mut logical_volumes = vec![LogicalVolume {
        role: LvRole::Swap,
        size: LvSize::Fixed {
            mib: config.swap_size_mib(),
        },
    }];
    if let Some(mib) = config.home_size_mib() {
        logical_volumes.push(LogicalVolume {
            role: LvRole::Home,
            size: LvSize::Fixed { mib },
        });
    }
    logical_volumes.push(LogicalVolume {
        role: LvRole::Root,
        size: LvSize::RemainingFree,
    });

    VolumeTopology {
        container: container.to_path_buf(),
        encrypted,
        physical_volume,
        volume_group: VOLUME_GROUP.to_string(),
        logical_volumes,
    }
}

/// Create the LUKS container (if encrypted), PV, VG and every LV.
///
/// Each opened resource is recorded in `ledger` as soon as it exists.
pub fn provision(
    host: &mut dyn Host,
    config: &ValidatedConfig,
    topology: &VolumeTopology,
    ledger: &mut ResourceLedger,
) -> Result<(), DeviceError> {
    info!("Provisioning volumes:\n{}", topology.summary());

    if topology.encrypted {
        let key = config.encryption_key().ok_or_else(|| DeviceError {
            step: "luksFormat".to_string(),
            cause: "encryption enabled without a key".to_string(),
        })?;

        run_checked(
            host,
            "luksFormat",
            &LuksFormat {
                device: topology.container.clone(),
                key: key.clone(),
            },
        )?;
        run_checked(
            host,
            "luksOpen",
            &LuksOpen {
                device: topology.container.clone(),
                mapper_name: CRYPT_MAPPER.to_string(),
                key: key.clone(),
            },
        )?;
        ledger.opened_mapper(CRYPT_MAPPER);
    }

    run_checked(
        host,
        "pvcreate",
        &PvCreate {
            device: topology.physical_volume.clone(),
        },
    )?;
    run_checked(
        host,
        "vgcreate",
        &VgCreate {
            name: topology.volume_group.clone(),
            physical_volume: topology.physical_volume.clone(),
        },
    )?;
    ledger.activated_volume_group(&topology.volume_group);

    for lv in &topology.logical_volumes {
        run_checked(
            host,
            &format!("lvcreate {}", lv.name()),
            &LvCreate {
                volume_group: topology.volume_group.clone(),
                name: lv.name(),
                size: lv.size,
            },
        )?;
    }

    Ok(())
}
