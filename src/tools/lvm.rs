//! Type-safe arguments for LVM2 tools.

use std::path::PathBuf;

use crate::tool_traits::ToolArgs;
use crate::types::LvSize;

/// `pvcreate --yes <device>`
#[derive(Debug, Clone)]
pub struct PvCreate {
    pub device: PathBuf,
}

impl ToolArgs for PvCreate {
    fn program(&self) -> &'static str {
        "pvcreate"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["--yes".to_string(), self.device.display().to_string()]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `vgcreate <name> <pv>`
#[derive(Debug, Clone)]
pub struct VgCreate {
    pub name: String,
    pub physical_volume: PathBuf,
}

impl ToolArgs for VgCreate {
    fn program(&self) -> &'static str {
        "vgcreate"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.name.clone(), self.physical_volume.display().to_string()]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `lvcreate --yes <-L NM | -l 100%FREE> -n <name> <vg>`
///
/// `--yes` answers the wipe-signature prompt that lvcreate raises when a
/// previous install left a filesystem signature at the same offset.
#[derive(Debug, Clone)]
pub struct LvCreate {
    pub volume_group: String,
    pub name: String,
    pub size: LvSize,
}

impl ToolArgs for LvCreate {
    fn program(&self) -> &'static str {
        "lvcreate"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["--yes".to_string()];
        args.extend(self.size.to_lvcreate_flag());
        args.push("-n".to_string());
        args.push(self.name.clone());
        args.push(self.volume_group.clone());
        args
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `vgchange -a{y,n} <vg>`
#[derive(Debug, Clone)]
pub struct VgChange {
    pub volume_group: String,
    pub active: bool,
}

impl ToolArgs for VgChange {
    fn program(&self) -> &'static str {
        "vgchange"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let flag = if self.active { "-ay" } else { "-an" };
        vec![flag.to_string(), self.volume_group.clone()]
    }
}
