//! Type-safe arguments for block device tools.
//!
//! - `Wipefs`, `Parted`, `UdevSettle` for partitioning
//! - `Mkfs`, `Mkswap` for filesystem creation
//! - `Mkdir`, `Mount`, `Umount`, `Swapon`, `Swapoff` for the mount tree
//! - `BlkidUuid` for reading a partition UUID

use std::path::PathBuf;

use crate::tool_traits::ToolArgs;
use crate::types::Filesystem;

/// `wipefs --all <device>`: removes stale partition table, LVM and LUKS
/// signatures so that parted and pvcreate never prompt.
#[derive(Debug, Clone)]
pub struct Wipefs {
    pub device: PathBuf,
}

impl ToolArgs for Wipefs {
    fn program(&self) -> &'static str {
        "wipefs"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["--all".to_string(), self.device.display().to_string()]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `parted -s -a optimal <device> <script...>`
///
/// The script tokens come from the partition plan, e.g.
/// `mklabel gpt mkpart ESP fat32 0% 1024MiB set 1 esp on`.
#[derive(Debug, Clone)]
pub struct Parted {
    pub device: PathBuf,
    pub script: Vec<String>,
}

impl ToolArgs for Parted {
    fn program(&self) -> &'static str {
        "parted"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "-s".to_string(),
            "-a".to_string(),
            "optimal".to_string(),
            self.device.display().to_string(),
        ];
        args.extend(self.script.iter().cloned());
        args
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `udevadm settle`: waits for partition device nodes to appear.
#[derive(Debug, Clone, Default)]
pub struct UdevSettle;

impl ToolArgs for UdevSettle {
    fn program(&self) -> &'static str {
        "udevadm"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["settle".to_string()]
    }
}

/// `mkfs.<fs> <flags> <device>`
#[derive(Debug, Clone)]
pub struct Mkfs {
    pub filesystem: Filesystem,
    pub device: PathBuf,
}

impl ToolArgs for Mkfs {
    fn program(&self) -> &'static str {
        self.filesystem.mkfs_command().0
    }

    fn to_cli_args(&self) -> Vec<String> {
        let (_, flags) = self.filesystem.mkfs_command();
        let mut args: Vec<String> = flags.iter().map(|f| f.to_string()).collect();
        args.push(self.device.display().to_string());
        args
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `mkswap <device>`
#[derive(Debug, Clone)]
pub struct Mkswap {
    pub device: PathBuf,
}

impl ToolArgs for Mkswap {
    fn program(&self) -> &'static str {
        "mkswap"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.device.display().to_string()]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `swapon <device>`
#[derive(Debug, Clone)]
pub struct Swapon {
    pub device: PathBuf,
}

impl ToolArgs for Swapon {
    fn program(&self) -> &'static str {
        "swapon"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.device.display().to_string()]
    }
}

/// `swapoff <device>`
#[derive(Debug, Clone)]
pub struct Swapoff {
    pub device: PathBuf,
}

impl ToolArgs for Swapoff {
    fn program(&self) -> &'static str {
        "swapoff"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.device.display().to_string()]
    }
}

/// `mkdir -p <path>`
#[derive(Debug, Clone)]
pub struct Mkdir {
    pub path: PathBuf,
}

impl ToolArgs for Mkdir {
    fn program(&self) -> &'static str {
        "mkdir"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-p".to_string(), self.path.display().to_string()]
    }
}

/// `mount <source> <target>`
#[derive(Debug, Clone)]
pub struct Mount {
    pub source: PathBuf,
    pub target: PathBuf,
}

impl ToolArgs for Mount {
    fn program(&self) -> &'static str {
        "mount"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            self.source.display().to_string(),
            self.target.display().to_string(),
        ]
    }
}

/// `umount [-R] <target>`
#[derive(Debug, Clone)]
pub struct Umount {
    pub target: PathBuf,
    pub recursive: bool,
}

impl ToolArgs for Umount {
    fn program(&self) -> &'static str {
        "umount"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(2);
        if self.recursive {
            args.push("-R".to_string());
        }
        args.push(self.target.display().to_string());
        args
    }
}

/// `blkid -s UUID -o value <device>`
#[derive(Debug, Clone)]
pub struct BlkidUuid {
    pub device: PathBuf,
}

impl ToolArgs for BlkidUuid {
    fn program(&self) -> &'static str {
        "blkid"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-s".to_string(),
            "UUID".to_string(),
            "-o".to_string(),
            "value".to_string(),
            self.device.display().to_string(),
        ]
    }
}
