//! Type-safe configuration types for Warding
//!
//! Partition scheme, bootloader and filesystem choices are closed enums that
//! are matched exhaustively, never compared as strings.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Which logical volumes are carved out of the volume group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
pub enum PartitionScheme {
    /// `/boot` on the ESP and everything else on the root volume.
    #[default]
    #[strum(serialize = "root_only")]
    RootOnly,
    /// `/boot` on the ESP plus separate root and home volumes.
    #[strum(serialize = "root_and_home")]
    RootAndHome,
}

impl PartitionScheme {
    /// Check if this scheme creates a separate home volume
    pub fn has_home(self) -> bool {
        matches!(self, Self::RootAndHome)
    }
}

/// Bootloader selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "kebab-case")]
pub enum Bootloader {
    #[default]
    #[strum(serialize = "systemd-boot")]
    SystemdBoot,
    #[strum(serialize = "grub")]
    Grub,
}

impl Bootloader {
    /// Packages the bootloader needs inside the target system.
    pub fn packages(self) -> &'static [&'static str] {
        match self {
            // bootctl ships with systemd, which is part of `base`
            Self::SystemdBoot => &[],
            Self::Grub => &["grub", "efibootmgr"],
        }
    }
}

/// Filesystem types the installer can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Filesystem {
    /// FAT32 for the EFI System Partition
    #[strum(serialize = "fat32")]
    Fat32,
    #[strum(serialize = "ext4")]
    Ext4,
}

impl Filesystem {
    /// The mkfs program and the flags it needs to run non-interactively.
    pub fn mkfs_command(self) -> (&'static str, &'static [&'static str]) {
        match self {
            Self::Fat32 => ("mkfs.fat", &["-F32"]),
            Self::Ext4 => ("mkfs.ext4", &["-F"]),
        }
    }
}

/// Role of a logical volume; the lowercase name is also the LV name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum LvRole {
    Swap,
    Home,
    Root,
}

/// Size request for a logical volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LvSize {
    /// Exact size in MiB.
    Fixed { mib: u32 },
    /// Every extent still free in the volume group.
    RemainingFree,
}

impl LvSize {
    /// Render as the `lvcreate` size flag and its value.
    pub fn to_lvcreate_flag(self) -> [String; 2] {
        match self {
            Self::Fixed { mib } => ["-L".to_string(), format!("{}M", mib)],
            Self::RemainingFree => ["-l".to_string(), "100%FREE".to_string()],
        }
    }
}

/// CPU microcode package, picked from the probed CPU vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
pub enum Microcode {
    #[strum(serialize = "intel")]
    Intel,
    #[strum(serialize = "amd")]
    Amd,
    #[default]
    #[strum(serialize = "none")]
    None,
}

impl Microcode {
    /// Parse the `vendor_id` field out of `/proc/cpuinfo` content.
    pub fn from_cpuinfo(cpuinfo: &str) -> Self {
        let vendor = cpuinfo
            .lines()
            .find(|line| line.starts_with("vendor_id"))
            .and_then(|line| line.split(':').nth(1))
            .map(str::trim);

        match vendor {
            Some("GenuineIntel") => Self::Intel,
            Some("AuthenticAMD") => Self::Amd,
            _ => Self::None,
        }
    }

    pub fn package(self) -> Option<&'static str> {
        match self {
            Self::Intel => Some("intel-ucode"),
            Self::Amd => Some("amd-ucode"),
            Self::None => None,
        }
    }

    /// Early-load image the bootloader must list before the initramfs.
    pub fn image(self) -> Option<&'static str> {
        match self {
            Self::Intel => Some("/intel-ucode.img"),
            Self::Amd => Some("/amd-ucode.img"),
            Self::None => None,
        }
    }
}

/// A secret string (encryption key, root password).
///
/// Never printed by `Debug` and wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// True when the secret is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}
