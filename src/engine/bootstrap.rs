//! Live-system preparation and base system bootstrap.
//!
//! - Clock sync and mirror ranking on the live ISO (both non-fatal)
//! - Package resolution for the target
//! - `pacstrap` and `genfstab`

use std::fmt;
use std::path::Path;

use tracing::{info, warn};

use crate::config::ValidatedConfig;
use crate::error::ConfigureError;
use crate::host::{Host, run_checked};
use crate::tools::system::{EnableNtp, Genfstab, Pacstrap, Reflector};
use crate::types::Microcode;

use super::mount::TARGET_ROOT;

/// Packages every target gets, whatever the layout.
pub const BASE_PACKAGES: &[&str] = &["base", "linux", "linux-firmware", "lvm2", "mkinitcpio"];

pub const MIRRORLIST: &str = "/etc/pacman.d/mirrorlist";
pub const MIRROR_LIMIT: u32 = 25;

// ============================================================================
// Mirror Ranking Result
// ============================================================================

/// Outcome of mirror ranking attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorRankResult {
    Ranked { mirror_count: u32 },
    /// `update_mirrors` is off; the ISO's mirrorlist is used as is.
    Skipped,
    /// Ranking failed; installation continues with the default mirrorlist.
    Failed(String),
}

impl fmt::Display for MirrorRankResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ranked { mirror_count } => write!(f, "Ranked {} mirrors", mirror_count),
            Self::Skipped => write!(f, "Skipped: mirror update disabled"),
            Self::Failed(err) => write!(f, "Failed: {}", err),
        }
    }
}

/// Sync the clock and, if asked to, rank mirrors. Never fails the run.
pub fn prepare_live_system(host: &mut dyn Host, config: &ValidatedConfig) -> MirrorRankResult {
    if let Err(e) = run_checked(host, "timedatectl", &EnableNtp) {
        warn!("Could not enable NTP on the live system: {}", e);
    }

    if !config.update_mirrors() {
        info!("Mirror ranking skipped");
        return MirrorRankResult::Skipped;
    }

    info!("Ranking mirrors (latest={})", MIRROR_LIMIT);
    let reflector = Reflector {
        save_to: MIRRORLIST.into(),
        latest: MIRROR_LIMIT,
    };
    match run_checked(host, "reflector", &reflector) {
        Ok(_) => MirrorRankResult::Ranked {
            mirror_count: MIRROR_LIMIT,
        },
        Err(e) => {
            let msg = format!("{}; using default mirrorlist", e.cause);
            warn!("{}", msg);
            MirrorRankResult::Failed(msg)
        }
    }
}

/// Resolve the package set for `pacstrap`.
///
/// Order is base, encryption tools, microcode, bootloader, then `extra`;
/// duplicates keep their first position.
pub fn packages(config: &ValidatedConfig, microcode: Microcode, extra: &[String]) -> Vec<String> {
    let mut packages: Vec<&str> = BASE_PACKAGES.to_vec();

    if config.is_encrypted() {
        packages.push("cryptsetup");
    }
    if let Some(ucode) = microcode.package() {
        packages.push(ucode);
    }
    packages.extend_from_slice(config.bootloader().packages());
    packages.extend(extra.iter().map(String::as_str));

    let mut resolved: Vec<String> = Vec::with_capacity(packages.len());
    for package in packages {
        if !resolved.iter().any(|p| p == package) {
            resolved.push(package.to_string());
        }
    }
    resolved
}

/// pacstrap the target and append the generated fstab.
pub fn install_base_system(host: &mut dyn Host, packages: &[String]) -> Result<(), ConfigureError> {
    let root = Path::new(TARGET_ROOT);
    info!("Installing {} packages into {}", packages.len(), root.display());

    run_checked(
        host,
        "pacstrap",
        &Pacstrap {
            root: root.to_path_buf(),
            packages: packages.to_vec(),
        },
    )?;

    let fstab = run_checked(
        host,
        "genfstab",
        &Genfstab {
            root: root.to_path_buf(),
        },
    )?;
    if fstab.stdout.trim().is_empty() {
        return Err(ConfigureError {
            step: "genfstab".to_string(),
            cause: "generated fstab is empty".to_string(),
        });
    }
    host.append_file(&root.join("etc/fstab"), &fstab.stdout)
        .map_err(|e| ConfigureError {
            step: "genfstab".to_string(),
            cause: format!("{:#}", e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EncryptionSettings, InstallConfig};
    use crate::host::RecordingHost;
    use crate::types::{Bootloader, Secret};

    fn config(encrypted: bool, bootloader: Bootloader, update_mirrors: bool) -> ValidatedConfig {
        InstallConfig {
            root_password: Secret::new("toor"),
            encryption: encrypted.then(|| EncryptionSettings {
                key: Some(Secret::new("hunter2")),
            }),
            bootloader,
            update_mirrors,
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn test_packages_plain_systemd_boot() {
        let pkgs = packages(&config(false, Bootloader::SystemdBoot, false), Microcode::None, &[]);
        assert_eq!(pkgs, vec!["base", "linux", "linux-firmware", "lvm2", "mkinitcpio"]);
    }

    #[test]
    fn test_packages_encrypted_grub_intel() {
        let pkgs = packages(
            &config(true, Bootloader::Grub, false),
            Microcode::Intel,
            &["dhcpcd".to_string(), "lvm2".to_string()],
        );
        assert_eq!(
            &pkgs[5..],
            &["cryptsetup", "intel-ucode", "grub", "efibootmgr", "dhcpcd"]
        );
    }

    #[test]
    fn test_prepare_skips_reflector_when_disabled() {
        let mut host = RecordingHost::new();
        let result = prepare_live_system(&mut host, &config(false, Bootloader::Grub, false));
        assert_eq!(result, MirrorRankResult::Skipped);
        assert_eq!(host.commands(), vec!["timedatectl set-ntp true"]);
    }

    #[test]
    fn test_reflector_failure_is_not_fatal() {
        let mut host = RecordingHost::new()
            .fail_when("reflector")
            .fail_when("timedatectl");
        let result = prepare_live_system(&mut host, &config(false, Bootloader::Grub, true));
        assert!(matches!(result, MirrorRankResult::Failed(_)));
        assert_eq!(
            host.commands()[1],
            "reflector --latest 25 --sort rate --save /etc/pacman.d/mirrorlist"
        );
    }

    #[test]
    fn test_install_base_system_appends_fstab() {
        let mut host = RecordingHost::new();
        install_base_system(&mut host, &["base".to_string()]).unwrap();
        assert_eq!(host.commands(), vec!["pacstrap -K /mnt base", "genfstab -U /mnt"]);
        assert!(host.file("/mnt/etc/fstab").unwrap().contains("UUID=1111 /"));
    }

    #[test]
    fn test_empty_fstab_is_an_error() {
        let mut host = RecordingHost::new().with_output("genfstab", "");
        let err = install_base_system(&mut host, &["base".to_string()]).unwrap_err();
        assert_eq!(err.step, "genfstab");
    }
}
