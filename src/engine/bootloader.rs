//! Bootloader Entry Builder
//!
//! [`build`] derives one [`BootEntry`] from the storage topology; [`install`]
//! dispatches once on the bootloader kind. systemd-boot gets a hand-written
//! entry file, GRUB gets its `GRUB_CMDLINE_LINUX` set and its configuration
//! regenerated.
//!
//! Kernel command lines:
//!
//! ```text
//! encrypted: cryptdevice=UUID=<container-uuid>:cryptlvm root=/dev/mapper/vg0-root rw
//! plain:     root=/dev/vg0/root rw
//! ```

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::BootloaderError;
use crate::host::{Host, read_checked, run_checked, write_checked};
use crate::tools::disk::BlkidUuid;
use crate::tools::system::{BootctlInstall, GrubInstall, GrubMkconfig, InChroot};
use crate::types::{Bootloader, LvRole, Microcode};

use super::mount::TARGET_ROOT;
use super::volume::{CRYPT_MAPPER, VolumeTopology};

pub const ENTRY_TITLE: &str = "Warding Linux";
pub const ENTRY_ID: &str = "warding";
pub const KERNEL_IMAGE: &str = "/vmlinuz-linux";
pub const INITRAMFS_IMAGE: &str = "/initramfs-linux.img";

/// ESP path as seen from inside the chroot.
const ESP: &str = "/boot";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootEntry {
    pub bootloader: Bootloader,
    pub title: String,
    pub kernel: String,
    /// Microcode image first, if any, then the initramfs.
    pub initrd_images: Vec<String>,
    pub cmdline: String,
}

/// Build the boot entry for the topology.
///
/// An encrypted topology needs the container's UUID for `cryptdevice=`.
pub fn build(
    bootloader: Bootloader,
    encrypted: bool,
    topology: &VolumeTopology,
    container_uuid: Option<&str>,
    microcode: Microcode,
) -> Result<BootEntry, BootloaderError> {
    let cmdline = if encrypted {
        let uuid = container_uuid
            .map(str::trim)
            .filter(|uuid| !uuid.is_empty())
            .ok_or_else(|| BootloaderError {
                step: "boot entry".to_string(),
                cause: format!(
                    "encrypted install but no UUID for {}",
                    topology.container.display()
                ),
            })?;
        format!(
            "cryptdevice=UUID={}:{} root={} rw",
            uuid,
            CRYPT_MAPPER,
            topology.mapper_path(LvRole::Root).display()
        )
    } else {
        format!("root={} rw", topology.device_path(LvRole::Root).display())
    };

    let mut initrd_images: Vec<String> = microcode.image().into_iter().map(String::from).collect();
    initrd_images.push(INITRAMFS_IMAGE.to_string());

    Ok(BootEntry {
        bootloader,
        title: ENTRY_TITLE.to_string(),
        kernel: KERNEL_IMAGE.to_string(),
        initrd_images,
        cmdline,
    })
}

/// Read the UUID of the container partition with `blkid`.
pub fn container_uuid(host: &mut dyn Host, container: &Path) -> Result<String, BootloaderError> {
    let output = run_checked(
        host,
        "blkid",
        &BlkidUuid {
            device: container.to_path_buf(),
        },
    )?;
    let uuid = output.stdout.trim();
    if uuid.is_empty() {
        return Err(BootloaderError {
            step: "blkid".to_string(),
            cause: format!("{} has no UUID", container.display()),
        });
    }
    Ok(uuid.to_string())
}

pub fn render_systemd_entry(entry: &BootEntry) -> String {
    let mut text = format!("title {}\nlinux {}\n", entry.title, entry.kernel);
    for image in &entry.initrd_images {
        text.push_str(&format!("initrd {}\n", image));
    }
    text.push_str(&format!("options {}\n", entry.cmdline));
    text
}

pub fn render_loader_conf() -> String {
    format!("default {}.conf\ntimeout 3\neditor no\n", ENTRY_ID)
}

/// GRUB adds `rw` itself, so it is dropped from the command line.
pub fn grub_cmdline(entry: &BootEntry) -> String {
    entry
        .cmdline
        .split_whitespace()
        .filter(|token| *token != "rw")
        .collect::<Vec<_>>()
        .join(" ")
}

/// Set `GRUB_CMDLINE_LINUX` in `/etc/default/grub`, appending it if the file
/// has no such line.
pub fn apply_grub_cmdline(default_grub: &str, cmdline: &str) -> String {
    let setting = format!("GRUB_CMDLINE_LINUX=\"{}\"", cmdline);
    let mut replaced = false;

    let mut lines: Vec<String> = default_grub
        .lines()
        .map(|line| {
            if line.starts_with("GRUB_CMDLINE_LINUX=") {
                replaced = true;
                setting.clone()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(setting);
    }

    let mut text = lines.join("\n");
    text.push('\n');
    text
}

fn target(path: &str) -> PathBuf {
    Path::new(TARGET_ROOT).join(path)
}

/// Install the bootloader described by `entry` into the mounted target.
pub fn install(host: &mut dyn Host, entry: &BootEntry) -> Result<(), BootloaderError> {
    info!("Installing {} (options: {})", entry.bootloader, entry.cmdline);

    match entry.bootloader {
        Bootloader::SystemdBoot => {
            run_checked(
                host,
                "bootctl install",
                &InChroot::new(
                    TARGET_ROOT,
                    BootctlInstall {
                        esp_path: PathBuf::from(ESP),
                    },
                ),
            )?;
            write_checked(
                host,
                "loader.conf",
                &target("boot/loader/loader.conf"),
                &render_loader_conf(),
            )?;
            write_checked(
                host,
                "boot entry",
                &target(&format!("boot/loader/entries/{}.conf", ENTRY_ID)),
                &render_systemd_entry(entry),
            )?;
        }
        Bootloader::Grub => {
            let path = target("etc/default/grub");
            let default_grub = read_checked(host, "grub defaults", &path)?;
            write_checked(
                host,
                "grub defaults",
                &path,
                &apply_grub_cmdline(&default_grub, &grub_cmdline(entry)),
            )?;
            run_checked(
                host,
                "grub-install",
                &InChroot::new(
                    TARGET_ROOT,
                    GrubInstall {
                        efi_directory: PathBuf::from(ESP),
                        bootloader_id: ENTRY_ID.to_string(),
                    },
                ),
            )?;
            run_checked(
                host,
                "grub-mkconfig",
                &InChroot::new(
                    TARGET_ROOT,
                    GrubMkconfig {
                        output: PathBuf::from("/boot/grub/grub.cfg"),
                    },
                ),
            )?;
        }
    }
    Ok(())
}
