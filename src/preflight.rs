//! Pre-flight checks for the runtime environment
//!
//! Probing and judging are split: [`probe`] reads the live system into plain
//! [`EnvironmentFacts`], and [`check`] decides whether those facts allow a
//! destructive install of a given configuration. `check` has no side effects,
//! so every rejection path can be tested with hand-built facts.
//!
//! An install is refused when:
//! - the kernel is not the Arch live ISO (`archiso` absent from `uname -a`)
//! - the machine did not boot in UEFI mode (`/sys/firmware/efi` missing)
//! - the effective user is not root
//! - a required binary is not on `PATH`
//! - the target disk does not exist or cannot hold every volume
//! - archlinux.org is unreachable (pacstrap needs the network)

use std::fs;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ValidatedConfig;
use crate::error::PreconditionError;
use crate::types::Microcode;

/// Smallest root volume worth installing onto, in MiB.
pub const MIN_ROOT_SIZE_MIB: u32 = 2048;

const EFI_SYSFS: &str = "/sys/firmware/efi";
const NETWORK_PROBE_HOST: &str = "archlinux.org:443";
const NETWORK_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the precondition check needs to know about the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentFacts {
    /// `uname -a` equivalent: sysname, nodename, release, version, machine.
    pub uname: String,
    pub efi_firmware: bool,
    pub is_root: bool,
    pub missing_binaries: Vec<String>,
    /// Size of the target disk; `None` when the device does not exist.
    pub disk_size_mib: Option<u64>,
    pub network_online: bool,
    pub microcode: Microcode,
}

impl EnvironmentFacts {
    /// Facts of a healthy live ISO with a disk of `disk_size_mib`.
    pub fn live_iso(disk_size_mib: u64) -> Self {
        Self {
            uname: "Linux archiso 6.10.10-arch1-1 #1 SMP PREEMPT_DYNAMIC x86_64".to_string(),
            efi_firmware: true,
            is_root: true,
            missing_binaries: Vec::new(),
            disk_size_mib: Some(disk_size_mib),
            network_online: true,
            microcode: Microcode::Intel,
        }
    }

    pub fn is_live_iso(&self) -> bool {
        self.uname.contains("archiso")
    }
}

/// Decide whether the environment may host this install.
///
/// Every failed condition is listed in the returned reason.
pub fn check(facts: &EnvironmentFacts, config: &ValidatedConfig) -> Result<(), PreconditionError> {
    let mut reasons = Vec::new();

    if !facts.is_live_iso() {
        reasons.push("not running from the Arch Linux live ISO (archiso)".to_string());
    }
    if !facts.efi_firmware {
        reasons.push(format!("UEFI firmware not detected ({} missing)", EFI_SYSFS));
    }
    if !facts.is_root {
        reasons.push("root privileges required".to_string());
    }
    if !facts.missing_binaries.is_empty() {
        let listed: Vec<String> = facts
            .missing_binaries
            .iter()
            .map(|b| format!("{} (pacman -S {})", b, package_for_binary(b)))
            .collect();
        reasons.push(format!("missing required binaries: {}", listed.join(", ")));
    }

    let required = config.required_disk_mib(MIN_ROOT_SIZE_MIB);
    match facts.disk_size_mib {
        None => reasons.push(format!(
            "target disk {} does not exist",
            config.disk().display()
        )),
        Some(size) if size < required => reasons.push(format!(
            "target disk {} has {} MiB, but boot, swap, home and a {} MiB root need {} MiB",
            config.disk().display(),
            size,
            MIN_ROOT_SIZE_MIB,
            required
        )),
        Some(_) => {}
    }

    if !facts.network_online {
        reasons.push(format!("no network connectivity ({} unreachable)", NETWORK_PROBE_HOST));
    }

    if reasons.is_empty() {
        info!("Pre-flight checks passed");
        Ok(())
    } else {
        Err(PreconditionError::new(reasons.join("; ")))
    }
}

/// Binaries the live system must provide for this configuration.
///
/// Tools run through `arch-chroot` (bootctl, grub-install, mkinitcpio) come
/// from the target and are not listed.
pub fn required_binaries(config: &ValidatedConfig) -> Vec<&'static str> {
    let mut binaries = vec![
        "wipefs",
        "parted",
        "udevadm",
        "pvcreate",
        "vgcreate",
        "lvcreate",
        "vgchange",
        "mkfs.fat",
        "mkfs.ext4",
        "mkswap",
        "swapon",
        "swapoff",
        "mount",
        "umount",
        "blkid",
        "timedatectl",
        "pacstrap",
        "genfstab",
        "arch-chroot",
    ];
    if config.is_encrypted() {
        binaries.push("cryptsetup");
    }
    if config.timezone().is_none() {
        binaries.push("curl");
    }
    if config.update_mirrors() {
        binaries.push("reflector");
    }
    binaries
}

/// Map binary names to their Arch Linux package names
fn package_for_binary(binary: &str) -> &'static str {
    match binary {
        "parted" => "parted",
        "cryptsetup" => "cryptsetup",
        "pvcreate" | "vgcreate" | "lvcreate" | "vgchange" => "lvm2",
        "mkfs.fat" => "dosfstools",
        "mkfs.ext4" => "e2fsprogs",
        "udevadm" | "timedatectl" => "systemd",
        "pacstrap" | "genfstab" | "arch-chroot" => "arch-install-scripts",
        "curl" => "curl",
        "reflector" => "reflector",
        _ => "util-linux",
    }
}

// ============================================================================
// Probing
// ============================================================================

/// Read the live system into `EnvironmentFacts`. Never fails; anything that
/// cannot be determined is reported as absent.
pub fn probe(disk: &Path, binaries: &[&str]) -> EnvironmentFacts {
    let facts = EnvironmentFacts {
        uname: uname_line(),
        efi_firmware: Path::new(EFI_SYSFS).exists(),
        is_root: nix::unistd::geteuid().is_root(),
        missing_binaries: binaries
            .iter()
            .filter(|b| which::which(b).is_err())
            .map(|b| (*b).to_string())
            .collect(),
        disk_size_mib: disk_size_mib(disk),
        network_online: detect_internet(),
        microcode: probe_microcode(),
    };

    info!(
        uefi = facts.efi_firmware,
        root = facts.is_root,
        disk_mib = ?facts.disk_size_mib,
        online = facts.network_online,
        microcode = %facts.microcode,
        "Environment probed"
    );
    facts
}

/// CPU vendor from `/proc/cpuinfo`; `Microcode::None` if unreadable.
pub fn probe_microcode() -> Microcode {
    fs::read_to_string("/proc/cpuinfo")
        .map(|cpuinfo| Microcode::from_cpuinfo(&cpuinfo))
        .unwrap_or_default()
}

fn uname_line() -> String {
    match nix::sys::utsname::uname() {
        Ok(u) => [
            u.sysname(),
            u.nodename(),
            u.release(),
            u.version(),
            u.machine(),
        ]
        .iter()
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" "),
        Err(e) => {
            warn!("uname failed: {}", e);
            String::new()
        }
    }
}

/// Disk size from `/sys/class/block/<name>/size`, which counts 512-byte
/// sectors regardless of the device's logical block size.
fn disk_size_mib(disk: &Path) -> Option<u64> {
    let name = disk.file_name()?;
    let sysfs = Path::new("/sys/class/block").join(name).join("size");
    let sectors = fs::read_to_string(&sysfs).ok()?;
    let sectors: u64 = sectors.trim().parse().ok()?;
    debug!("{} reports {} sectors", sysfs.display(), sectors);
    Some(sectors * 512 / (1024 * 1024))
}

/// Detect network connectivity via TCP connection to archlinux.org.
fn detect_internet() -> bool {
    let addrs: Vec<SocketAddr> = match NETWORK_PROBE_HOST.to_socket_addrs() {
        Ok(addrs) => addrs.collect(),
        Err(e) => {
            warn!("Failed to resolve {}: {}", NETWORK_PROBE_HOST, e);
            return false;
        }
    };

    addrs
        .iter()
        .any(|addr| match TcpStream::connect_timeout(addr, NETWORK_PROBE_TIMEOUT) {
            Ok(_stream) => true,
            Err(e) => {
                debug!("TCP to {} failed: {}", addr, e);
                false
            }
        })
}
