//! Type-safe arguments for bootstrapping and configuring the target system.
//!
//! Commands that must run inside the installed system are wrapped in
//! [`InChroot`], which prefixes them with `arch-chroot <root>`.

use std::path::PathBuf;

use crate::tool_traits::ToolArgs;
use crate::types::Secret;

// ============================================================================
// Chroot wrapper
// ============================================================================

/// Runs `inner` inside the target root via `arch-chroot`.
#[derive(Debug, Clone)]
pub struct InChroot<T: ToolArgs> {
    pub root: PathBuf,
    pub inner: T,
}

impl<T: ToolArgs> InChroot<T> {
    pub fn new(root: impl Into<PathBuf>, inner: T) -> Self {
        Self {
            root: root.into(),
            inner,
        }
    }
}

impl<T: ToolArgs> ToolArgs for InChroot<T> {
    fn program(&self) -> &'static str {
        "arch-chroot"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![
            self.root.display().to_string(),
            self.inner.program().to_string(),
        ];
        args.extend(self.inner.to_cli_args());
        args
    }

    fn stdin(&self) -> Option<Secret> {
        self.inner.stdin()
    }

    fn is_destructive(&self) -> bool {
        self.inner.is_destructive()
    }
}

// ============================================================================
// Live environment
// ============================================================================

/// `timedatectl set-ntp true`
#[derive(Debug, Clone, Default)]
pub struct EnableNtp;

impl ToolArgs for EnableNtp {
    fn program(&self) -> &'static str {
        "timedatectl"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["set-ntp".to_string(), "true".to_string()]
    }
}

/// `reflector --latest <n> --sort rate --save <path>`
#[derive(Debug, Clone)]
pub struct Reflector {
    pub save_to: PathBuf,
    pub latest: u32,
}

impl ToolArgs for Reflector {
    fn program(&self) -> &'static str {
        "reflector"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--latest".to_string(),
            self.latest.to_string(),
            "--sort".to_string(),
            "rate".to_string(),
            "--save".to_string(),
            self.save_to.display().to_string(),
        ]
    }
}

/// `curl` against a geo-IP endpoint that answers with a bare zone name.
#[derive(Debug, Clone)]
pub struct TimezoneLookup {
    pub url: String,
    pub timeout_secs: u32,
}

impl ToolArgs for TimezoneLookup {
    fn program(&self) -> &'static str {
        "curl"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-fsS".to_string(),
            "--max-time".to_string(),
            self.timeout_secs.to_string(),
            self.url.clone(),
        ]
    }
}

/// `pacstrap -K <root> <packages...>`
#[derive(Debug, Clone)]
pub struct Pacstrap {
    pub root: PathBuf,
    pub packages: Vec<String>,
}

impl ToolArgs for Pacstrap {
    fn program(&self) -> &'static str {
        "pacstrap"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["-K".to_string(), self.root.display().to_string()];
        args.extend(self.packages.iter().cloned());
        args
    }
}

/// `genfstab -U <root>`; the host captures stdout for `/etc/fstab`.
#[derive(Debug, Clone)]
pub struct Genfstab {
    pub root: PathBuf,
}

impl ToolArgs for Genfstab {
    fn program(&self) -> &'static str {
        "genfstab"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-U".to_string(), self.root.display().to_string()]
    }
}

/// `reboot`
#[derive(Debug, Clone, Default)]
pub struct Reboot;

impl ToolArgs for Reboot {
    fn program(&self) -> &'static str {
        "reboot"
    }

    fn to_cli_args(&self) -> Vec<String> {
        Vec::new()
    }
}

// ============================================================================
// Inside the chroot
// ============================================================================

/// `ln -sf /usr/share/zoneinfo/<zone> /etc/localtime`
#[derive(Debug, Clone)]
pub struct LinkLocaltime {
    pub timezone: String,
}

impl ToolArgs for LinkLocaltime {
    fn program(&self) -> &'static str {
        "ln"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-sf".to_string(),
            format!("/usr/share/zoneinfo/{}", self.timezone),
            "/etc/localtime".to_string(),
        ]
    }
}

/// `hwclock --systohc`
#[derive(Debug, Clone, Default)]
pub struct Hwclock;

impl ToolArgs for Hwclock {
    fn program(&self) -> &'static str {
        "hwclock"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["--systohc".to_string()]
    }
}

/// `locale-gen`
#[derive(Debug, Clone, Default)]
pub struct LocaleGen;

impl ToolArgs for LocaleGen {
    fn program(&self) -> &'static str {
        "locale-gen"
    }

    fn to_cli_args(&self) -> Vec<String> {
        Vec::new()
    }
}

/// `chpasswd`, fed `user:password` on stdin.
#[derive(Debug, Clone)]
pub struct Chpasswd {
    pub user: String,
    pub password: Secret,
}

impl ToolArgs for Chpasswd {
    fn program(&self) -> &'static str {
        "chpasswd"
    }

    fn to_cli_args(&self) -> Vec<String> {
        Vec::new()
    }

    fn stdin(&self) -> Option<Secret> {
        Some(Secret::new(format!(
            "{}:{}\n",
            self.user,
            self.password.expose()
        )))
    }
}

/// `mkinitcpio -P`: regenerates every preset.
#[derive(Debug, Clone, Default)]
pub struct Mkinitcpio;

impl ToolArgs for Mkinitcpio {
    fn program(&self) -> &'static str {
        "mkinitcpio"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-P".to_string()]
    }
}

/// `bootctl --esp-path=<esp> install`
#[derive(Debug, Clone)]
pub struct BootctlInstall {
    pub esp_path: PathBuf,
}

impl ToolArgs for BootctlInstall {
    fn program(&self) -> &'static str {
        "bootctl"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            format!("--esp-path={}", self.esp_path.display()),
            "install".to_string(),
        ]
    }
}

/// `grub-install --target=x86_64-efi ...`
#[derive(Debug, Clone)]
pub struct GrubInstall {
    pub efi_directory: PathBuf,
    pub bootloader_id: String,
}

impl ToolArgs for GrubInstall {
    fn program(&self) -> &'static str {
        "grub-install"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--target=x86_64-efi".to_string(),
            format!("--efi-directory={}", self.efi_directory.display()),
            format!("--bootloader-id={}", self.bootloader_id),
        ]
    }
}

/// `grub-mkconfig -o <output>`
#[derive(Debug, Clone)]
pub struct GrubMkconfig {
    pub output: PathBuf,
}

impl ToolArgs for GrubMkconfig {
    fn program(&self) -> &'static str {
        "grub-mkconfig"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-o".to_string(), self.output.display().to_string()]
    }
}

/// `systemctl enable <unit>`
#[derive(Debug, Clone)]
pub struct SystemctlEnable {
    pub unit: String,
}

impl ToolArgs for SystemctlEnable {
    fn program(&self) -> &'static str {
        "systemctl"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["enable".to_string(), self.unit.clone()]
    }
}
