//! Initramfs Configurator
//!
//! Picks the mkinitcpio HOOKS line for the storage layout and rewrites it in
//! the target's `/etc/mkinitcpio.conf`. The busybox-based hooks are used
//! (`udev`, `keymap`, `encrypt`) because the `cryptdevice=` kernel parameter
//! is only understood by the `encrypt` hook, not by `sd-encrypt`.
//!
//! CPU microcode is not loaded from a hook. The bootloader lists the
//! `*-ucode.img` image as its own initrd ahead of the main image.
//!
//! Ordering that must hold: `keyboard` and `keymap` before `encrypt` (the
//! passphrase prompt needs them), `encrypt` before `lvm2`, and `lvm2` before
//! `filesystems`.

use std::path::Path;

use strum::Display;
use tracing::info;

use crate::error::ConfigureError;
use crate::host::{Host, read_checked, run_checked, write_checked};
use crate::tools::system::{InChroot, Mkinitcpio};

use super::mount::TARGET_ROOT;

const MKINITCPIO_CONF: &str = "etc/mkinitcpio.conf";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Hook {
    Base,
    Udev,
    Autodetect,
    Modconf,
    Kms,
    Keyboard,
    Keymap,
    Consolefont,
    Block,
    Encrypt,
    Lvm2,
    Filesystems,
    Fsck,
}

/// The hook list for an encrypted or plain LVM root.
pub fn hooks(encrypted: bool) -> Vec<Hook> {
    let mut hooks = vec![
        Hook::Base,
        Hook::Udev,
        Hook::Autodetect,
        Hook::Modconf,
        Hook::Kms,
        Hook::Keyboard,
        Hook::Keymap,
        Hook::Consolefont,
        Hook::Block,
    ];
    if encrypted {
        hooks.push(Hook::Encrypt);
    }
    hooks.extend([Hook::Lvm2, Hook::Filesystems, Hook::Fsck]);
    hooks
}

/// `HOOKS=(base udev ...)`
pub fn hooks_line(hooks: &[Hook]) -> String {
    let names: Vec<String> = hooks.iter().map(ToString::to_string).collect();
    format!("HOOKS=({})", names.join(" "))
}

/// Replace every active `HOOKS=` line in `conf`. Commented lines are left
/// alone. Fails if the file has no active HOOKS line.
pub fn apply_hooks(conf: &str, hooks: &[Hook]) -> Result<String, ConfigureError> {
    let line = hooks_line(hooks);
    let mut replaced = false;

    let mut out: Vec<&str> = Vec::new();
    for current in conf.lines() {
        if current.trim_start().starts_with("HOOKS=") {
            out.push(&line);
            replaced = true;
        } else {
            out.push(current);
        }
    }

    if !replaced {
        return Err(ConfigureError {
            step: "mkinitcpio.conf".to_string(),
            cause: "no active HOOKS= line found".to_string(),
        });
    }

    let mut text = out.join("\n");
    text.push('\n');
    Ok(text)
}

/// Rewrite the target's HOOKS line and regenerate every initramfs preset.
pub fn configure(host: &mut dyn Host, encrypted: bool) -> Result<(), ConfigureError> {
    let path = Path::new(TARGET_ROOT).join(MKINITCPIO_CONF);
    let hooks = hooks(encrypted);
    info!("Setting {}", hooks_line(&hooks));

    let conf = read_checked(host, "mkinitcpio.conf", &path)?;
    let updated = apply_hooks(&conf, &hooks)?;
    write_checked(host, "mkinitcpio.conf", &path, &updated)?;

    run_checked(host, "mkinitcpio", &InChroot::new(TARGET_ROOT, Mkinitcpio))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{RecordingHost, STOCK_MKINITCPIO_CONF};

    fn position(hooks: &[Hook], hook: Hook) -> usize {
        hooks.iter().position(|h| *h == hook).unwrap()
    }

    #[test]
    fn test_encrypted_hook_order() {
        let hooks = hooks(true);
        assert!(position(&hooks, Hook::Keyboard) < position(&hooks, Hook::Encrypt));
        assert!(position(&hooks, Hook::Keymap) < position(&hooks, Hook::Encrypt));
        assert!(position(&hooks, Hook::Block) < position(&hooks, Hook::Encrypt));
        assert!(position(&hooks, Hook::Encrypt) < position(&hooks, Hook::Lvm2));
        assert!(position(&hooks, Hook::Lvm2) < position(&hooks, Hook::Filesystems));
    }

    #[test]
    fn test_plain_has_no_encrypt() {
        let hooks = hooks(false);
        assert!(!hooks.contains(&Hook::Encrypt));
        assert!(position(&hooks, Hook::Lvm2) < position(&hooks, Hook::Filesystems));
    }

    #[test]
    fn test_hooks_line() {
        assert_eq!(
            hooks_line(&hooks(true)),
            "HOOKS=(base udev autodetect modconf kms keyboard keymap \
             consolefont block encrypt lvm2 filesystems fsck)"
        );
    }

    #[test]
    fn test_microcode_is_not_an_early_hook() {
        for encrypted in [false, true] {
            let line = hooks_line(&hooks(encrypted));
            assert!(!line.contains("microcode"), "{}", line);
        }
    }

    #[test]
    fn test_apply_hooks_keeps_comments() {
        let updated = apply_hooks(STOCK_MKINITCPIO_CONF, &hooks(false)).unwrap();
        assert!(updated.contains("#    HOOKS=(base)"));
        assert!(updated.contains("\nHOOKS=(base udev autodetect"));
        assert!(!updated.contains("sd-vconsole"));
        assert!(updated.contains("MODULES=()"));
    }

    #[test]
    fn test_apply_hooks_without_hooks_line() {
        let err = apply_hooks("MODULES=()\n# HOOKS=(base)\n", &hooks(true)).unwrap_err();
        assert_eq!(err.step, "mkinitcpio.conf");
    }

    #[test]
    fn test_configure_writes_then_regenerates() {
        let mut host = RecordingHost::new();
        configure(&mut host, true).unwrap();

        assert!(host
            .file("/mnt/etc/mkinitcpio.conf")
            .unwrap()
            .contains("block encrypt lvm2 filesystems"));
        assert_eq!(host.commands(), vec!["arch-chroot /mnt mkinitcpio -P"]);
    }

    #[test]
    fn test_missing_conf_fails_before_mkinitcpio() {
        let mut host = RecordingHost::new().without_file("/mnt/etc/mkinitcpio.conf");
        assert!(configure(&mut host, false).is_err());
        assert!(host.commands().is_empty());
    }
}
