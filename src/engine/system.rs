//! System Configurator
//!
//! Timezone, hardware clock, locale, console keymap, hostname, hosts file
//! and root password inside the freshly bootstrapped target. Runs after
//! pacstrap and before the initramfs is regenerated, since `keymap` and
//! `consolefont` hooks read `/etc/vconsole.conf`.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::ValidatedConfig;
use crate::error::ConfigureError;
use crate::host::{Host, run_checked, write_checked};
use crate::tools::system::{Chpasswd, Hwclock, InChroot, LinkLocaltime, LocaleGen, TimezoneLookup};

use super::mount::TARGET_ROOT;

pub const TIMEZONE_URL: &str = "https://ipapi.co/timezone";
pub const FALLBACK_TIMEZONE: &str = "UTC";
const TIMEZONE_LOOKUP_TIMEOUT_SECS: u32 = 10;

fn target(path: &str) -> PathBuf {
    Path::new(TARGET_ROOT).join(path)
}

/// Zone names look like `Europe/Berlin` or `UTC`.
fn is_plausible_timezone(zone: &str) -> bool {
    !zone.is_empty()
        && !zone.contains("..")
        && !zone.starts_with('/')
        && zone
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '+'))
}

/// The configured timezone, or a geo-IP lookup when none was given.
///
/// A failed or nonsensical lookup falls back to UTC.
pub fn resolve_timezone(host: &mut dyn Host, config: &ValidatedConfig) -> String {
    if let Some(zone) = config.timezone() {
        return zone.to_string();
    }

    let lookup = TimezoneLookup {
        url: TIMEZONE_URL.to_string(),
        timeout_secs: TIMEZONE_LOOKUP_TIMEOUT_SECS,
    };
    match run_checked(host, "timezone lookup", &lookup) {
        Ok(output) => {
            let zone = output.stdout.trim();
            if is_plausible_timezone(zone) {
                info!("Detected timezone {}", zone);
                zone.to_string()
            } else {
                warn!("Timezone lookup returned {:?}, using {}", zone, FALLBACK_TIMEZONE);
                FALLBACK_TIMEZONE.to_string()
            }
        }
        Err(e) => {
            warn!("Timezone lookup failed ({}), using {}", e, FALLBACK_TIMEZONE);
            FALLBACK_TIMEZONE.to_string()
        }
    }
}

pub fn render_locale_gen(locale: &str) -> String {
    format!("{}.UTF-8 UTF-8\n", locale)
}

pub fn render_locale_conf(locale: &str) -> String {
    format!("LANG={}.UTF-8\n", locale)
}

pub fn render_vconsole_conf(keymap: &str) -> String {
    format!("KEYMAP={}\n", keymap)
}

pub fn render_hosts(hostname: &str) -> String {
    format!(
        "127.0.0.1 localhost\n::1 localhost\n127.0.1.1 {0}.localdomain {0}\n",
        hostname
    )
}

/// Configure the target system mounted at `/mnt`.
pub fn configure_system(
    host: &mut dyn Host,
    config: &ValidatedConfig,
    timezone: &str,
) -> Result<(), ConfigureError> {
    info!(
        "Configuring target (timezone={}, locale={}, keymap={}, hostname={})",
        timezone,
        config.locale(),
        config.keymap(),
        config.hostname()
    );

    run_checked(
        host,
        "timezone",
        &InChroot::new(
            TARGET_ROOT,
            LinkLocaltime {
                timezone: timezone.to_string(),
            },
        ),
    )?;
    run_checked(host, "hwclock", &InChroot::new(TARGET_ROOT, Hwclock))?;

    write_checked(
        host,
        "locale",
        &target("etc/locale.gen"),
        &render_locale_gen(config.locale()),
    )?;
    run_checked(host, "locale-gen", &InChroot::new(TARGET_ROOT, LocaleGen))?;
    write_checked(
        host,
        "locale",
        &target("etc/locale.conf"),
        &render_locale_conf(config.locale()),
    )?;

    write_checked(
        host,
        "keymap",
        &target("etc/vconsole.conf"),
        &render_vconsole_conf(config.keymap()),
    )?;
    write_checked(
        host,
        "hostname",
        &target("etc/hostname"),
        &format!("{}\n", config.hostname()),
    )?;
    write_checked(host, "hosts", &target("etc/hosts"), &render_hosts(config.hostname()))?;

    run_checked(
        host,
        "root password",
        &InChroot::new(
            TARGET_ROOT,
            Chpasswd {
                user: "root".to_string(),
                password: config.root_password().clone(),
            },
        ),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstallConfig;
    use crate::host::{Action, RecordingHost};
    use crate::types::Secret;

    fn config(timezone: Option<&str>) -> ValidatedConfig {
        InstallConfig {
            root_password: Secret::new("toor"),
            locale: "en-US".to_string(),
            keymap: "br".to_string(),
            timezone: timezone.map(str::to_string),
            hostname: "box".to_string(),
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn test_configured_timezone_skips_lookup() {
        let mut host = RecordingHost::new();
        let zone = resolve_timezone(&mut host, &config(Some("America/Sao_Paulo")));
        assert_eq!(zone, "America/Sao_Paulo");
        assert!(host.commands().is_empty());
    }

    #[test]
    fn test_timezone_lookup() {
        let mut host = RecordingHost::new();
        assert_eq!(resolve_timezone(&mut host, &config(None)), "Europe/Berlin");
        assert_eq!(
            host.commands(),
            vec!["curl -fsS --max-time 10 https://ipapi.co/timezone"]
        );
    }

    #[test]
    fn test_timezone_lookup_falls_back_to_utc() {
        let mut host = RecordingHost::new().fail_when("curl");
        assert_eq!(resolve_timezone(&mut host, &config(None)), "UTC");

        let mut host = RecordingHost::new().with_output("curl", "<html>rate limited</html>");
        assert_eq!(resolve_timezone(&mut host, &config(None)), "UTC");
    }

    #[test]
    fn test_rendered_files() {
        assert_eq!(render_locale_gen("en_US"), "en_US.UTF-8 UTF-8\n");
        assert_eq!(render_locale_conf("en_US"), "LANG=en_US.UTF-8\n");
        assert_eq!(render_vconsole_conf("us"), "KEYMAP=us\n");
        assert_eq!(
            render_hosts("warding"),
            "127.0.0.1 localhost\n::1 localhost\n127.0.1.1 warding.localdomain warding\n"
        );
    }

    #[test]
    fn test_configure_system_writes_target_files() {
        let mut host = RecordingHost::new();
        configure_system(&mut host, &config(None), "Europe/Berlin").unwrap();

        assert_eq!(host.file("/mnt/etc/locale.gen"), Some("en_US.UTF-8 UTF-8\n"));
        assert_eq!(host.file("/mnt/etc/vconsole.conf"), Some("KEYMAP=br\n"));
        assert_eq!(host.file("/mnt/etc/hostname"), Some("box\n"));
        assert_eq!(
            host.commands(),
            vec![
                "arch-chroot /mnt ln -sf /usr/share/zoneinfo/Europe/Berlin /etc/localtime",
                "arch-chroot /mnt hwclock --systohc",
                "arch-chroot /mnt locale-gen",
                "arch-chroot /mnt chpasswd < <secret>",
            ]
        );
    }

    #[test]
    fn test_password_only_on_stdin() {
        let mut host = RecordingHost::new();
        configure_system(&mut host, &config(None), "UTC").unwrap();

        let chpasswd = host.actions().iter().find_map(|action| match action {
            Action::Command { line, stdin, .. } if line.contains("chpasswd") => {
                Some((line.clone(), stdin.clone()))
            }
            _ => None,
        });
        let (line, stdin) = chpasswd.unwrap();
        assert!(!line.contains("toor"));
        assert_eq!(stdin, Some(Secret::new("root:toor\n")));
    }
}
