//! Installation configuration: loading, saving and validation.
//!
//! `InstallConfig` is the raw, serde-loaded shape produced by whatever front
//! end collected the answers. `InstallConfig::validate` turns it into a
//! `ValidatedConfig`, which is immutable and is the only configuration type
//! the pipeline stages accept.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigViolation, Result, ValidationError, WardingError};
use crate::types::{Bootloader, PartitionScheme, Secret};

/// Inclusive bounds of the size sliders, in MiB.
pub const BOOT_SIZE_RANGE: (u32, u32) = (512, 4096);
pub const SWAP_SIZE_RANGE: (u32, u32) = (1024, 8192);
pub const HOME_SIZE_RANGE: (u32, u32) = (2048, 8192);

/// Encryption settings as written in the config file.
///
/// The presence of this object enables encryption. The key stays optional
/// here so that an enabled-but-keyless file can be loaded and then rejected
/// by validation instead of failing as a parse error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptionSettings {
    #[serde(default)]
    pub key: Option<Secret>,
}

/// Installation configuration that can be saved/loaded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Target block device, e.g. `/dev/sda` or `/dev/nvme0n1`
    #[serde(default = "default_disk")]
    pub disk: String,

    // Disk & Storage
    pub boot_size_mib: u32,
    pub swap_size_mib: u32,
    #[serde(default)]
    pub home_size_mib: Option<u32>,
    #[serde(default)]
    pub partition_scheme: PartitionScheme,
    #[serde(default)]
    pub encryption: Option<EncryptionSettings>,

    // Boot configuration
    #[serde(default)]
    pub bootloader: Bootloader,

    // Locale & Time
    pub locale: String,
    pub keymap: String,
    #[serde(default)]
    pub timezone: Option<String>,

    // System
    pub root_password: Secret,
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Rank pacman mirrors with reflector before bootstrapping
    #[serde(default)]
    pub update_mirrors: bool,

    /// Reboot into the new system after a successful install
    #[serde(default = "default_reboot")]
    pub reboot: bool,
}

fn default_disk() -> String {
    "/dev/sda".to_string()
}

fn default_hostname() -> String {
    "warding".to_string()
}

fn default_reboot() -> bool {
    true
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            disk: default_disk(),
            boot_size_mib: 1024,
            swap_size_mib: 2048,
            home_size_mib: None,
            partition_scheme: PartitionScheme::RootOnly,
            encryption: None,
            bootloader: Bootloader::SystemdBoot,
            locale: "en_US".to_string(),
            keymap: "us".to_string(),
            timezone: None,
            root_password: Secret::new(""),
            hostname: default_hostname(),
            update_mirrors: false,
            reboot: true,
        }
    }
}

impl InstallConfig {
    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| WardingError::io(path, e))
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| WardingError::io(path, e))?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Whether the file asks for encryption, regardless of key presence.
    pub fn wants_encryption(&self) -> bool {
        self.encryption.is_some()
    }

    /// Validate every invariant and return the immutable configuration.
    ///
    /// All violations are collected; the error lists each of them.
    pub fn validate(self) -> std::result::Result<ValidatedConfig, ValidationError> {
        let mut violations = Vec::new();

        check_range(
            self.boot_size_mib,
            BOOT_SIZE_RANGE,
            &mut violations,
            |value, (min, max)| ConfigViolation::BootSizeOutOfRange { value, min, max },
        );
        check_range(
            self.swap_size_mib,
            SWAP_SIZE_RANGE,
            &mut violations,
            |value, (min, max)| ConfigViolation::SwapSizeOutOfRange { value, min, max },
        );

        let scheme = self.partition_scheme;
        match (scheme.has_home(), self.home_size_mib) {
            (true, Some(home)) => check_range(
                home,
                HOME_SIZE_RANGE,
                &mut violations,
                |value, (min, max)| ConfigViolation::HomeSizeOutOfRange { value, min, max },
            ),
            (true, None) => violations.push(ConfigViolation::HomeSizeMissing { scheme }),
            (false, Some(_)) => violations.push(ConfigViolation::HomeSizeUnexpected { scheme }),
            (false, None) => {}
        }

        let encrypted = self.wants_encryption();
        let key = self.encryption.as_ref().and_then(|e| e.key.clone());
        if encrypted && key.as_ref().is_none_or(Secret::is_blank) {
            violations.push(ConfigViolation::EncryptionKeyMissing);
        }

        let disk = self.disk.trim();
        if !disk.starts_with("/dev/") || disk.len() <= "/dev/".len() {
            violations.push(ConfigViolation::InvalidDisk(self.disk.clone()));
        }

        check_word("locale", &self.locale, &mut violations);
        check_word("keymap", &self.keymap, &mut violations);
        if self.root_password.is_blank() {
            violations.push(ConfigViolation::EmptyField("root password"));
        } else if self.root_password.expose().contains(['\n', '\r']) {
            violations.push(ConfigViolation::PasswordContainsNewline);
        }
        if self
            .timezone
            .as_deref()
            .is_some_and(|tz| tz.trim().is_empty())
        {
            violations.push(ConfigViolation::EmptyField("timezone"));
        }
        if !is_valid_hostname(&self.hostname) {
            violations.push(ConfigViolation::InvalidHostname(self.hostname.clone()));
        }

        if !violations.is_empty() {
            return Err(ValidationError { violations });
        }

        Ok(ValidatedConfig {
            disk: PathBuf::from(disk),
            boot_size_mib: self.boot_size_mib,
            swap_size_mib: self.swap_size_mib,
            home_size_mib: self.home_size_mib,
            scheme,
            encryption_key: key,
            bootloader: self.bootloader,
            locale: normalize_locale(&self.locale),
            keymap: self.keymap.trim().to_string(),
            timezone: self.timezone.map(|tz| tz.trim().to_string()),
            root_password: self.root_password.clone(),
            hostname: self.hostname.trim().to_string(),
            update_mirrors: self.update_mirrors,
            reboot: self.reboot,
        })
    }
}

/// `value` ends up as a line of a config file in the target, so it must be
/// one non-empty token.
fn check_word(field: &'static str, value: &str, violations: &mut Vec<ConfigViolation>) {
    let value = value.trim();
    if value.is_empty() {
        violations.push(ConfigViolation::EmptyField(field));
    } else if value.contains(|c: char| c.is_whitespace() || c.is_control()) {
        violations.push(ConfigViolation::NotAWord {
            field,
            value: value.to_string(),
        });
    }
}

fn check_range(
    value: u32,
    (min, max): (u32, u32),
    violations: &mut Vec<ConfigViolation>,
    violation: impl FnOnce(u32, (u32, u32)) -> ConfigViolation,
) {
    if !(min..=max).contains(&value) {
        violations.push(violation(value, (min, max)));
    }
}

fn is_valid_hostname(hostname: &str) -> bool {
    let hostname = hostname.trim();
    !hostname.is_empty()
        && hostname.len() <= 63
        && !hostname.starts_with('-')
        && !hostname.ends_with('-')
        && hostname
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// `pt-BR` and `de_DE.UTF-8` both become glibc's `pt_BR` / `de_DE`.
fn normalize_locale(locale: &str) -> String {
    let locale = locale.trim();
    let name = locale
        .strip_suffix(".UTF-8")
        .or_else(|| locale.strip_suffix(".utf8"))
        .unwrap_or(locale);
    name.replace('-', "_")
}

/// Configuration that passed validation. Never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    disk: PathBuf,
    boot_size_mib: u32,
    swap_size_mib: u32,
    home_size_mib: Option<u32>,
    scheme: PartitionScheme,
    encryption_key: Option<Secret>,
    bootloader: Bootloader,
    locale: String,
    keymap: String,
    timezone: Option<String>,
    root_password: Secret,
    hostname: String,
    update_mirrors: bool,
    reboot: bool,
}

impl ValidatedConfig {
    pub fn disk(&self) -> &Path {
        &self.disk
    }

    pub fn boot_size_mib(&self) -> u32 {
        self.boot_size_mib
    }

    pub fn swap_size_mib(&self) -> u32 {
        self.swap_size_mib
    }

    /// `Some` exactly when the scheme is `RootAndHome`.
    pub fn home_size_mib(&self) -> Option<u32> {
        self.home_size_mib
    }

    pub fn scheme(&self) -> PartitionScheme {
        self.scheme
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption_key.is_some()
    }

    pub fn encryption_key(&self) -> Option<&Secret> {
        self.encryption_key.as_ref()
    }

    pub fn bootloader(&self) -> Bootloader {
        self.bootloader
    }

    /// Locale without any `.UTF-8` suffix, e.g. `en_US`.
    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn keymap(&self) -> &str {
        &self.keymap
    }

    pub fn timezone(&self) -> Option<&str> {
        self.timezone.as_deref()
    }

    pub fn root_password(&self) -> &Secret {
        &self.root_password
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn update_mirrors(&self) -> bool {
        self.update_mirrors
    }

    pub fn reboot(&self) -> bool {
        self.reboot
    }

    /// Smallest disk that fits the ESP, swap, home and a usable root.
    pub fn required_disk_mib(&self, min_root_mib: u32) -> u64 {
        u64::from(self.boot_size_mib)
            + u64::from(self.swap_size_mib)
            + u64::from(self.home_size_mib.unwrap_or(0))
            + u64::from(min_root_mib)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_config() -> InstallConfig {
        InstallConfig {
            root_password: Secret::new("rootpass"),
            ..Default::default()
        }
    }

    #[test]
    fn test_validation_valid_config() {
        let config = create_test_config().validate().expect("valid config");
        assert_eq!(config.disk(), Path::new("/dev/sda"));
        assert!(!config.is_encrypted());
        assert_eq!(config.home_size_mib(), None);
    }

    #[test]
    fn test_encryption_without_key_is_rejected() {
        let mut config = create_test_config();
        config.encryption = Some(EncryptionSettings { key: None });
        let err = config.validate().unwrap_err();
        assert_eq!(err.violations, vec![ConfigViolation::EncryptionKeyMissing]);
    }

    #[test]
    fn test_encryption_with_blank_key_is_rejected() {
        let mut config = create_test_config();
        config.encryption = Some(EncryptionSettings {
            key: Some(Secret::new("   ")),
        });
        assert!(config.validate().unwrap_err().contains(&ConfigViolation::EncryptionKeyMissing));
    }

    #[test]
    fn test_every_bootloader_scheme_and_encryption_combination_validates() {
        for bootloader in [Bootloader::SystemdBoot, Bootloader::Grub] {
            for home in [None, Some(4096)] {
                for key in [None, Some("hunter2")] {
                    let config = InstallConfig {
                        bootloader,
                        partition_scheme: if home.is_some() {
                            PartitionScheme::RootAndHome
                        } else {
                            PartitionScheme::RootOnly
                        },
                        home_size_mib: home,
                        encryption: key.map(|k| EncryptionSettings {
                            key: Some(Secret::new(k)),
                        }),
                        ..create_test_config()
                    };
                    let validated = config.validate().unwrap();
                    assert_eq!(validated.bootloader(), bootloader);
                    assert_eq!(validated.is_encrypted(), key.is_some());
                }
            }
        }
    }

    #[test]
    fn test_locale_and_keymap_must_be_single_words() {
        let config = InstallConfig {
            locale: "en_US\nLANG=C".to_string(),
            keymap: "de latin1".to_string(),
            ..create_test_config()
        };
        let err = config.validate().unwrap_err();
        assert!(err.contains(&ConfigViolation::NotAWord {
            field: "locale",
            value: "en_US\nLANG=C".to_string(),
        }));
        assert!(err.contains(&ConfigViolation::NotAWord {
            field: "keymap",
            value: "de latin1".to_string(),
        }));

        let config = InstallConfig {
            locale: "  de_DE.UTF-8 ".to_string(),
            keymap: " de-latin1\n".to_string(),
            ..create_test_config()
        };
        let validated = config.validate().unwrap();
        assert_eq!(validated.locale(), "de_DE");
        assert_eq!(validated.keymap(), "de-latin1");
    }

    #[test]
    fn test_root_and_home_requires_home_size() {
        let mut config = create_test_config();
        config.partition_scheme = PartitionScheme::RootAndHome;
        let err = config.validate().unwrap_err();
        assert!(err.contains(&ConfigViolation::HomeSizeMissing {
            scheme: PartitionScheme::RootAndHome
        }));
    }

    #[test]
    fn test_root_only_rejects_home_size() {
        let mut config = create_test_config();
        config.home_size_mib = Some(4096);
        let err = config.validate().unwrap_err();
        assert!(err.contains(&ConfigViolation::HomeSizeUnexpected {
            scheme: PartitionScheme::RootOnly
        }));
    }

    #[test]
    fn test_every_violation_is_reported() {
        let config = InstallConfig {
            boot_size_mib: 100,
            swap_size_mib: 99_999,
            partition_scheme: PartitionScheme::RootAndHome,
            encryption: Some(EncryptionSettings::default()),
            locale: String::new(),
            disk: "sda".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();

        assert!(err.contains(&ConfigViolation::BootSizeOutOfRange {
            value: 100,
            min: 512,
            max: 4096
        }));
        assert!(err.contains(&ConfigViolation::SwapSizeOutOfRange {
            value: 99_999,
            min: 1024,
            max: 8192
        }));
        assert!(err.contains(&ConfigViolation::EncryptionKeyMissing));
        assert!(err.contains(&ConfigViolation::EmptyField("locale")));
        assert!(err.contains(&ConfigViolation::EmptyField("root password")));
        assert!(err.contains(&ConfigViolation::InvalidDisk("sda".to_string())));
        assert_eq!(err.violations.len(), 7);
    }

    #[test]
    fn test_size_bounds_are_inclusive() {
        let mut config = create_test_config();
        config.boot_size_mib = 4096;
        config.swap_size_mib = 1024;
        config.partition_scheme = PartitionScheme::RootAndHome;
        config.home_size_mib = Some(8192);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_password_newline_rejected() {
        let mut config = create_test_config();
        config.root_password = Secret::new("pass\nword");
        let err = config.validate().unwrap_err();
        assert!(err.contains(&ConfigViolation::PasswordContainsNewline));
    }

    #[test]
    fn test_empty_timezone_rejected() {
        let mut config = create_test_config();
        config.timezone = Some(" ".to_string());
        assert!(config.validate().unwrap_err().contains(&ConfigViolation::EmptyField("timezone")));
    }

    #[test]
    fn test_hostname_shape() {
        assert!(is_valid_hostname("warding"));
        assert!(is_valid_hostname("my-box-01"));
        assert!(!is_valid_hostname("-leading"));
        assert!(!is_valid_hostname("under_score"));
        assert!(!is_valid_hostname(&"a".repeat(64)));
    }

    #[test]
    fn test_locale_suffix_is_stripped() {
        let mut config = create_test_config();
        config.locale = "de_DE.UTF-8".to_string();
        assert_eq!(config.validate().unwrap().locale(), "de_DE");
    }

    #[test]
    fn test_locale_language_tag_is_normalized() {
        let mut config = create_test_config();
        config.locale = "pt-BR".to_string();
        assert_eq!(config.validate().unwrap().locale(), "pt_BR");
    }

    #[test]
    fn test_required_disk_size() {
        let mut config = create_test_config();
        config.partition_scheme = PartitionScheme::RootAndHome;
        config.home_size_mib = Some(4096);
        let config = config.validate().unwrap();
        assert_eq!(config.required_disk_mib(2048), 1024 + 2048 + 4096 + 2048);
    }

    #[test]
    fn test_load_minimal_json_uses_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(
                br#"{
                    "boot_size_mib": 1024,
                    "swap_size_mib": 2048,
                    "locale": "en_US",
                    "keymap": "us",
                    "root_password": "toor"
                }"#,
            )
            .unwrap();
        temp_file.flush().unwrap();

        let config = InstallConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.disk, "/dev/sda");
        assert_eq!(config.hostname, "warding");
        assert_eq!(config.partition_scheme, PartitionScheme::RootOnly);
        assert_eq!(config.bootloader, Bootloader::SystemdBoot);
        assert!(config.reboot);
        assert!(!config.wants_encryption());
    }

    #[test]
    fn test_load_keyless_encryption_then_reject() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(
                br#"{
                    "boot_size_mib": 1024,
                    "swap_size_mib": 2048,
                    "encryption": {},
                    "locale": "en_US",
                    "keymap": "us",
                    "root_password": "toor"
                }"#,
            )
            .unwrap();
        temp_file.flush().unwrap();

        let config = InstallConfig::load_from_file(temp_file.path()).unwrap();
        assert!(config.wants_encryption());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let mut original = create_test_config();
        original.bootloader = Bootloader::Grub;
        original.encryption = Some(EncryptionSettings {
            key: Some(Secret::new("hunter2")),
        });
        let temp_file = NamedTempFile::new().unwrap();

        original.save_to_file(temp_file.path()).unwrap();
        let loaded = InstallConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(loaded.bootloader, Bootloader::Grub);
        assert_eq!(
            loaded.encryption.and_then(|e| e.key),
            Some(Secret::new("hunter2"))
        );
    }

    #[test]
    fn test_load_nonexistent_file() {
        let err = InstallConfig::load_from_file("/nonexistent/path").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/path"));
    }

    #[test]
    fn test_load_invalid_json() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"{ invalid json }").unwrap();
        temp_file.flush().unwrap();
        assert!(matches!(
            InstallConfig::load_from_file(temp_file.path()),
            Err(WardingError::Json(_))
        ));
    }
}
