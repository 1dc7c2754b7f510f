//! Type-safe arguments for LUKS2 via `cryptsetup`.
//!
//! # Security Model
//!
//! The passphrase is never passed on the command line, where it would be
//! visible in `ps aux` and in the command log. Every command that needs it
//! reads it from standard input through `--key-file -`; the host pipes the
//! `Secret` in and drops it afterwards.
//!
//! # LUKS2 Defaults
//!
//! - Cipher: aes-xts-plain64 with a 512-bit key (AES-256 in XTS mode)
//! - Key derivation: cryptsetup's default for LUKS2 (argon2id)

use std::path::PathBuf;

use crate::tool_traits::ToolArgs;
use crate::types::Secret;

pub const LUKS_CIPHER: &str = "aes-xts-plain64";
pub const LUKS_KEY_SIZE_BITS: u32 = 512;

/// `cryptsetup luksFormat` on the LVM partition.
#[derive(Debug, Clone)]
pub struct LuksFormat {
    pub device: PathBuf,
    pub key: Secret,
}

impl ToolArgs for LuksFormat {
    fn program(&self) -> &'static str {
        "cryptsetup"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-q".to_string(),
            "luksFormat".to_string(),
            "--type".to_string(),
            "luks2".to_string(),
            "--cipher".to_string(),
            LUKS_CIPHER.to_string(),
            "--key-size".to_string(),
            LUKS_KEY_SIZE_BITS.to_string(),
            "--key-file".to_string(),
            "-".to_string(),
            self.device.display().to_string(),
        ]
    }

    fn stdin(&self) -> Option<Secret> {
        Some(self.key.clone())
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `cryptsetup open` mapping the container to `/dev/mapper/<name>`.
#[derive(Debug, Clone)]
pub struct LuksOpen {
    pub device: PathBuf,
    pub mapper_name: String,
    pub key: Secret,
}

impl ToolArgs for LuksOpen {
    fn program(&self) -> &'static str {
        "cryptsetup"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "open".to_string(),
            "--type".to_string(),
            "luks2".to_string(),
            "--key-file".to_string(),
            "-".to_string(),
            self.device.display().to_string(),
            self.mapper_name.clone(),
        ]
    }

    fn stdin(&self) -> Option<Secret> {
        Some(self.key.clone())
    }
}

/// `cryptsetup close <name>`
#[derive(Debug, Clone)]
pub struct LuksClose {
    pub mapper_name: String,
}

impl ToolArgs for LuksClose {
    fn program(&self) -> &'static str {
        "cryptsetup"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["close".to_string(), self.mapper_name.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luks_format_reads_key_from_stdin() {
        let args = LuksFormat {
            device: PathBuf::from("/dev/sda2"),
            key: Secret::new("correct horse"),
        };
        let cli = args.to_cli_args();

        assert!(cli.windows(2).any(|w| w == ["--key-file", "-"]));
        assert!(cli.windows(2).any(|w| w == ["--type", "luks2"]));
        assert_eq!(cli.last().map(String::as_str), Some("/dev/sda2"));
        assert!(!cli.iter().any(|a| a.contains("correct horse")));
        assert_eq!(args.stdin(), Some(Secret::new("correct horse")));
        assert!(args.is_destructive());
    }

    #[test]
    fn test_luks_open_maps_name() {
        let args = LuksOpen {
            device: PathBuf::from("/dev/nvme0n1p2"),
            mapper_name: "cryptlvm".into(),
            key: Secret::new("pw"),
        };
        assert_eq!(
            args.describe(),
            "cryptsetup open --type luks2 --key-file - /dev/nvme0n1p2 cryptlvm < <secret>"
        );
    }

    #[test]
    fn test_luks_close() {
        let args = LuksClose {
            mapper_name: "cryptlvm".into(),
        };
        assert_eq!(args.to_cli_args(), vec!["close", "cryptlvm"]);
        assert!(args.stdin().is_none());
    }
}
