//! Post-install steps
//!
//! Collaborators that run once the target is bootable: the base system is
//! installed, the initramfs is built and the bootloader is in place. They
//! receive the mounted target and may assume it is committed to disk.
//!
//! A step's packages are added to the `pacstrap` set, so a step only has to
//! configure what it brings.
//!
//! # Failure Policy
//!
//! A failing step fails the run at the `PostInstall` stage. Later steps do
//! not run and the target is unwound like any other failed stage.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::ConfigureError;
use crate::host::{Host, run_checked};
use crate::tools::system::{InChroot, SystemctlEnable};

/// The installed system as post-install steps see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSystem {
    /// Mount point of the target root, e.g. `/mnt`.
    pub root: PathBuf,
    pub hostname: String,
    pub encrypted: bool,
}

impl TargetSystem {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

pub trait PostInstallStep: fmt::Debug {
    /// Short name used in logs and in the failure's step.
    fn name(&self) -> &str;

    /// Packages `pacstrap` must install for this step.
    fn packages(&self) -> Vec<String> {
        Vec::new()
    }

    fn run(&self, host: &mut dyn Host, target: &TargetSystem) -> Result<(), ConfigureError>;
}

/// `systemctl enable` a list of units inside the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableServices {
    pub units: Vec<String>,
    /// Packages providing the units.
    pub provided_by: Vec<String>,
}

impl EnableServices {
    /// DHCP on every interface, so the first boot has a network.
    pub fn networking() -> Self {
        Self {
            units: vec!["dhcpcd.service".to_string()],
            provided_by: vec!["dhcpcd".to_string()],
        }
    }
}

impl PostInstallStep for EnableServices {
    fn name(&self) -> &str {
        "enable services"
    }

    fn packages(&self) -> Vec<String> {
        self.provided_by.clone()
    }

    fn run(&self, host: &mut dyn Host, target: &TargetSystem) -> Result<(), ConfigureError> {
        for unit in &self.units {
            info!("Enabling {} in {}", unit, target.root().display());
            run_checked(
                host,
                &format!("{}: {}", self.name(), unit),
                &InChroot::new(target.root(), SystemctlEnable { unit: unit.clone() }),
            )?;
        }
        Ok(())
    }
}

/// Packages of every step, in step order.
pub fn step_packages(steps: &[Box<dyn PostInstallStep>]) -> Vec<String> {
    steps.iter().flat_map(|step| step.packages()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RecordingHost;

    fn target() -> TargetSystem {
        TargetSystem {
            root: PathBuf::from("/mnt"),
            hostname: "warding".to_string(),
            encrypted: false,
        }
    }

    #[test]
    fn test_enable_services_in_chroot() {
        let mut host = RecordingHost::new();
        EnableServices::networking().run(&mut host, &target()).unwrap();
        assert_eq!(
            host.commands(),
            vec!["arch-chroot /mnt systemctl enable dhcpcd.service"]
        );
    }

    #[test]
    fn test_failure_names_the_unit() {
        let mut host = RecordingHost::new().fail_when("systemctl enable sshd");
        let step = EnableServices {
            units: vec!["sshd.service".to_string(), "dhcpcd.service".to_string()],
            provided_by: vec!["openssh".to_string()],
        };
        let err = step.run(&mut host, &target()).unwrap_err();
        assert_eq!(err.step, "enable services: sshd.service");
        assert_eq!(host.commands().len(), 1);
    }

    #[test]
    fn test_step_packages() {
        let steps: Vec<Box<dyn PostInstallStep>> = vec![Box::new(EnableServices::networking())];
        assert_eq!(step_packages(&steps), vec!["dhcpcd"]);
    }
}
