//! Error handling module for Warding
//!
//! Every stage of the provisioning pipeline reports failures through one of
//! the typed errors below. `ValidationError` and `PreconditionError` are pure
//! rejections raised before any disk mutation; everything from `DeviceError`
//! onward means the target disk has already been touched.

use std::path::PathBuf;

use thiserror::Error;

use crate::install_state::InstallTransitionError;
use crate::types::PartitionScheme;

/// A single violated configuration invariant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigViolation {
    #[error("boot size {value} MiB is outside {min}-{max} MiB")]
    BootSizeOutOfRange { value: u32, min: u32, max: u32 },

    #[error("swap size {value} MiB is outside {min}-{max} MiB")]
    SwapSizeOutOfRange { value: u32, min: u32, max: u32 },

    #[error("home size {value} MiB is outside {min}-{max} MiB")]
    HomeSizeOutOfRange { value: u32, min: u32, max: u32 },

    #[error("partition scheme {scheme} requires a home size")]
    HomeSizeMissing { scheme: PartitionScheme },

    #[error("partition scheme {scheme} has no home volume, but a home size was given")]
    HomeSizeUnexpected { scheme: PartitionScheme },

    #[error("encryption is enabled but no encryption key was provided")]
    EncryptionKeyMissing,

    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("{field} '{value}' must be a single word without spaces or line breaks")]
    NotAWord { field: &'static str, value: String },

    #[error("invalid target disk '{0}': must be a device path under /dev/")]
    InvalidDisk(String),

    #[error("invalid hostname '{0}': use 1-63 letters, digits or hyphens")]
    InvalidHostname(String),

    #[error("root password must not contain line breaks")]
    PasswordContainsNewline,
}

/// Configuration rejected before any destructive command ran.
///
/// Carries every violated invariant, not just the first one found.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid configuration: {}", join_violations(.violations))]
pub struct ValidationError {
    pub violations: Vec<ConfigViolation>,
}

impl ValidationError {
    /// Returns true if `violation` is among the reported violations.
    pub fn contains(&self, violation: &ConfigViolation) -> bool {
        self.violations.contains(violation)
    }
}

fn join_violations(violations: &[ConfigViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The running environment cannot host a destructive install.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("precondition failed: {reason}")]
pub struct PreconditionError {
    pub reason: String,
}

impl PreconditionError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// An external command failed or exited non-zero.
///
/// Stage modules convert this into the error type of their stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{step}: {cause}")]
pub struct StepFailure {
    pub step: String,
    pub cause: String,
}

impl StepFailure {
    pub fn new(step: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            cause: cause.into(),
        }
    }
}

/// A partitioning, LUKS, LVM or mkfs command failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("device error during {step}: {cause}")]
pub struct DeviceError {
    pub step: String,
    pub cause: String,
}

/// Mounting, unmounting or creating a mount point failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("mount error during {step}: {cause}")]
pub struct MountError {
    pub step: String,
    pub cause: String,
}

/// Installing the bootloader or writing its entry failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("bootloader error during {step}: {cause}")]
pub struct BootloaderError {
    pub step: String,
    pub cause: String,
}

/// Bootstrapping or configuring the target system failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("configuration error during {step}: {cause}")]
pub struct ConfigureError {
    pub step: String,
    pub cause: String,
}

macro_rules! from_step_failure {
    ($($ty:ident),+ $(,)?) => {
        $(
            impl From<StepFailure> for $ty {
                fn from(failure: StepFailure) -> Self {
                    Self {
                        step: failure.step,
                        cause: failure.cause,
                    }
                }
            }
        )+
    };
}

from_step_failure!(DeviceError, MountError, BootloaderError, ConfigureError);

/// Error reported by the pipeline for the stage that failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Mount(#[from] MountError),

    #[error(transparent)]
    Bootloader(#[from] BootloaderError),

    #[error(transparent)]
    Configure(#[from] ConfigureError),

    #[error(transparent)]
    Transition(#[from] InstallTransitionError),

    /// A termination signal arrived; the pipeline stopped between stages.
    #[error("installation interrupted by signal")]
    Interrupted,
}

/// Errors loading or saving a configuration file.
#[derive(Error, Debug)]
pub enum WardingError {
    /// The file could not be read or written
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration JSON
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl WardingError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for configuration file operations
pub type Result<T> = std::result::Result<T, WardingError>;
