//! Warding Library
//!
//! Provisions a bare disk into a bootable Arch Linux installation: a GPT
//! layout with an ESP, an LVM volume group on the rest of the disk
//! (optionally inside a LUKS2 container), ext4 filesystems, the initramfs
//! hooks and a bootloader entry that matches the storage stack.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod install_state;
pub mod pipeline;
pub mod plan;
pub mod postinstall;
pub mod preflight;
pub mod process_guard;
pub mod tool_traits;
pub mod tools;
pub mod types;

// Re-export main types for convenience
pub use config::{InstallConfig, ValidatedConfig};
pub use error::{StageError, ValidationError, WardingError};
pub use host::{Host, RecordingHost, SystemHost};
pub use install_state::{InstallStage, InstallTransitionError, InstallerContext};
pub use pipeline::{InstallReport, Outcome, Pipeline};
pub use postinstall::{EnableServices, PostInstallStep, TargetSystem};
pub use process_guard::{CommandProcessGroup, InterruptFlag};
pub use tool_traits::ToolArgs;
pub use types::{Bootloader, Filesystem, LvRole, Microcode, PartitionScheme, Secret};
