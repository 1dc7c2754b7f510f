//! Engine modules: one per provisioning stage.
//!
//! Each stage takes validated inputs, issues its commands through a
//! [`Host`](crate::host::Host) and returns the typed error of its stage.
//! The derived plans (`PartitionPlan`, `VolumeTopology`, `MountPlan`,
//! `BootEntry`) are pure values built right before the stage that consumes
//! them.

pub mod bootloader;
pub mod bootstrap;
pub mod initramfs;
pub mod mount;
pub mod partition;
pub mod resources;
pub mod system;
pub mod volume;
