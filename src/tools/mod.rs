//! Typed argument structs for every external program the installer runs.
//!
//! Grouped by concern; all of them implement [`crate::tool_traits::ToolArgs`].

pub mod disk;
pub mod encryption;
pub mod lvm;
pub mod system;
