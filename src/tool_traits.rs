//! Type-safe tool argument contracts.
//!
//! Every external program the installer runs (parted, cryptsetup, lvcreate,
//! pacstrap, ...) is described by a struct implementing `ToolArgs`. Stage
//! code never assembles raw argument vectors; the struct definition is the
//! contract between the installer and the tool.
//!
//! # Contract
//!
//! - `program()`: executable name, resolved through `PATH` at run time.
//! - `to_cli_args()`: arguments exactly as the program expects them.
//! - `stdin()`: secret material piped to the program, never placed on the
//!   command line where it would show up in `ps` or the log.
//! - `is_destructive()`: true when the command rewrites on-disk data.
//!
//! # Example
//!
//! ```ignore
//! use warding::tool_traits::ToolArgs;
//! use warding::tools::lvm::VgCreate;
//!
//! let args = VgCreate {
//!     name: "vg0".into(),
//!     physical_volume: "/dev/mapper/cryptlvm".into(),
//! };
//!
//! assert_eq!(args.to_cli_args(), ["vg0", "/dev/mapper/cryptlvm"]);
//! ```

use std::fmt::Debug;

use crate::types::Secret;

/// Trait for typed tool arguments.
pub trait ToolArgs: Debug {
    /// Program name, e.g. `cryptsetup`.
    fn program(&self) -> &'static str;

    /// Convert struct fields to CLI arguments.
    fn to_cli_args(&self) -> Vec<String>;

    /// Secret fed to the program's standard input, if any.
    fn stdin(&self) -> Option<Secret> {
        None
    }

    /// Whether the command destroys data already on the target disk.
    fn is_destructive(&self) -> bool {
        false
    }

    /// One-line rendering for logs and dry-run plans.
    ///
    /// Stdin content is never included.
    fn describe(&self) -> String {
        let mut line = self.program().to_string();
        for arg in self.to_cli_args() {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push('\'');
                line.push_str(&arg.replace('\'', r"'\''"));
                line.push('\'');
            } else {
                line.push_str(&arg);
            }
        }
        if self.stdin().is_some() {
            line.push_str(" < <secret>");
        }
        line
    }
}
