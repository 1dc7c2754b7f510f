use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Warding - provision a disk into a bootable Arch Linux system
#[derive(Parser, Debug)]
#[command(name = "warding")]
#[command(about = "Partition, encrypt and install Arch Linux onto a single disk")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install onto the configured disk. Destroys everything on it.
    Install {
        /// Path to the JSON configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Confirm that the target disk may be wiped
        #[arg(long)]
        yes: bool,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        config: PathBuf,
    },
    /// Print the layout and every command an install would run, without
    /// running any of them
    Plan {
        /// Path to the JSON configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
