//! Warding - Main entry point
//!
//! `install` provisions the configured disk, `validate` checks a config
//! file and `plan` prints what an install would do.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

use warding::cli::{Cli, Commands};
use warding::config::InstallConfig;
use warding::error::StageError;
use warding::host::SystemHost;
use warding::pipeline::{Outcome, Pipeline};
use warding::plan;
use warding::postinstall::{EnableServices, PostInstallStep};
use warding::preflight;
use warding::process_guard::{self, InterruptFlag};

/// Exit status after SIGINT, as a shell reports it.
const EXIT_INTERRUPTED: u8 = 130;

/// `RUST_LOG` overrides the default `info` level.
fn init_tracing() {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn post_install_steps() -> Vec<Box<dyn PostInstallStep>> {
    vec![Box::new(EnableServices::networking())]
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse_args();
    debug!("CLI arguments parsed: {:?}", cli);

    let result = match cli.command {
        Commands::Install { config, yes } => run_install(&config, yes),
        Commands::Validate { config } => run_validate(&config),
        Commands::Plan { config } => run_plan(&config),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_validate(path: &Path) -> Result<ExitCode> {
    info!("Validating configuration file: {}", path.display());
    let config = InstallConfig::load_from_file(path)?;

    match config.validate() {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!(
                "  disk {}  scheme {}  bootloader {}  encrypted {}",
                config.disk().display(),
                config.scheme(),
                config.bootloader(),
                config.is_encrypted()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("✗ Configuration is invalid:");
            for violation in &e.violations {
                eprintln!("  - {}", violation);
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_plan(path: &Path) -> Result<ExitCode> {
    let config = InstallConfig::load_from_file(path)?;

    match plan::preview(config, preflight::probe_microcode(), post_install_steps()) {
        Ok(preview) => {
            print!("{}", preview.render());
            Ok(ExitCode::SUCCESS)
        }
        Err((stage, e)) => {
            eprintln!("✗ {} would fail: {}", stage, e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_install(path: &Path, confirmed: bool) -> Result<ExitCode> {
    let config = InstallConfig::load_from_file(path)?;
    info!("Warding starting up (disk {})", config.disk);

    let interrupt = InterruptFlag::new();
    if let Err(e) = process_guard::init_signal_handlers(&interrupt) {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    if !confirmed {
        warn!(
            "--yes not given: {} will not be modified, the run stops before partitioning",
            config.disk
        );
    }

    let mut pipeline = Pipeline::new(SystemHost::new()).with_interrupt(interrupt);
    for step in post_install_steps() {
        pipeline = pipeline.with_boxed_step(step);
    }
    if confirmed {
        pipeline = pipeline.confirm_destructive();
    }

    match pipeline.run(config) {
        Outcome::Success(report) => {
            println!("✓ Installation complete on {}", report.disk.display());
            println!("  boot options: {}", report.boot_entry.cmdline);
            if !report.rebooted {
                println!("  the target is unmounted; reboot when ready");
            }
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Failure {
            stage,
            error,
            unwind_failures,
        } => {
            eprintln!("✗ {} failed: {}", stage, error);
            for failure in &unwind_failures {
                eprintln!("  could not release {}: {}", failure.step, failure.cause);
            }
            if error == StageError::Interrupted {
                return Ok(ExitCode::from(EXIT_INTERRUPTED));
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
