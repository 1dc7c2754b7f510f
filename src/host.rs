//! Command and file boundary between the pipeline and the machine.
//!
//! Every side effect the installer has goes through the [`Host`] trait:
//! running a typed tool, writing or appending a file, reading a file and
//! probing the environment. [`SystemHost`] performs them for real;
//! [`RecordingHost`] only records them, which is what the `plan` command
//! and the test suite drive the pipeline against.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::error::StepFailure;
use crate::preflight::{self, EnvironmentFacts};
use crate::process_guard::CommandProcessGroup;
use crate::tool_traits::ToolArgs;
use crate::types::Secret;

/// Output from a tool execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Standard output from the tool.
    pub stdout: String,
    /// Standard error from the tool.
    pub stderr: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    /// Whether the tool exited successfully (exit code 0).
    pub success: bool,
}

impl ToolOutput {
    /// A successful run that printed `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }
    }

    /// A run that exited with `code` and printed `stderr`.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(code),
            success: false,
        }
    }

    /// Check if the tool succeeded and return an error if not.
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            let code = self.exit_code.unwrap_or(-1);
            anyhow::bail!(
                "{} failed (exit code {}): {}",
                context,
                code,
                self.stderr.trim()
            )
        }
    }
}

/// Everything the pipeline may do to the machine.
pub trait Host {
    /// Run a tool to completion. `Err` means it could not be started at all;
    /// a non-zero exit is reported through `ToolOutput::success`.
    fn run(&mut self, tool: &dyn ToolArgs) -> Result<ToolOutput>;

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()>;

    fn append_file(&mut self, path: &Path, contents: &str) -> Result<()>;

    fn read_to_string(&mut self, path: &Path) -> Result<String>;

    /// Probe the environment for the precondition check.
    fn probe_environment(&mut self, disk: &Path, binaries: &[&str]) -> EnvironmentFacts;
}

/// Run `tool` and turn a spawn error or non-zero exit into a `StepFailure`.
pub fn run_checked(
    host: &mut dyn Host,
    step: &str,
    tool: &dyn ToolArgs,
) -> std::result::Result<ToolOutput, StepFailure> {
    let output = host
        .run(tool)
        .map_err(|e| StepFailure::new(step, format!("{:#}", e)))?;
    output
        .ensure_success(tool.program())
        .map_err(|e| StepFailure::new(step, format!("{:#}", e)))?;
    Ok(output)
}

/// `write_file` with the error mapped onto `step`.
pub fn write_checked(
    host: &mut dyn Host,
    step: &str,
    path: &Path,
    contents: &str,
) -> std::result::Result<(), StepFailure> {
    host.write_file(path, contents)
        .map_err(|e| StepFailure::new(step, format!("{:#}", e)))
}

/// `read_to_string` with the error mapped onto `step`.
pub fn read_checked(
    host: &mut dyn Host,
    step: &str,
    path: &Path,
) -> std::result::Result<String, StepFailure> {
    host.read_to_string(path)
        .map_err(|e| StepFailure::new(step, format!("{:#}", e)))
}

// ============================================================================
// SystemHost
// ============================================================================

/// Executes tools as real child processes and touches the real filesystem.
///
/// Every child runs in its own process group (see `process_guard`) with
/// stdout and stderr captured. Secrets are written to the child's stdin and
/// the pipe is closed right after.
#[derive(Debug, Default)]
pub struct SystemHost;

impl SystemHost {
    pub fn new() -> Self {
        Self
    }
}

impl Host for SystemHost {
    fn run(&mut self, tool: &dyn ToolArgs) -> Result<ToolOutput> {
        let program = tool.program();
        let secret: Option<Secret> = tool.stdin();

        info!(destructive = tool.is_destructive(), "$ {}", tool.describe());

        let mut cmd = Command::new(program);
        cmd.args(tool.to_cli_args())
            .stdin(if secret.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group();

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", program))?;

        if let Some(secret) = secret {
            let mut stdin = child
                .stdin
                .take()
                .with_context(|| format!("stdin of {} was not captured", program))?;
            // A tool that exits without reading closes the pipe early; its
            // exit status is reported below.
            if let Err(e) = stdin.write_all(secret.expose().as_bytes()) {
                warn!("Could not pass the secret to {}: {}", program, e);
            }
            // Dropping the handle closes the pipe so the tool sees EOF.
        }

        let output = child
            .wait_with_output()
            .with_context(|| format!("Failed waiting for {}", program))?;

        let result = ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            success: output.status.success(),
        };

        if result.success {
            debug!("{} exited successfully", program);
        } else {
            warn!(
                "{} failed with exit code {}: {}",
                program,
                result.exit_code.unwrap_or(-1),
                result.stderr.trim()
            );
        }
        Ok(result)
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        info!("Writing {}", path.display());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
    }

    fn append_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        info!("Appending to {}", path.display());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(contents.as_bytes())
            .with_context(|| format!("Failed to append to {}", path.display()))
    }

    fn read_to_string(&mut self, path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
    }

    fn probe_environment(&mut self, disk: &Path, binaries: &[&str]) -> EnvironmentFacts {
        preflight::probe(disk, binaries)
    }
}

// ============================================================================
// RecordingHost
// ============================================================================

/// UUID reported by `RecordingHost` for `blkid`.
pub const RECORDED_UUID: &str = "0f3c5f2e-7d4b-4f0a-9a57-1c2d3e4f5a6b";

/// `/etc/mkinitcpio.conf` as shipped by the mkinitcpio package.
pub const STOCK_MKINITCPIO_CONF: &str = "\
# vim:set ft=sh
MODULES=()

BINARIES=()

FILES=()

# HOOKS
#    HOOKS=(base)
HOOKS=(base systemd autodetect microcode modconf kms keyboard sd-vconsole block filesystems fsck)

#COMPRESSION=\"zstd\"
";

/// `/etc/default/grub` as shipped by the grub package (abridged).
pub const STOCK_DEFAULT_GRUB: &str = "\
# GRUB boot loader configuration

GRUB_DEFAULT=0
GRUB_TIMEOUT=5
GRUB_DISTRIBUTOR=\"Arch\"
GRUB_CMDLINE_LINUX_DEFAULT=\"loglevel=3 quiet\"
GRUB_CMDLINE_LINUX=\"\"

GRUB_PRELOAD_MODULES=\"part_gpt part_msdos\"
";

/// One recorded side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Command {
        /// `ToolArgs::describe()` of the tool.
        line: String,
        program: &'static str,
        destructive: bool,
        stdin: Option<Secret>,
    },
    WriteFile {
        path: PathBuf,
        contents: String,
    },
    AppendFile {
        path: PathBuf,
        contents: String,
    },
}

impl Action {
    /// Single-line rendering used by the `plan` command.
    pub fn render(&self) -> String {
        match self {
            Self::Command { line, .. } => line.clone(),
            Self::WriteFile { path, contents } => {
                format!("write {} ({} lines)", path.display(), contents.lines().count())
            }
            Self::AppendFile { path, contents } => {
                format!("append {} ({} lines)", path.display(), contents.lines().count())
            }
        }
    }
}

/// Records every action instead of performing it.
///
/// Starts out seeded with the files a fresh `pacstrap` leaves in the target
/// that the pipeline edits, canned output for the tools whose stdout it
/// reads, and the facts of a healthy live ISO.
#[derive(Debug, Clone)]
pub struct RecordingHost {
    actions: Vec<Action>,
    files: BTreeMap<PathBuf, String>,
    outputs: BTreeMap<&'static str, String>,
    failures: Vec<String>,
    facts: EnvironmentFacts,
}

impl Default for RecordingHost {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingHost {
    pub fn new() -> Self {
        let mut files = BTreeMap::new();
        files.insert(
            PathBuf::from("/mnt/etc/mkinitcpio.conf"),
            STOCK_MKINITCPIO_CONF.to_string(),
        );
        files.insert(
            PathBuf::from("/mnt/etc/default/grub"),
            STOCK_DEFAULT_GRUB.to_string(),
        );

        let mut outputs = BTreeMap::new();
        outputs.insert("blkid", format!("{}\n", RECORDED_UUID));
        outputs.insert(
            "genfstab",
            "# /dev/mapper/vg0-root\nUUID=1111 / ext4 rw,relatime 0 1\n".to_string(),
        );
        outputs.insert("curl", "Europe/Berlin\n".to_string());

        Self {
            actions: Vec::new(),
            files,
            outputs,
            failures: Vec::new(),
            facts: EnvironmentFacts::live_iso(64 * 1024),
        }
    }

    /// Make every command whose rendered line contains `pattern` exit 1.
    pub fn fail_when(mut self, pattern: impl Into<String>) -> Self {
        self.failures.push(pattern.into());
        self
    }

    /// Replace the facts returned by `probe_environment`.
    pub fn with_facts(mut self, facts: EnvironmentFacts) -> Self {
        self.facts = facts;
        self
    }

    /// Canned stdout for every run of `program`.
    pub fn with_output(mut self, program: &'static str, stdout: impl Into<String>) -> Self {
        self.outputs.insert(program, stdout.into());
        self
    }

    /// Remove a seeded file so that reading it fails.
    pub fn without_file(mut self, path: impl AsRef<Path>) -> Self {
        self.files.remove(path.as_ref());
        self
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Rendered command lines, in execution order.
    pub fn commands(&self) -> Vec<String> {
        self.actions
            .iter()
            .filter_map(|action| match action {
                Action::Command { line, .. } => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of destructive commands issued.
    pub fn destructive_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|action| matches!(action, Action::Command { destructive: true, .. }))
            .count()
    }

    /// Current content of a file as the pipeline left it.
    pub fn file(&self, path: impl AsRef<Path>) -> Option<&str> {
        self.files.get(path.as_ref()).map(String::as_str)
    }

    /// Index of the first command whose line starts with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.commands().iter().position(|line| line.starts_with(prefix))
    }
}

impl Host for RecordingHost {
    fn run(&mut self, tool: &dyn ToolArgs) -> Result<ToolOutput> {
        let line = tool.describe();
        let program = tool.program();
        debug!("(recorded) $ {}", line);

        self.actions.push(Action::Command {
            line: line.clone(),
            program,
            destructive: tool.is_destructive(),
            stdin: tool.stdin(),
        });

        if self.failures.iter().any(|pattern| line.contains(pattern.as_str())) {
            return Ok(ToolOutput::failed(1, format!("{}: simulated failure", program)));
        }

        // Through arch-chroot the inner program decides the output.
        let inner = tool.to_cli_args();
        let key = if program == "arch-chroot" {
            inner.get(1).map(String::as_str).unwrap_or(program)
        } else {
            program
        };
        let stdout = self.outputs.get(key).cloned().unwrap_or_default();
        Ok(ToolOutput::ok(stdout))
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        self.actions.push(Action::WriteFile {
            path: path.to_path_buf(),
            contents: contents.to_string(),
        });
        self.files.insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn append_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        self.actions.push(Action::AppendFile {
            path: path.to_path_buf(),
            contents: contents.to_string(),
        });
        self.files
            .entry(path.to_path_buf())
            .or_default()
            .push_str(contents);
        Ok(())
    }

    fn read_to_string(&mut self, path: &Path) -> Result<String> {
        self.files
            .get(path)
            .cloned()
            .with_context(|| format!("Failed to read {}: no such file", path.display()))
    }

    fn probe_environment(&mut self, _disk: &Path, _binaries: &[&str]) -> EnvironmentFacts {
        self.facts.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::disk::{BlkidUuid, Mkfs};
    use crate::tools::encryption::LuksOpen;
    use crate::tools::system::{InChroot, TimezoneLookup};
    use crate::types::Filesystem;
    use tempfile::tempdir;

    #[derive(Debug)]
    struct Shell(&'static str);

    impl ToolArgs for Shell {
        fn program(&self) -> &'static str {
            "sh"
        }

        fn to_cli_args(&self) -> Vec<String> {
            vec!["-c".to_string(), self.0.to_string()]
        }
    }

    #[derive(Debug)]
    struct Cat(Secret);

    impl ToolArgs for Cat {
        fn program(&self) -> &'static str {
            "cat"
        }

        fn to_cli_args(&self) -> Vec<String> {
            Vec::new()
        }

        fn stdin(&self) -> Option<Secret> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn test_ensure_success_reports_stderr() {
        let output = ToolOutput::failed(5, "  Device /dev/sda2 not found\n");
        let err = output.ensure_success("pvcreate").unwrap_err();
        assert_eq!(
            err.to_string(),
            "pvcreate failed (exit code 5): Device /dev/sda2 not found"
        );
        assert!(ToolOutput::ok("").ensure_success("noop").is_ok());
    }

    #[test]
    fn test_system_host_captures_exit_status() {
        let mut host = SystemHost::new();
        let ok = host.run(&Shell("echo hello")).unwrap();
        assert!(ok.success);
        assert_eq!(ok.stdout, "hello\n");

        let failed = host.run(&Shell("echo oops >&2; exit 3")).unwrap();
        assert!(!failed.success);
        assert_eq!(failed.exit_code, Some(3));
        assert_eq!(failed.stderr, "oops\n");
    }

    #[test]
    fn test_system_host_pipes_secret_to_stdin() {
        let mut host = SystemHost::new();
        let output = host.run(&Cat(Secret::new("s3cret"))).unwrap();
        assert_eq!(output.stdout, "s3cret");
    }

    #[derive(Debug)]
    struct RejectsStdin(Secret);

    impl ToolArgs for RejectsStdin {
        fn program(&self) -> &'static str {
            "sh"
        }

        fn to_cli_args(&self) -> Vec<String> {
            vec!["-c".to_string(), "echo 'no such device' >&2; exit 4".to_string()]
        }

        fn stdin(&self) -> Option<Secret> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn test_system_host_reports_status_of_tool_that_ignores_stdin() {
        // Larger than a pipe buffer, so the write hits a closed pipe.
        let secret = Secret::new("k".repeat(1024 * 1024));
        let mut host = SystemHost::new();

        let output = host.run(&RejectsStdin(secret)).unwrap();
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(4));
        assert_eq!(output.stderr, "no such device\n");
    }

    #[test]
    fn test_system_host_file_operations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("etc/hostname");
        let mut host = SystemHost::new();

        host.write_file(&path, "warding\n").unwrap();
        host.append_file(&path, "extra\n").unwrap();
        assert_eq!(host.read_to_string(&path).unwrap(), "warding\nextra\n");
    }

    #[test]
    fn test_run_checked_maps_failure_to_step() {
        let mut host = RecordingHost::new().fail_when("mkfs.ext4");
        let tool = Mkfs {
            filesystem: Filesystem::Ext4,
            device: PathBuf::from("/dev/vg0/root"),
        };
        let err = run_checked(&mut host, "format root", &tool).unwrap_err();
        assert_eq!(err.step, "format root");
        assert!(err.cause.contains("exit code 1"));
    }

    #[test]
    fn test_recording_host_records_secret_out_of_line() {
        let mut host = RecordingHost::new();
        let open = LuksOpen {
            device: PathBuf::from("/dev/sda2"),
            mapper_name: "cryptlvm".into(),
            key: Secret::new("pw"),
        };
        host.run(&open).unwrap();

        match &host.actions()[0] {
            Action::Command { line, stdin, .. } => {
                assert!(!line.contains("pw "));
                assert_eq!(stdin, &Some(Secret::new("pw")));
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_recording_host_canned_outputs() {
        let mut host = RecordingHost::new();
        let uuid = host
            .run(&BlkidUuid {
                device: PathBuf::from("/dev/sda2"),
            })
            .unwrap();
        assert_eq!(uuid.stdout.trim(), RECORDED_UUID);

        let tz = host
            .run(&InChroot::new(
                "/mnt",
                TimezoneLookup {
                    url: "https://ipapi.co/timezone".into(),
                    timeout_secs: 10,
                },
            ))
            .unwrap();
        assert_eq!(tz.stdout.trim(), "Europe/Berlin");
    }

    #[test]
    fn test_recording_host_files() {
        let mut host = RecordingHost::new().without_file("/mnt/etc/default/grub");
        assert!(host.read_to_string(Path::new("/mnt/etc/default/grub")).is_err());
        assert!(host
            .read_to_string(Path::new("/mnt/etc/mkinitcpio.conf"))
            .unwrap()
            .contains("HOOKS=(base systemd"));

        host.append_file(Path::new("/mnt/etc/fstab"), "a\n").unwrap();
        host.append_file(Path::new("/mnt/etc/fstab"), "b\n").unwrap();
        assert_eq!(host.file("/mnt/etc/fstab"), Some("a\nb\n"));
        assert_eq!(
            host.actions().last().map(Action::render),
            Some("append /mnt/etc/fstab (1 lines)".to_string())
        );
    }
}
