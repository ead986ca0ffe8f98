//! First process inside a container.
//!
//! Prepares the fresh root (optional pivot, device nodes, pseudo
//! filesystems, hostname), then runs the target on a new pseudo-terminal
//! that is relayed to the launcher's stdio.

use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tessera_common::config::EngineConfig;
use tessera_common::error::{EngineError, Result};
use tessera_common::types::ExitStatus;
use tessera_core::filesystem::{devices, mount, pivot_root};
use tessera_core::namespace::uts;
use tessera_core::terminal;
use tracing::Span;

use crate::session::TerminalSession;

/// Pseudo filesystems mounted in every container, as `(source, target, type)`.
pub const PSEUDO_FILESYSTEMS: [(&str, &str, &str); 3] = [
    ("devpts", "/dev/pts", "devpts"),
    ("proc", "/proc", "proc"),
    ("sysfs", "/sys", "sysfs"),
];

/// What the init process runs and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitPlan {
    /// Binary executed once the container is ready.
    pub target: PathBuf,
    /// Arguments passed to the target after `argv[0]`.
    pub args: Vec<String>,
    /// Directory to pivot into before anything else.
    pub new_root: Option<PathBuf>,
}

fn step_error(step: &'static str, source: impl Into<std::io::Error>) -> EngineError {
    EngineError::InitStep {
        step,
        source: source.into(),
    }
}

/// Prepares the container root: pivot, devices, mounts, links, hostname.
///
/// Symlink creation is the only step whose failure is tolerated.
///
/// # Errors
///
/// Returns the first fatal step error.
pub fn prepare_root(config: &EngineConfig, plan: &InitPlan, span: &Span) -> Result<()> {
    if let Some(new_root) = &plan.new_root {
        pivot_root::pivot_root(new_root, &config.pivot_staging_dir)?;
        tracing::info!(parent: span, new_root = %new_root.display(), "root pivoted");
    }

    nix::unistd::chdir("/").map_err(|e| step_error("chdir", e))?;
    devices::setup_char_devices()?;

    for (source, target, fs_type) in PSEUDO_FILESYSTEMS {
        mount::mount_pseudo(source, Path::new(target), fs_type)?;
    }
    nix::unistd::sync();

    if let Err(e) = devices::setup_device_symlinks() {
        tracing::warn!(parent: span, error = %e, "device symlinks incomplete");
    }

    uts::set_hostname(&config.hostname)?;
    tracing::info!(parent: span, hostname = %config.hostname, "container root prepared");
    Ok(())
}

fn open_stdio(slave: &Path) -> Result<Stdio> {
    terminal::open_slave(slave).map(Stdio::from)
}

/// Runs the target with the slave as stdio and controlling terminal.
///
/// # Errors
///
/// Returns [`EngineError::LaunchFailed`] if the target cannot be started
/// or waited for.
pub fn run_target(plan: &InitPlan, slave: &Path) -> Result<ExitStatus> {
    let launch_error = |source| EngineError::LaunchFailed {
        program: plan.target.clone(),
        source,
    };

    let mut command = Command::new(&plan.target);
    let _ = command
        .args(&plan.args)
        .stdin(open_stdio(slave)?)
        .stdout(open_stdio(slave)?)
        .stderr(open_stdio(slave)?);
    // SAFETY: the hook only issues setsid(2) and ioctl(2).
    let _ = unsafe {
        command.pre_exec(|| {
            terminal::acquire_controlling_terminal(libc::STDIN_FILENO)
                .map_err(std::io::Error::from)
        })
    };

    let status = command
        .spawn()
        .and_then(|mut child| child.wait())
        .map_err(launch_error)?;
    Ok(status
        .code()
        .map_or_else(|| ExitStatus::Signaled(status.signal().unwrap_or(0)), ExitStatus::Exited))
}

/// Runs the whole init sequence and returns the target's exit status.
///
/// # Errors
///
/// Returns the first fatal setup error, a terminal error, or a launch
/// error. The target's own exit status is never an error here.
pub fn run(config: &EngineConfig, plan: &InitPlan) -> Result<ExitStatus> {
    let span = tracing::info_span!("init", target = %plan.target.display());
    prepare_root(config, plan, &span)?;

    let session = TerminalSession::open(&span)?;
    let status = run_target(plan, session.slave_path());
    session.close();

    let status = status?;
    tracing::info!(parent: &span, %status, "target finished");
    Ok(status)
}
