//! Namespace joining for executing commands in running containers.
//!
//! `setns(2)` and `chroot(2)` change the calling thread for good, so the
//! whole join happens on a dedicated worker thread that first stops sharing
//! its filesystem attributes with the rest of the process.

use std::fs::File;
use std::os::fd::AsFd;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Command;

use nix::sched::{CloneFlags, unshare};
use nix::unistd::{chroot, fchdir};
use tessera_common::config::EngineConfig;
use tessera_common::error::{EngineError, Result};
use tessera_common::types::ExitStatus;
use tessera_core::namespace::{self, NamespaceKind};

/// Namespaces joined, in order. Mount comes last so `/proc` paths resolved
/// beforehand stay valid.
pub const JOIN_ORDER: [NamespaceKind; 5] = [
    NamespaceKind::Ipc,
    NamespaceKind::Uts,
    NamespaceKind::Network,
    NamespaceKind::Pid,
    NamespaceKind::Mount,
];

/// Joins the namespaces and root of process `pid` and runs `command` there,
/// with the configured base environment and working directory.
///
/// Stdio is inherited.
///
/// # Errors
///
/// Returns [`EngineError::Config`] if the command is empty,
/// [`EngineError::NamespaceJoinFailed`] if a namespace cannot be joined,
/// and [`EngineError::LaunchFailed`] if the command cannot be run.
/// A panicking worker is reported as [`EngineError::NamespaceJoinFailed`].
pub fn exec_in_container(config: &EngineConfig, pid: u32, command: &[String]) -> Result<ExitStatus> {
    tracing::info!(pid, cmd = ?command, "exec into container");

    let Some((program, args)) = command.split_first() else {
        return Err(EngineError::Config {
            message: "exec command is empty".into(),
        });
    };
    let mut cmd = Command::new(program);
    let _ = cmd
        .args(args)
        .env_clear()
        .envs(&config.base_env)
        .current_dir(&config.workdir);

    run_on_worker(pid, move || run_joined(pid, cmd))
}

/// Runs `join` on a thread of its own, so namespace changes never leak
/// into the caller's thread.
fn run_on_worker<F>(pid: u32, join: F) -> Result<ExitStatus>
where
    F: FnOnce() -> Result<ExitStatus> + Send + 'static,
{
    let proc_dir = PathBuf::from(format!("/proc/{pid}"));
    let worker = std::thread::Builder::new()
        .name(format!("exec-{pid}"))
        .spawn(join)
        .map_err(|e| EngineError::Io {
            path: proc_dir.clone(),
            source: e,
        })?;
    worker.join().unwrap_or_else(|_| {
        Err(EngineError::NamespaceJoinFailed {
            path: proc_dir,
            source: std::io::Error::other("exec worker panicked"),
        })
    })
}

fn run_joined(pid: u32, mut command: Command) -> Result<ExitStatus> {
    let root_path = PathBuf::from(format!("/proc/{pid}/root"));
    unshare(CloneFlags::CLONE_FS).map_err(|e| EngineError::NamespaceJoinFailed {
        path: root_path.clone(),
        source: e.into(),
    })?;

    let handles = JOIN_ORDER
        .iter()
        .map(|kind| namespace::find_by_pid(*kind, pid)?.open())
        .collect::<Result<Vec<_>>>()?;
    let root = File::open(&root_path).map_err(|e| EngineError::Io {
        path: root_path.clone(),
        source: e,
    })?;

    for handle in &handles {
        handle.enter()?;
    }
    fchdir(root.as_fd())
        .and_then(|()| chroot("."))
        .map_err(|e| EngineError::NamespaceJoinFailed {
            path: root_path,
            source: e.into(),
        })?;

    let status = command.status().map_err(|e| EngineError::LaunchFailed {
        program: PathBuf::from(command.get_program()),
        source: e,
    })?;
    Ok(status
        .code()
        .map_or_else(|| ExitStatus::Signaled(status.signal().unwrap_or(0)), ExitStatus::Exited))
}
