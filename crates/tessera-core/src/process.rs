//! Process creation inside new namespaces.
//!
//! [`spawn`] uses `clone(2)` so the namespace flags apply to the new process
//! itself, then chroots, drops to the requested credentials, changes
//! directory and execs, all inside the child. Failures between `clone` and
//! `execve` are sent back to the parent over a close-on-exec pipe, so an
//! unlaunchable program is reported as [`EngineError::LaunchFailed`] rather
//! than as an exit status.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::ffi::{CString, OsStr};
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sched::clone;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{Gid, Pid, Uid, chdir, chroot, execve, pipe2, setgid, setgroups, setuid};
use tessera_common::error::{EngineError, Result};
use tessera_common::types::ExitStatus;

use crate::namespace::NamespaceSet;
use crate::terminal;

const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// Where the child's standard streams point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdioMode {
    /// Share the parent's stdin, stdout and stderr.
    Inherit,
    /// Attach all three to this pseudo-terminal slave, which also becomes
    /// the controlling terminal of the child's new session.
    Terminal(PathBuf),
}

/// Everything needed to start a container process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Executable, resolved inside `root`.
    pub program: PathBuf,
    /// Full argv, including `argv[0]`.
    pub args: Vec<String>,
    /// Complete environment of the process.
    pub env: BTreeMap<String, String>,
    /// Working directory inside `root`.
    pub workdir: PathBuf,
    /// Host directory the process is chrooted into.
    pub root: PathBuf,
    /// User ID inside the namespaces.
    pub uid: u32,
    /// Group ID inside the namespaces.
    pub gid: u32,
    /// Namespaces the process is created in.
    pub namespaces: NamespaceSet,
    /// Standard stream wiring.
    pub stdio: StdioMode,
}

impl ProcessSpec {
    /// Environment in `KEY=VALUE` form, sorted by key.
    #[must_use]
    pub fn env_pairs(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

/// Pre-built arguments for the child, so nothing allocates after `clone`.
struct ChildContext {
    program: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
    root: CString,
    workdir: CString,
    uid: Uid,
    gid: Gid,
    tty: Option<RawFd>,
}

fn c_string(program: &Path, value: &OsStr) -> Result<CString> {
    CString::new(value.as_bytes()).map_err(|e| EngineError::LaunchFailed {
        program: program.to_path_buf(),
        source: std::io::Error::new(ErrorKind::InvalidInput, e),
    })
}

impl ChildContext {
    fn new(spec: &ProcessSpec, tty: Option<RawFd>) -> Result<Self> {
        let program = &spec.program;
        let argv = spec
            .args
            .iter()
            .map(|arg| c_string(program, OsStr::new(arg)))
            .collect::<Result<Vec<_>>>()?;
        let envp = spec
            .env_pairs()
            .iter()
            .map(|pair| c_string(program, OsStr::new(pair)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            program: c_string(program, program.as_os_str())?,
            argv,
            envp,
            root: c_string(program, spec.root.as_os_str())?,
            workdir: c_string(program, spec.workdir.as_os_str())?,
            uid: Uid::from_raw(spec.uid),
            gid: Gid::from_raw(spec.gid),
            tty,
        })
    }
}

fn redirect_stdio(fd: RawFd) -> nix::Result<()> {
    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are valid in the child; dup2 only
        // replaces the target slot.
        let _ = Errno::result(unsafe { libc::dup2(fd, target) })?;
    }
    Ok(())
}

/// Runs in the cloned child. Only returns on failure.
fn exec_child(ctx: &ChildContext) -> nix::Result<Infallible> {
    if let Some(fd) = ctx.tty {
        terminal::acquire_controlling_terminal(fd)?;
        redirect_stdio(fd)?;
    }
    chroot(ctx.root.as_c_str())?;
    setgroups(&[])?;
    setgid(ctx.gid)?;
    setuid(ctx.uid)?;
    chdir(ctx.workdir.as_c_str())?;
    execve(&ctx.program, &ctx.argv, &ctx.envp)
}

/// Starts the process described by `spec` and returns its host PID.
///
/// Blocks only until the child has either exec'd its program or reported
/// why it could not.
///
/// # Errors
///
/// Returns [`EngineError::LaunchFailed`] if `clone(2)` fails or the child
/// fails to chroot, change credentials, change directory or exec, and
/// [`EngineError::TerminalError`] if the terminal slave cannot be opened.
pub fn spawn(spec: &ProcessSpec) -> Result<u32> {
    let launch_error = |source: std::io::Error| EngineError::LaunchFailed {
        program: spec.program.clone(),
        source,
    };

    let tty = match &spec.stdio {
        StdioMode::Inherit => None,
        StdioMode::Terminal(path) => Some(terminal::open_slave(path)?),
    };
    let ctx = ChildContext::new(spec, tty.as_ref().map(AsRawFd::as_raw_fd))?;

    let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).map_err(|e| launch_error(e.into()))?;
    let mut report = File::from(write_end);
    let mut stack = vec![0u8; CHILD_STACK_SIZE];

    let callback = Box::new(move || -> isize {
        let errno = match exec_child(&ctx) {
            Ok(never) => match never {},
            Err(errno) => errno,
        };
        let _ = report.write_all(&(errno as i32).to_ne_bytes());
        127
    });

    // SAFETY: without CLONE_VM the child runs on a private copy of the
    // address space, like after fork(2); the callback only issues syscalls
    // on data prepared above.
    let pid = unsafe {
        clone(
            callback,
            &mut stack,
            spec.namespaces.clone_flags(),
            Some(libc::SIGCHLD),
        )
    }
    .map_err(|e| launch_error(e.into()))?;
    drop(tty);

    let mut reader = File::from(read_end);
    let mut buf = [0u8; 4];
    match reader.read_exact(&mut buf) {
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            tracing::info!(
                pid = pid.as_raw(),
                program = %spec.program.display(),
                root = %spec.root.display(),
                namespaces = ?spec.namespaces.kinds().collect::<Vec<_>>(),
                "container process started"
            );
            Ok(pid.as_raw().unsigned_abs())
        }
        Err(e) => Err(launch_error(e)),
        Ok(()) => {
            let _ = waitpid(pid, None);
            Err(launch_error(std::io::Error::from_raw_os_error(
                i32::from_ne_bytes(buf),
            )))
        }
    }
}

/// Blocks until process `pid` terminates.
///
/// # Errors
///
/// Returns [`EngineError::WaitFailed`] if `waitpid(2)` fails for any reason
/// other than an interrupted call.
pub fn wait(pid: u32) -> Result<ExitStatus> {
    let wait_error = |source: std::io::Error| EngineError::WaitFailed { pid, source };
    let raw = i32::try_from(pid)
        .map_err(|e| wait_error(std::io::Error::new(ErrorKind::InvalidInput, e)))?;
    let target = Pid::from_raw(raw);

    loop {
        match waitpid(target, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ExitStatus::Exited(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return Ok(ExitStatus::Signaled(signal as i32));
            }
            Ok(_) | Err(Errno::EINTR) => {}
            Err(e) => return Err(wait_error(e.into())),
        }
    }
}
