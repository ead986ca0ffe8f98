//! Runtime engine that orchestrates a container run.

use tessera_common::config::EngineConfig;
use tessera_common::error::{EngineError, Result};
use tessera_common::types::{Application, ExitStatus, RunOptions, Volume};
use tessera_core::namespace::{self, Namespace, NamespaceKind};
use tessera_core::process::{ProcessSpec, StdioMode};
use tracing::Span;

use crate::backend::{self, HostBackend};
use crate::guard::{LoopGuard, MountGuard};
use crate::process;
use crate::session::TerminalSession;

/// The engine that runs applications from disk images.
///
/// Each run is strictly sequential: attach, mount, launch, wait, unmount,
/// detach. Teardown always happens in that reverse order, whatever the
/// outcome of the earlier steps.
pub struct Engine {
    backend: Box<dyn HostBackend>,
    config: EngineConfig,
}

impl Engine {
    /// Creates an engine on the host backend with the given configuration.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self::with_backend(backend::detect_backend(), config)
    }

    /// Creates an engine on a custom backend.
    #[must_use]
    pub fn with_backend(backend: Box<dyn HostBackend>, config: EngineConfig) -> Self {
        Self { backend, config }
    }

    /// The engine's configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs `application` from the image in `volume` and waits for it.
    ///
    /// # Errors
    ///
    /// Returns the first setup error (attach, mount, launch), or
    /// [`EngineError::ChildFailed`] if the application exits unsuccessfully.
    /// Teardown errors are logged when another error is being returned and
    /// returned otherwise.
    pub fn run_application(
        &self,
        volume: &Volume,
        application: &Application,
        options: &RunOptions,
    ) -> Result<()> {
        let span = tracing::info_span!(
            "run",
            app = %application.name,
            image = %volume.path.display()
        );
        let _entered = span.enter();
        tracing::info!(parent: &span, path = %application.path.display(), "starting application");

        let backend = self.backend.as_ref();
        let device = LoopGuard::attach(backend, &volume.path, &span)?;
        let mount = MountGuard::mount(
            backend,
            device.device().path(),
            &self.config.mount_root,
            &self.config.image_fs_type,
            &span,
        )?;

        let spec = process::build_spec(&self.config, application, options, mount.path());
        let outcome = if options.terminal {
            self.launch_with_terminal(spec, &span)
        } else {
            self.launch(&spec, &span)
        };

        let teardown = [mount.release(), device.release()];
        finish(outcome, teardown, &span)
    }

    fn launch(&self, spec: &ProcessSpec, span: &Span) -> Result<ExitStatus> {
        let pid = self.backend.spawn(spec)?;
        tracing::info!(parent: span, pid, "application launched");
        let status = self.backend.wait(pid)?;
        tracing::info!(parent: span, pid, %status, "application finished");
        Ok(status)
    }

    fn launch_with_terminal(&self, mut spec: ProcessSpec, span: &Span) -> Result<ExitStatus> {
        let session = TerminalSession::open(span)?;
        spec.stdio = StdioMode::Terminal(session.slave_path().to_path_buf());
        let status = self.launch(&spec, span);
        session.close();
        status
    }

    /// Runs `command` inside the namespaces and root of process `pid`.
    ///
    /// # Errors
    ///
    /// See [`crate::exec::exec_in_container`].
    pub fn exec(&self, pid: u32, command: &[String]) -> Result<ExitStatus> {
        crate::exec::exec_in_container(&self.config, pid, command)
    }

    /// Lists the namespaces process `pid` belongs to.
    ///
    /// Kinds the kernel does not expose are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if `/proc/<pid>/ns` cannot be read at all.
    pub fn namespaces(&self, pid: u32) -> Result<Vec<Namespace>> {
        let found: Vec<_> = NamespaceKind::ALL
            .into_iter()
            .filter_map(|kind| namespace::find_by_pid(kind, pid).ok())
            .collect();
        if found.is_empty() {
            return namespace::find_by_pid(NamespaceKind::Mount, pid).map(|ns| vec![ns]);
        }
        Ok(found)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Combines the launch outcome with the teardown results.
///
/// The launch error, or a failed exit status, takes precedence; teardown
/// errors are then only logged. On a clean run the first teardown error is
/// returned.
fn finish(outcome: Result<ExitStatus>, teardown: [Result<()>; 2], span: &Span) -> Result<()> {
    let primary = match outcome {
        Ok(status) if status.success() => None,
        Ok(status) => Some(EngineError::ChildFailed { status }),
        Err(e) => Some(e),
    };

    let mut teardown_errors = teardown.into_iter().filter_map(Result::err);
    match primary {
        Some(e) => {
            for teardown_error in teardown_errors {
                tracing::error!(parent: span, error = %teardown_error, "teardown failed");
            }
            Err(e)
        }
        None => match teardown_errors.next() {
            Some(first) => {
                for teardown_error in teardown_errors {
                    tracing::error!(parent: span, error = %teardown_error, "teardown failed");
                }
                Err(first)
            }
            None => Ok(()),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn unmount_error() -> EngineError {
        EngineError::UnmountFailed {
            target: PathBuf::from("/opt/tessera/mount/abcdef"),
            source: std::io::Error::from_raw_os_error(libc::EBUSY),
        }
    }

    fn detach_error() -> EngineError {
        EngineError::DetachFailed {
            device: PathBuf::from("/dev/loop0"),
            source: std::io::Error::from_raw_os_error(libc::EBUSY),
        }
    }

    #[test]
    fn clean_run_succeeds() {
        let result = finish(Ok(ExitStatus::Exited(0)), [Ok(()), Ok(())], &Span::none());
        assert!(result.is_ok());
    }

    #[test]
    fn failed_exit_becomes_child_failure() {
        let err = finish(Ok(ExitStatus::Exited(3)), [Ok(()), Ok(())], &Span::none()).unwrap_err();
        assert!(err.is_child_failure());
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn teardown_error_does_not_mask_child_failure() {
        let err = finish(
            Ok(ExitStatus::Signaled(9)),
            [Err(unmount_error()), Err(detach_error())],
            &Span::none(),
        )
        .unwrap_err();
        assert!(err.is_child_failure());
    }

    #[test]
    fn first_teardown_error_surfaces_on_clean_run() {
        let err = finish(
            Ok(ExitStatus::Exited(0)),
            [Err(unmount_error()), Err(detach_error())],
            &Span::none(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::UnmountFailed { .. }));
    }

    #[test]
    fn namespaces_of_self_cover_isolation_kinds() {
        let engine = Engine::default();
        let found = engine.namespaces(std::process::id()).unwrap();
        for kind in [NamespaceKind::Mount, NamespaceKind::Pid, NamespaceKind::Uts] {
            assert!(found.iter().any(|ns| ns.kind == kind), "{kind} missing");
        }
    }
}
