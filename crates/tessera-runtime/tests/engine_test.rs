//! Engine lifecycle tests against a recording backend.
//!
//! Verifies the attach → mount → spawn → wait → unmount → detach ordering
//! and that every acquired resource is released exactly once on each
//! failure path.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use nix::sched::CloneFlags;
use tessera_common::config::EngineConfig;
use tessera_common::error::{EngineError, Result};
use tessera_common::types::{Application, ExitStatus, LoopDevice, MountPoint, RunOptions, Volume};
use tessera_core::process::{ProcessSpec, StdioMode};
use tessera_runtime::backend::HostBackend;
use tessera_runtime::engine::Engine;

// ── Fake backend ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Attach(PathBuf),
    Mount { device: PathBuf, fs_type: String },
    Spawn(Box<ProcessSpec>),
    Wait(u32),
    Unmount(PathBuf),
    Detach(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Attach,
    Mount,
    Spawn,
    Wait,
    Unmount,
    Detach,
}

#[derive(Clone, Default)]
struct RecordingBackend {
    calls: Arc<Mutex<Vec<Call>>>,
    fail: Vec<Failure>,
    exit: Option<ExitStatus>,
}

impl RecordingBackend {
    fn failing(fail: &[Failure]) -> Self {
        Self {
            fail: fail.to_vec(),
            ..Self::default()
        }
    }

    fn exiting(status: ExitStatus) -> Self {
        Self {
            exit: Some(status),
            ..Self::default()
        }
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn fails(&self, failure: Failure) -> bool {
        self.fail.contains(&failure)
    }
}

fn io_error() -> std::io::Error {
    std::io::Error::from_raw_os_error(libc::EBUSY)
}

impl HostBackend for RecordingBackend {
    fn attach_loop(&self, image: &Path) -> Result<LoopDevice> {
        self.record(Call::Attach(image.to_path_buf()));
        if self.fails(Failure::Attach) {
            return Err(EngineError::DeviceUnavailable { source: io_error() });
        }
        Ok(LoopDevice {
            device_path: PathBuf::from("/dev/loop7"),
        })
    }

    fn detach_loop(&self, device: &LoopDevice) -> Result<()> {
        self.record(Call::Detach(device.device_path.clone()));
        if self.fails(Failure::Detach) {
            return Err(EngineError::DetachFailed {
                device: device.device_path.clone(),
                source: io_error(),
            });
        }
        Ok(())
    }

    fn mount_device(&self, device: &Path, mount_root: &Path, fs_type: &str) -> Result<MountPoint> {
        self.record(Call::Mount {
            device: device.to_path_buf(),
            fs_type: fs_type.to_string(),
        });
        if self.fails(Failure::Mount) {
            return Err(EngineError::MountFailed {
                source_path: device.to_path_buf(),
                target: mount_root.join("q8w2e4"),
                fs_type: fs_type.to_string(),
                source: io_error(),
            });
        }
        Ok(MountPoint {
            name: "q8w2e4".into(),
            path: mount_root.join("q8w2e4"),
        })
    }

    fn unmount(&self, mount_point: &MountPoint) -> Result<()> {
        self.record(Call::Unmount(mount_point.path.clone()));
        if self.fails(Failure::Unmount) {
            return Err(EngineError::UnmountFailed {
                target: mount_point.path.clone(),
                source: io_error(),
            });
        }
        Ok(())
    }

    fn spawn(&self, spec: &ProcessSpec) -> Result<u32> {
        self.record(Call::Spawn(Box::new(spec.clone())));
        if self.fails(Failure::Spawn) {
            return Err(EngineError::LaunchFailed {
                program: spec.program.clone(),
                source: std::io::Error::from_raw_os_error(libc::ENOENT),
            });
        }
        Ok(4242)
    }

    fn wait(&self, pid: u32) -> Result<ExitStatus> {
        self.record(Call::Wait(pid));
        if self.fails(Failure::Wait) {
            return Err(EngineError::WaitFailed {
                pid,
                source: std::io::Error::from_raw_os_error(libc::ECHILD),
            });
        }
        Ok(self.exit.unwrap_or(ExitStatus::Exited(0)))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn engine(backend: &RecordingBackend) -> Engine {
    Engine::with_backend(Box::new(backend.clone()), EngineConfig::default())
}

fn run(backend: &RecordingBackend, options: &RunOptions) -> Result<()> {
    engine(backend).run_application(
        &Volume::new("/var/lib/tessera/img"),
        &Application::new("shell", "/usr/bin/bash"),
        options,
    )
}

fn attaches(backend: &RecordingBackend) -> usize {
    backend.count(|c| matches!(c, Call::Attach(_)))
}

fn detaches(backend: &RecordingBackend) -> usize {
    backend.count(|c| matches!(c, Call::Detach(_)))
}

fn unmounts(backend: &RecordingBackend) -> usize {
    backend.count(|c| matches!(c, Call::Unmount(_)))
}

// ── Ordering ─────────────────────────────────────────────────────────

#[test]
fn successful_run_follows_strict_order() {
    let backend = RecordingBackend::default();
    run(&backend, &RunOptions::default()).unwrap();

    let calls = backend.calls();
    assert_eq!(calls.len(), 6, "{calls:?}");
    assert_eq!(calls[0], Call::Attach(PathBuf::from("/var/lib/tessera/img")));
    assert_eq!(
        calls[1],
        Call::Mount {
            device: PathBuf::from("/dev/loop7"),
            fs_type: "ext4".into(),
        }
    );

    let Call::Spawn(spec) = &calls[2] else {
        panic!("expected spawn, got {:?}", calls[2]);
    };
    assert_eq!(spec.root, Path::new("/opt/tessera/mount/q8w2e4"));
    assert_eq!(spec.program, Path::new("/usr/bin/bash"));
    assert_eq!(spec.args, vec!["/usr/bin/bash"]);
    assert_eq!(spec.workdir, Path::new("/root"));
    assert_eq!((spec.uid, spec.gid), (0, 0));
    assert_eq!(spec.stdio, StdioMode::Inherit);
    let flags = spec.namespaces.clone_flags();
    for flag in [
        CloneFlags::CLONE_NEWNS,
        CloneFlags::CLONE_NEWPID,
        CloneFlags::CLONE_NEWIPC,
        CloneFlags::CLONE_NEWUTS,
        CloneFlags::CLONE_NEWNET,
    ] {
        assert!(flags.contains(flag), "{flag:?} missing");
    }

    assert_eq!(calls[3], Call::Wait(4242));
    assert_eq!(calls[4], Call::Unmount(PathBuf::from("/opt/tessera/mount/q8w2e4")));
    assert_eq!(calls[5], Call::Detach(PathBuf::from("/dev/loop7")));
}

#[test]
fn options_flow_into_spawned_process() {
    let backend = RecordingBackend::default();
    let options = RunOptions {
        arguments: vec!["/bin/sh".into(), "-c".into(), "id".into()],
        environment: BTreeMap::from([("TERM".to_string(), "linux".to_string())]),
        share_host_network: true,
        terminal: false,
    };
    run(&backend, &options).unwrap();

    let spec = backend
        .calls()
        .into_iter()
        .find_map(|c| match c {
            Call::Spawn(spec) => Some(spec),
            _ => None,
        })
        .unwrap();
    assert_eq!(spec.args, vec!["/bin/sh", "-c", "id"]);
    assert_eq!(spec.env["TERM"], "linux");
    assert_eq!(spec.env["HOME"], "/root");
    assert!(spec.env.contains_key("PS1"));
    assert!(!spec.namespaces.clone_flags().contains(CloneFlags::CLONE_NEWNET));
    assert!(spec.namespaces.clone_flags().contains(CloneFlags::CLONE_NEWPID));
}

// ── Failure paths ────────────────────────────────────────────────────

#[test]
fn attach_failure_touches_nothing_else() {
    let backend = RecordingBackend::failing(&[Failure::Attach]);
    let err = run(&backend, &RunOptions::default()).unwrap_err();

    assert!(matches!(err, EngineError::DeviceUnavailable { .. }));
    assert_eq!(backend.calls().len(), 1);
    assert_eq!(detaches(&backend), 0);
}

#[test]
fn mount_failure_still_detaches() {
    let backend = RecordingBackend::failing(&[Failure::Mount]);
    let err = run(&backend, &RunOptions::default()).unwrap_err();

    assert!(matches!(err, EngineError::MountFailed { .. }));
    assert_eq!(attaches(&backend), 1);
    assert_eq!(detaches(&backend), 1);
    assert_eq!(unmounts(&backend), 0);
}

#[test]
fn spawn_failure_unmounts_then_detaches() {
    let backend = RecordingBackend::failing(&[Failure::Spawn]);
    let err = run(&backend, &RunOptions::default()).unwrap_err();

    assert!(matches!(err, EngineError::LaunchFailed { .. }));
    assert!(!err.is_child_failure());
    let calls = backend.calls();
    assert!(matches!(calls[calls.len() - 2], Call::Unmount(_)));
    assert!(matches!(calls[calls.len() - 1], Call::Detach(_)));
    assert_eq!(backend.count(|c| matches!(c, Call::Wait(_))), 0);
}

#[test]
fn wait_failure_still_tears_down() {
    let backend = RecordingBackend::failing(&[Failure::Wait]);
    let err = run(&backend, &RunOptions::default()).unwrap_err();

    assert!(matches!(err, EngineError::WaitFailed { .. }));
    assert_eq!(unmounts(&backend), 1);
    assert_eq!(detaches(&backend), 1);
}

#[test]
fn nonzero_exit_is_child_failure() {
    let backend = RecordingBackend::exiting(ExitStatus::Exited(2));
    let err = run(&backend, &RunOptions::default()).unwrap_err();

    assert!(err.is_child_failure());
    assert_eq!(err.exit_code(), 2);
    assert_eq!(attaches(&backend), 1);
    assert_eq!(detaches(&backend), 1);
}

#[test]
fn signal_death_is_child_failure() {
    let backend = RecordingBackend::exiting(ExitStatus::Signaled(9));
    let err = run(&backend, &RunOptions::default()).unwrap_err();

    assert!(err.is_child_failure());
    assert_eq!(err.exit_code(), 137);
}

#[test]
fn detach_failure_surfaces_on_clean_run() {
    let backend = RecordingBackend::failing(&[Failure::Detach]);
    let err = run(&backend, &RunOptions::default()).unwrap_err();

    assert!(matches!(err, EngineError::DetachFailed { .. }));
    assert_eq!(detaches(&backend), 1);
}

#[test]
fn unmount_failure_does_not_skip_detach() {
    let backend = RecordingBackend::failing(&[Failure::Unmount]);
    let err = run(&backend, &RunOptions::default()).unwrap_err();

    assert!(matches!(err, EngineError::UnmountFailed { .. }));
    assert_eq!(unmounts(&backend), 1);
    assert_eq!(detaches(&backend), 1);
}

#[test]
fn teardown_errors_never_mask_child_failure() {
    let mut backend = RecordingBackend::failing(&[Failure::Unmount, Failure::Detach]);
    backend.exit = Some(ExitStatus::Exited(5));
    let err = run(&backend, &RunOptions::default()).unwrap_err();

    assert!(err.is_child_failure());
    assert_eq!(err.exit_code(), 5);
}

#[test]
fn teardown_errors_never_mask_launch_failure() {
    let backend = RecordingBackend::failing(&[Failure::Spawn, Failure::Detach]);
    let err = run(&backend, &RunOptions::default()).unwrap_err();

    assert!(matches!(err, EngineError::LaunchFailed { .. }));
}

#[test]
fn every_path_pairs_attach_with_detach() {
    let scenarios: &[&[Failure]] = &[
        &[],
        &[Failure::Mount],
        &[Failure::Spawn],
        &[Failure::Wait],
        &[Failure::Unmount],
        &[Failure::Detach],
    ];
    for fail in scenarios {
        let backend = RecordingBackend::failing(fail);
        let _ = run(&backend, &RunOptions::default());
        assert_eq!(attaches(&backend), 1, "{fail:?}");
        assert_eq!(detaches(&backend), 1, "{fail:?}");
    }
}
