//! Host backend abstraction over the kernel-facing operations of a run.
//!
//! The engine only talks to the host through [`HostBackend`], so the
//! attach/mount/launch/teardown sequence can be driven against a
//! recording fake in tests.

pub mod linux;

use std::path::Path;

use tessera_common::error::Result;
use tessera_common::types::{ExitStatus, LoopDevice, MountPoint};
use tessera_core::process::ProcessSpec;

pub use linux::LinuxBackend;

/// Kernel-facing operations the engine needs.
///
/// Implementors perform each operation as one blocking call. Release
/// operations must be safe to call on resources that are already gone.
pub trait HostBackend: Send + Sync {
    /// Binds the image file to a free loop device.
    ///
    /// # Errors
    ///
    /// Returns an error if no device is free or the binding fails.
    fn attach_loop(&self, image: &Path) -> Result<LoopDevice>;

    /// Clears the binding of a loop device.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be cleared.
    fn detach_loop(&self, device: &LoopDevice) -> Result<()>;

    /// Mounts a block device at a fresh directory under `mount_root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the mount fails.
    fn mount_device(&self, device: &Path, mount_root: &Path, fs_type: &str)
    -> Result<MountPoint>;

    /// Unmounts a mount point and removes its directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount fails.
    fn unmount(&self, mount_point: &MountPoint) -> Result<()>;

    /// Starts a process and returns its PID once it has exec'd.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be created or launched.
    fn spawn(&self, spec: &ProcessSpec) -> Result<u32>;

    /// Blocks until the process exits.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be waited for.
    fn wait(&self, pid: u32) -> Result<ExitStatus>;
}

/// Creates the backend for the running host.
#[must_use]
pub fn detect_backend() -> Box<dyn HostBackend> {
    Box::new(LinuxBackend::new())
}
