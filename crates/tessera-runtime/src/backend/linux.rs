//! Backend that performs every operation with direct Linux syscalls.

use std::path::Path;

use tessera_common::error::Result;
use tessera_common::types::{ExitStatus, LoopDevice, MountPoint};
use tessera_core::filesystem::{loopdev, mount};
use tessera_core::process::{self, ProcessSpec};

use super::HostBackend;

/// Backend that uses loop devices, `mount(2)` and `clone(2)` directly.
///
/// Requires root (or `CAP_SYS_ADMIN`) on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxBackend;

impl LinuxBackend {
    /// Creates a new Linux backend.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HostBackend for LinuxBackend {
    fn attach_loop(&self, image: &Path) -> Result<LoopDevice> {
        loopdev::attach(image)
    }

    fn detach_loop(&self, device: &LoopDevice) -> Result<()> {
        loopdev::detach(device)
    }

    fn mount_device(
        &self,
        device: &Path,
        mount_root: &Path,
        fs_type: &str,
    ) -> Result<MountPoint> {
        mount::mount_device(device, mount_root, fs_type)
    }

    fn unmount(&self, mount_point: &MountPoint) -> Result<()> {
        mount::unmount(mount_point)
    }

    fn spawn(&self, spec: &ProcessSpec) -> Result<u32> {
        process::spawn(spec)
    }

    fn wait(&self, pid: u32) -> Result<ExitStatus> {
        process::wait(pid)
    }
}
