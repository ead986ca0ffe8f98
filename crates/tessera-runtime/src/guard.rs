//! Scope guards for the host resources a run acquires.
//!
//! Each guard releases its resource exactly once: through `release()` on
//! the normal path, which surfaces the error, or in `Drop` while unwinding,
//! which only logs it.

use std::path::Path;

use tessera_common::error::Result;
use tessera_common::types::{LoopDevice, MountPoint};
use tracing::Span;

use crate::backend::HostBackend;

/// An attached loop device, detached when released or dropped.
pub struct LoopGuard<'a> {
    backend: &'a dyn HostBackend,
    device: LoopDevice,
    attached: bool,
    span: Span,
}

impl<'a> LoopGuard<'a> {
    /// Attaches `image` and guards the resulting device.
    ///
    /// # Errors
    ///
    /// Returns the backend's attach error; nothing is guarded in that case.
    pub fn attach(backend: &'a dyn HostBackend, image: &Path, span: &Span) -> Result<Self> {
        let device = backend.attach_loop(image)?;
        tracing::info!(parent: span, device = %device.path().display(), "loop device attached");
        Ok(Self {
            backend,
            device,
            attached: true,
            span: span.clone(),
        })
    }

    /// The guarded device.
    #[must_use]
    pub const fn device(&self) -> &LoopDevice {
        &self.device
    }

    /// Detaches the device now.
    ///
    /// # Errors
    ///
    /// Returns the backend's detach error.
    pub fn release(mut self) -> Result<()> {
        self.detach()
    }

    fn detach(&mut self) -> Result<()> {
        if !std::mem::replace(&mut self.attached, false) {
            return Ok(());
        }
        self.backend.detach_loop(&self.device)?;
        tracing::info!(parent: &self.span, device = %self.device.path().display(), "loop device detached");
        Ok(())
    }
}

impl Drop for LoopGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            tracing::error!(parent: &self.span, error = %e, "loop device detach failed");
        }
    }
}

/// A mounted container root, unmounted when released or dropped.
pub struct MountGuard<'a> {
    backend: &'a dyn HostBackend,
    mount_point: MountPoint,
    mounted: bool,
    span: Span,
}

impl<'a> MountGuard<'a> {
    /// Mounts `device` under `mount_root` and guards the mount point.
    ///
    /// # Errors
    ///
    /// Returns the backend's mount error; nothing is guarded in that case.
    pub fn mount(
        backend: &'a dyn HostBackend,
        device: &Path,
        mount_root: &Path,
        fs_type: &str,
        span: &Span,
    ) -> Result<Self> {
        let mount_point = backend.mount_device(device, mount_root, fs_type)?;
        tracing::info!(
            parent: span,
            path = %mount_point.path.display(),
            fs_type,
            "container root mounted"
        );
        Ok(Self {
            backend,
            mount_point,
            mounted: true,
            span: span.clone(),
        })
    }

    /// Host path of the mounted root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.mount_point.path
    }

    /// Unmounts now.
    ///
    /// # Errors
    ///
    /// Returns the backend's unmount error.
    pub fn release(mut self) -> Result<()> {
        self.unmount()
    }

    fn unmount(&mut self) -> Result<()> {
        if !std::mem::replace(&mut self.mounted, false) {
            return Ok(());
        }
        self.backend.unmount(&self.mount_point)?;
        tracing::info!(parent: &self.span, path = %self.mount_point.path.display(), "container root unmounted");
        Ok(())
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.unmount() {
            tracing::error!(parent: &self.span, error = %e, "unmount failed");
        }
    }
}
