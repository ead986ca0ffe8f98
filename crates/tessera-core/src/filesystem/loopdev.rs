//! Loop device management.
//!
//! Binds a regular file (a disk image) to a free `/dev/loopN` node so it
//! can be mounted as a block device, and clears the binding afterwards.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use tessera_common::constants::{LOOP_CONTROL_PATH, LOOP_DEVICE_PREFIX};
use tessera_common::error::{EngineError, Result};
use tessera_common::types::LoopDevice;

/// `LOOP_SET_FD` ioctl request.
pub const LOOP_SET_FD: u32 = 0x4C00;
/// `LOOP_CLR_FD` ioctl request.
pub const LOOP_CLR_FD: u32 = 0x4C01;
/// `LOOP_CONFIGURE` ioctl request (Linux 5.8+).
pub const LOOP_CONFIGURE: u32 = 0x4C0A;
/// `LOOP_CTL_GET_FREE` ioctl request on `/dev/loop-control`.
pub const LOOP_CTL_GET_FREE: u32 = 0x4C82;

const LO_NAME_SIZE: usize = 64;
const LO_KEY_SIZE: usize = 32;

/// Kernel `struct loop_info64`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LoopInfo64 {
    lo_device: u64,
    lo_inode: u64,
    lo_rdevice: u64,
    lo_offset: u64,
    lo_sizelimit: u64,
    lo_number: u32,
    lo_encrypt_type: u32,
    lo_encrypt_key_size: u32,
    lo_flags: u32,
    lo_file_name: [u8; LO_NAME_SIZE],
    lo_crypt_name: [u8; LO_NAME_SIZE],
    lo_encrypt_key: [u8; LO_KEY_SIZE],
    lo_init: [u64; 2],
}

impl LoopInfo64 {
    const fn zeroed() -> Self {
        Self {
            lo_device: 0,
            lo_inode: 0,
            lo_rdevice: 0,
            lo_offset: 0,
            lo_sizelimit: 0,
            lo_number: 0,
            lo_encrypt_type: 0,
            lo_encrypt_key_size: 0,
            lo_flags: 0,
            lo_file_name: [0; LO_NAME_SIZE],
            lo_crypt_name: [0; LO_NAME_SIZE],
            lo_encrypt_key: [0; LO_KEY_SIZE],
            lo_init: [0; 2],
        }
    }

    /// Returns the recorded backing file name, up to the first NUL.
    #[must_use]
    pub fn file_name(&self) -> &[u8] {
        let end = self
            .lo_file_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(LO_NAME_SIZE);
        &self.lo_file_name[..end]
    }
}

/// Kernel `struct loop_config`, the argument of `LOOP_CONFIGURE`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    fd: u32,
    block_size: u32,
    info: LoopInfo64,
    reserved: [u64; 8],
}

impl LoopConfig {
    /// Builds a configuration binding `backing_fd`, recording `image` as
    /// the backing file name (truncated to fit, always NUL-terminated).
    #[must_use]
    pub fn new(backing_fd: u32, image: &Path) -> Self {
        let mut info = LoopInfo64::zeroed();
        let name = image.as_os_str().as_encoded_bytes();
        let len = name.len().min(LO_NAME_SIZE - 1);
        info.lo_file_name[..len].copy_from_slice(&name[..len]);
        Self {
            fd: backing_fd,
            block_size: 0,
            info,
            reserved: [0; 8],
        }
    }

    /// Returns the embedded `loop_info64`.
    #[must_use]
    pub const fn info(&self) -> &LoopInfo64 {
        &self.info
    }
}

mod ioctl {
    use super::{LOOP_CLR_FD, LOOP_CONFIGURE, LOOP_CTL_GET_FREE, LOOP_SET_FD, LoopConfig};

    nix::ioctl_none_bad!(loop_ctl_get_free, LOOP_CTL_GET_FREE);
    nix::ioctl_write_int_bad!(loop_set_fd, LOOP_SET_FD);
    nix::ioctl_none_bad!(loop_clr_fd, LOOP_CLR_FD);
    nix::ioctl_write_ptr_bad!(loop_configure, LOOP_CONFIGURE, LoopConfig);
}

fn open_rw(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}

/// Asks the loop control device for a free loop device node.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if the control device cannot be opened and
/// [`EngineError::DeviceUnavailable`] if the kernel has no free slot.
pub fn find_free_device() -> Result<PathBuf> {
    let control = open_rw(Path::new(LOOP_CONTROL_PATH)).map_err(|e| EngineError::Io {
        path: LOOP_CONTROL_PATH.into(),
        source: e,
    })?;

    // SAFETY: `control` is an open descriptor to /dev/loop-control and
    // LOOP_CTL_GET_FREE takes no argument.
    let number = unsafe { ioctl::loop_ctl_get_free(control.as_raw_fd()) }.map_err(|e| {
        EngineError::DeviceUnavailable {
            source: e.into(),
        }
    })?;

    Ok(PathBuf::from(format!("{LOOP_DEVICE_PREFIX}{number}")))
}

/// Binds `backing` to the open loop device `device`.
///
/// Tries `LOOP_CONFIGURE` first and falls back to `LOOP_SET_FD` on kernels
/// that do not know it.
fn bind(device: &File, backing: &File, image: &Path) -> std::result::Result<(), Errno> {
    let backing_fd = backing.as_raw_fd();
    let config = LoopConfig::new(backing_fd.unsigned_abs(), image);

    // SAFETY: both descriptors are open for the duration of the call and
    // `config` is a fully initialised `struct loop_config`.
    match unsafe { ioctl::loop_configure(device.as_raw_fd(), &raw const config) } {
        Ok(_) => {
            tracing::debug!(
                backing = %String::from_utf8_lossy(config.info().file_name()),
                "loop device configured"
            );
            Ok(())
        }
        Err(Errno::EINVAL | Errno::ENOTTY) => {
            tracing::debug!("LOOP_CONFIGURE unsupported, falling back to LOOP_SET_FD");
            // SAFETY: LOOP_SET_FD takes the backing descriptor as its argument.
            unsafe { ioctl::loop_set_fd(device.as_raw_fd(), backing_fd) }.map(drop)
        }
        Err(e) => Err(e),
    }
}

/// Attaches the image file to a free loop device.
///
/// Every descriptor opened here is closed before returning; the binding
/// itself lives on in the kernel and is referenced by device path only.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if the image or device node cannot be opened,
/// [`EngineError::DeviceUnavailable`] if no loop slot is free, and
/// [`EngineError::AttachFailed`] if the kernel refuses the binding.
pub fn attach(image: &Path) -> Result<LoopDevice> {
    let backing = open_rw(image).map_err(|e| EngineError::Io {
        path: image.to_path_buf(),
        source: e,
    })?;

    let device_path = find_free_device()?;
    let device = open_rw(&device_path).map_err(|e| EngineError::Io {
        path: device_path.clone(),
        source: e,
    })?;

    bind(&device, &backing, image).map_err(|e| EngineError::AttachFailed {
        image: image.to_path_buf(),
        device: device_path.clone(),
        source: e.into(),
    })?;

    tracing::info!(image = %image.display(), device = %device_path.display(), "loop device attached");
    Ok(LoopDevice { device_path })
}

/// Clears the backing-file binding of a loop device.
///
/// Clearing a device that is not bound (`ENXIO`) is treated as success.
///
/// # Errors
///
/// Returns [`EngineError::DetachFailed`] if the device cannot be opened or
/// the kernel refuses to clear it.
pub fn detach(device: &LoopDevice) -> Result<()> {
    let path = device.path();
    let file = open_rw(path).map_err(|e| EngineError::DetachFailed {
        device: path.to_path_buf(),
        source: e,
    })?;

    // SAFETY: `file` is an open descriptor to a loop device node and
    // LOOP_CLR_FD takes no argument.
    match unsafe { ioctl::loop_clr_fd(file.as_raw_fd()) } {
        Ok(_) => {
            tracing::info!(device = %path.display(), "loop device detached");
            Ok(())
        }
        Err(Errno::ENXIO) => {
            tracing::debug!(device = %path.display(), "loop device was not bound");
            Ok(())
        }
        Err(e) => Err(EngineError::DetachFailed {
            device: path.to_path_buf(),
            source: e.into(),
        }),
    }
}
