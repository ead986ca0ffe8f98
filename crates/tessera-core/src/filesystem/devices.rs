//! Character device nodes and `/dev` symlinks for a fresh container root.

use std::path::Path;

use nix::sys::stat::{Mode, SFlag, mknod};
use tessera_common::error::{EngineError, Result};

/// A character device the init sequence recreates in `/dev`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharDevice {
    /// Node path.
    pub path: &'static str,
    /// Major device number.
    pub major: u64,
    /// Minor device number.
    pub minor: u64,
}

impl CharDevice {
    const fn new(path: &'static str, major: u64, minor: u64) -> Self {
        Self { path, major, minor }
    }

    /// Encoded `dev_t` passed to `mknod(2)`.
    #[must_use]
    pub const fn dev(&self) -> u64 {
        encode_dev(self.major, self.minor)
    }
}

/// Encodes a device number the way the kernel's `new_encode_dev` does for
/// the values used here.
#[must_use]
pub const fn encode_dev(major: u64, minor: u64) -> u64 {
    (major << 8) | (minor & 0xff) | ((minor & 0xf_ff00) << 12)
}

/// Character devices created in every container.
pub const CHAR_DEVICES: [CharDevice; 7] = [
    CharDevice::new("/dev/null", 1, 3),
    CharDevice::new("/dev/zero", 1, 5),
    CharDevice::new("/dev/full", 1, 7),
    CharDevice::new("/dev/random", 1, 8),
    CharDevice::new("/dev/urandom", 1, 9),
    CharDevice::new("/dev/tty", 5, 0),
    CharDevice::new("/dev/console", 5, 1),
];

/// `(target, link)` pairs for the canonical `/dev` symlinks.
pub const DEVICE_SYMLINKS: [(&str, &str); 4] = [
    ("/dev/pts/ptmx", "/dev/ptmx"),
    ("/proc/self/fd/0", "/dev/stdin"),
    ("/proc/self/fd/1", "/dev/stdout"),
    ("/proc/self/fd/2", "/dev/stderr"),
];

fn io_error(path: &Path, source: std::io::Error) -> EngineError {
    EngineError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Removes whatever exists at `path`, including dangling symlinks.
fn remove_existing(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(io_error(path, e)),
        _ => Ok(()),
    }
}

/// Creates a character device node with mode `0666`, replacing any
/// existing node.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if the old node cannot be removed or
/// `mknod(2)` fails.
pub fn make_char_device(device: &CharDevice) -> Result<()> {
    let path = Path::new(device.path);
    remove_existing(path)?;
    mknod(
        path,
        SFlag::S_IFCHR,
        Mode::from_bits_truncate(0o666),
        device.dev(),
    )
    .map_err(|e| io_error(path, e.into()))
}

/// Recreates every entry of [`CHAR_DEVICES`].
///
/// # Errors
///
/// Stops at and returns the first failure.
pub fn setup_char_devices() -> Result<()> {
    for device in &CHAR_DEVICES {
        make_char_device(device)?;
        tracing::debug!(path = device.path, "character device created");
    }
    Ok(())
}

/// Creates `link` pointing at `target`, replacing anything already at `link`.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if removal or `symlink(2)` fails.
pub fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    remove_existing(link)?;
    std::os::unix::fs::symlink(target, link).map_err(|e| io_error(link, e))
}

/// Creates every entry of [`DEVICE_SYMLINKS`].
///
/// # Errors
///
/// Stops at and returns the first failure.
pub fn setup_device_symlinks() -> Result<()> {
    for (target, link) in DEVICE_SYMLINKS {
        create_symlink(Path::new(target), Path::new(link))?;
    }
    Ok(())
}
