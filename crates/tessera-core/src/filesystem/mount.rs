//! Mount utilities for container filesystem setup.
//!
//! Mounts a container root device at a freshly named directory on the host,
//! and the pseudo-filesystems (`/proc`, `/sys`, `/dev/pts`) inside the
//! container's namespace.

use std::path::{Path, PathBuf};

use nix::mount::{MntFlags, MsFlags, mount, umount2};
use tessera_common::constants::MOUNT_NAME_LENGTH;
use tessera_common::error::{EngineError, Result};
use tessera_common::types::MountPoint;

const NAME_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generates a random mount directory name of [`MOUNT_NAME_LENGTH`]
/// lowercase alphanumeric characters.
#[must_use]
pub fn generate_mount_name() -> String {
    uuid::Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(MOUNT_NAME_LENGTH)
        .map(|b| char::from(NAME_ALPHABET[usize::from(*b) % NAME_ALPHABET.len()]))
        .collect()
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| EngineError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Mounts a block device at a new randomly named directory under `mount_root`.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if the directory cannot be created and
/// [`EngineError::MountFailed`] if the `mount(2)` syscall fails, in which
/// case the directory is removed again.
pub fn mount_device(device: &Path, mount_root: &Path, fs_type: &str) -> Result<MountPoint> {
    let name = generate_mount_name();
    let path = mount_root.join(&name);
    create_dir(&path)?;

    if let Err(e) = mount(
        Some(device),
        &path,
        Some(fs_type),
        MsFlags::empty(),
        None::<&str>,
    ) {
        if let Err(cleanup) = std::fs::remove_dir(&path) {
            tracing::warn!(path = %path.display(), error = %cleanup, "could not remove mount directory");
        }
        return Err(EngineError::MountFailed {
            source_path: device.to_path_buf(),
            target: path,
            fs_type: fs_type.to_string(),
            source: e.into(),
        });
    }

    tracing::info!(device = %device.display(), path = %path.display(), fs_type, "device mounted");
    Ok(MountPoint { name, path })
}

/// Unmounts a container root and removes its directory.
///
/// Directory removal is best-effort; a leftover empty directory is only
/// logged.
///
/// # Errors
///
/// Returns [`EngineError::UnmountFailed`] if the `umount2(2)` syscall fails.
pub fn unmount(mount_point: &MountPoint) -> Result<()> {
    umount2(&mount_point.path, MntFlags::empty()).map_err(|e| EngineError::UnmountFailed {
        target: mount_point.path.clone(),
        source: e.into(),
    })?;
    tracing::info!(path = %mount_point.path.display(), "device unmounted");

    if let Err(e) = std::fs::remove_dir(&mount_point.path) {
        tracing::warn!(path = %mount_point.path.display(), error = %e, "could not remove mount directory");
    }
    Ok(())
}

/// Mounts a pseudo-filesystem such as `proc` or `sysfs`, creating the
/// target directory if needed.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if the target cannot be created and
/// [`EngineError::MountFailed`] if the syscall fails.
pub fn mount_pseudo(source: &str, target: &Path, fs_type: &str) -> Result<()> {
    create_dir(target)?;
    mount(
        Some(source),
        target,
        Some(fs_type),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(|e| EngineError::MountFailed {
        source_path: PathBuf::from(source),
        target: target.to_path_buf(),
        fs_type: fs_type.to_string(),
        source: e.into(),
    })?;
    tracing::debug!(target = %target.display(), fs_type, "pseudo-filesystem mounted");
    Ok(())
}

/// Creates a bind mount from source to target.
///
/// # Errors
///
/// Returns [`EngineError::MountFailed`] if the `mount(2)` syscall fails.
pub fn bind_mount(source: &Path, target: &Path) -> Result<()> {
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| EngineError::MountFailed {
        source_path: source.to_path_buf(),
        target: target.to_path_buf(),
        fs_type: "bind".into(),
        source: e.into(),
    })?;
    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        "bind mount created"
    );
    Ok(())
}
