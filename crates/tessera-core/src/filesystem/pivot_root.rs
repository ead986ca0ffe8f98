//! Root filesystem switching via `pivot_root(2)`.
//!
//! Changes the root mount of the calling mount namespace rather than just
//! the process's view of `/`, then detaches the old root entirely.

use std::path::Path;

use nix::mount::{MntFlags, umount2};
use nix::unistd::chdir;
use tessera_common::error::{EngineError, Result};

use super::mount::bind_mount;

fn step_error(step: &'static str, e: nix::Error) -> EngineError {
    EngineError::InitStep {
        step,
        source: e.into(),
    }
}

/// Switches the root filesystem to `new_root`.
///
/// `new_root` is bind-mounted onto itself so it is a mount point, the old
/// root is parked in `new_root/<staging_dir>`, and is then lazily unmounted
/// and its directory removed.
///
/// # Errors
///
/// Returns an error if the bind mount, `pivot_root(2)`, or the old-root
/// cleanup fails.
pub fn pivot_root(new_root: &Path, staging_dir: &str) -> Result<()> {
    tracing::info!(new_root = %new_root.display(), "performing pivot_root");

    bind_mount(new_root, new_root)?;

    let put_old = new_root.join(staging_dir);
    std::fs::create_dir_all(&put_old).map_err(|e| EngineError::Io {
        path: put_old.clone(),
        source: e,
    })?;

    nix::unistd::pivot_root(new_root, &put_old).map_err(|e| step_error("pivot_root", e))?;
    chdir("/").map_err(|e| step_error("chdir", e))?;

    let old_root = Path::new("/").join(staging_dir);
    umount2(&old_root, MntFlags::MNT_DETACH).map_err(|e| EngineError::UnmountFailed {
        target: old_root.clone(),
        source: e.into(),
    })?;
    std::fs::remove_dir(&old_root).map_err(|e| EngineError::Io {
        path: old_root.clone(),
        source: e,
    })?;

    tracing::debug!("old root detached");
    Ok(())
}
