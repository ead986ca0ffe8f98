//! UTS namespace isolation.
//!
//! Allows the container to have its own hostname.

use tessera_common::error::{EngineError, Result};

/// Sets the hostname inside the UTS namespace.
///
/// # Errors
///
/// Returns [`EngineError::InitStep`] if `sethostname(2)` fails.
pub fn set_hostname(hostname: &str) -> Result<()> {
    nix::unistd::sethostname(hostname).map_err(|e| EngineError::InitStep {
        step: "sethostname",
        source: e.into(),
    })?;
    tracing::debug!(hostname, "container hostname set");
    Ok(())
}
