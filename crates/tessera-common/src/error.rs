//! Unified error types for the Tessera workspace.
//!
//! Every stage of a container launch maps its failure onto one variant of
//! [`EngineError`], so callers can tell "the container could not be started"
//! apart from "the container ran and failed" ([`EngineError::is_child_failure`]).

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ExitStatus;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The loop control device reported no free loop slot.
    #[error("no free loop device: {source}")]
    DeviceUnavailable {
        /// Underlying kernel error.
        source: std::io::Error,
    },

    /// Binding a backing file to a loop device failed.
    #[error("could not attach {image} to {device}: {source}")]
    AttachFailed {
        /// Backing image file.
        image: PathBuf,
        /// Loop device node.
        device: PathBuf,
        /// Underlying kernel error.
        source: std::io::Error,
    },

    /// Clearing a loop device binding failed.
    #[error("could not detach {device}: {source}")]
    DetachFailed {
        /// Loop device node.
        device: PathBuf,
        /// Underlying kernel error.
        source: std::io::Error,
    },

    /// A `mount(2)` call failed.
    #[error("could not mount {source_path} at {target} ({fs_type}): {source}")]
    MountFailed {
        /// Device or pseudo-filesystem being mounted.
        source_path: PathBuf,
        /// Mount target directory.
        target: PathBuf,
        /// Filesystem type passed to the kernel.
        fs_type: String,
        /// Underlying kernel error.
        source: std::io::Error,
    },

    /// An unmount call failed.
    #[error("could not unmount {target}: {source}")]
    UnmountFailed {
        /// Mount point.
        target: PathBuf,
        /// Underlying kernel error.
        source: std::io::Error,
    },

    /// The container process could not be created or could not exec its target.
    #[error("could not launch {program}: {source}")]
    LaunchFailed {
        /// Program that was being launched.
        program: PathBuf,
        /// Underlying error, from the parent or reported back by the child.
        source: std::io::Error,
    },

    /// Waiting for the container process failed.
    #[error("could not wait for process {pid}: {source}")]
    WaitFailed {
        /// Process being waited for.
        pid: u32,
        /// Underlying kernel error.
        source: std::io::Error,
    },

    /// The container process ran and exited unsuccessfully.
    #[error("container process {status}")]
    ChildFailed {
        /// How the process ended.
        status: ExitStatus,
    },

    /// Pseudo-terminal allocation or a terminal ioctl failed.
    #[error("terminal {operation} failed: {source}")]
    TerminalError {
        /// Terminal operation that failed.
        operation: &'static str,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Switching into an existing namespace failed.
    #[error("could not join namespace {path}: {source}")]
    NamespaceJoinFailed {
        /// Namespace file under `/proc/<pid>/ns/`.
        path: PathBuf,
        /// Underlying kernel error.
        source: std::io::Error,
    },

    /// A step of the in-container init sequence failed.
    #[error("init step '{step}' failed: {source}")]
    InitStep {
        /// Name of the failed step.
        step: &'static str,
        /// Underlying error.
        source: std::io::Error,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl EngineError {
    /// Returns `true` when the container ran but its process failed.
    ///
    /// Every other variant means the container could not be set up,
    /// started, or torn down.
    #[must_use]
    pub const fn is_child_failure(&self) -> bool {
        matches!(self, Self::ChildFailed { .. })
    }

    /// Returns the exit code a front end should terminate with.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::ChildFailed { status } => status.code(),
            _ => 1,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, EngineError>;
