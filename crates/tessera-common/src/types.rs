//! Domain types exchanged between the engine and its callers.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Location of a backing disk image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Path to the image file on the host.
    pub path: PathBuf,
}

impl Volume {
    /// Creates a volume descriptor for the given image file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// The program to run inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    /// Human-readable name.
    pub name: String,
    /// Executable path, resolved inside the container root.
    pub path: PathBuf,
}

impl Application {
    /// Creates an application descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Per-launch options supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Full argv of the process; `arguments[0]` names the executable.
    pub arguments: Vec<String>,
    /// Environment entries layered on top of the base environment.
    pub environment: BTreeMap<String, String>,
    /// Stay in the host network namespace instead of getting a fresh one.
    pub share_host_network: bool,
    /// Attach the process to a freshly allocated pseudo-terminal.
    pub terminal: bool,
}

/// A loop device bound to a backing file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopDevice {
    /// Device node, e.g. `/dev/loop3`.
    pub device_path: PathBuf,
}

impl LoopDevice {
    /// Returns the device node path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.device_path
    }
}

/// A mounted container root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    /// Randomly generated directory name.
    pub name: String,
    /// Absolute mount path.
    pub path: PathBuf,
}

/// How a container process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitStatus {
    /// Exited normally with the given code.
    Exited(i32),
    /// Terminated by the given signal number.
    Signaled(i32),
}

impl ExitStatus {
    /// Returns `true` for a zero exit code.
    #[must_use]
    pub const fn success(self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Shell-style exit code: the exit code, or `128 + signal`.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signaled(signal) => 128 + signal,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Signaled(signal) => write!(f, "killed by signal {signal}"),
        }
    }
}
