//! Linux namespace management for container isolation.
//!
//! [`NamespaceSet`] selects the clone flags a container process is created
//! with. [`Namespace`] identifies a namespace of a running process through
//! `/proc/<pid>/ns/<kind>` and can move the calling thread into it with
//! `setns(2)`.

pub mod uts;

use std::fmt;
use std::fs::File;
use std::os::fd::AsFd;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

use nix::sched::{CloneFlags, setns};
use tessera_common::error::{EngineError, Result};
use tessera_common::types::RunOptions;

/// A kind of Linux namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    /// Network stack.
    Network,
    /// System V IPC and POSIX message queues.
    Ipc,
    /// Hostname and domain name.
    Uts,
    /// Mount table.
    Mount,
    /// Process IDs.
    Pid,
    /// User and group IDs.
    User,
    /// Cgroup root.
    Cgroup,
}

impl NamespaceKind {
    /// Every kind, in the order containers are isolated in.
    pub const ALL: [Self; 7] = [
        Self::Network,
        Self::Ipc,
        Self::Uts,
        Self::Mount,
        Self::Pid,
        Self::User,
        Self::Cgroup,
    ];

    /// Entry name under `/proc/<pid>/ns/`.
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Network => "net",
            Self::Ipc => "ipc",
            Self::Uts => "uts",
            Self::Mount => "mnt",
            Self::Pid => "pid",
            Self::User => "user",
            Self::Cgroup => "cgroup",
        }
    }

    /// The `CLONE_NEW*` flag for this kind.
    #[must_use]
    pub const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::Network => CloneFlags::CLONE_NEWNET,
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::Uts => CloneFlags::CLONE_NEWUTS,
            Self::Mount => CloneFlags::CLONE_NEWNS,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::User => CloneFlags::CLONE_NEWUSER,
            Self::Cgroup => CloneFlags::CLONE_NEWCGROUP,
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proc_name())
    }
}

impl std::str::FromStr for NamespaceKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.proc_name() == s)
            .ok_or_else(|| EngineError::Config {
                message: format!("unknown namespace kind: {s}"),
            })
    }
}

/// The set of namespaces a container process is created in.
///
/// Fixed at process creation: a running process cannot be moved into a
/// different set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceSet {
    flags: CloneFlags,
}

impl NamespaceSet {
    /// Mount, PID, IPC, UTS and (unless `share_host_network`) network.
    #[must_use]
    pub fn for_container(share_host_network: bool) -> Self {
        let mut flags = CloneFlags::CLONE_NEWNS
            | CloneFlags::CLONE_NEWPID
            | CloneFlags::CLONE_NEWIPC
            | CloneFlags::CLONE_NEWUTS;
        if !share_host_network {
            flags |= CloneFlags::CLONE_NEWNET;
        }
        Self { flags }
    }

    /// Derives the set from the caller's run options.
    #[must_use]
    pub fn from_options(options: &RunOptions) -> Self {
        Self::for_container(options.share_host_network)
    }

    /// Returns whether the set isolates the given kind.
    #[must_use]
    pub const fn contains(&self, kind: NamespaceKind) -> bool {
        self.flags.contains(kind.clone_flag())
    }

    /// Kinds in the set.
    pub fn kinds(&self) -> impl Iterator<Item = NamespaceKind> + '_ {
        NamespaceKind::ALL
            .into_iter()
            .filter(|kind| self.contains(*kind))
    }

    /// Raw flags for `clone(2)`.
    #[must_use]
    pub const fn clone_flags(&self) -> CloneFlags {
        self.flags
    }
}

/// A namespace of a running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    /// Path of the namespace file, `/proc/<pid>/ns/<kind>`.
    pub path: PathBuf,
    /// Inode number, the namespace's stable identity.
    pub id: u64,
    /// Namespace kind.
    pub kind: NamespaceKind,
}

impl Namespace {
    /// Opens the namespace file, keeping it valid even if the process exits.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the file cannot be opened.
    pub fn open(&self) -> Result<NamespaceFile> {
        let file = File::open(&self.path).map_err(|e| EngineError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(NamespaceFile {
            file,
            path: self.path.clone(),
        })
    }
}

/// An open namespace file descriptor.
#[derive(Debug)]
pub struct NamespaceFile {
    file: File,
    path: PathBuf,
}

impl NamespaceFile {
    /// Moves the calling thread into this namespace.
    ///
    /// The switch is thread-scoped and only undone by another `setns(2)`,
    /// so callers should only do this on a thread they own exclusively.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NamespaceJoinFailed`] if `setns(2)` fails.
    pub fn enter(&self) -> Result<()> {
        setns(self.file.as_fd(), CloneFlags::empty()).map_err(|e| {
            EngineError::NamespaceJoinFailed {
                path: self.path.clone(),
                source: e.into(),
            }
        })?;
        tracing::debug!(path = %self.path.display(), "joined namespace");
        Ok(())
    }
}

/// Locates the namespace of the given kind that process `pid` belongs to.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if `/proc/<pid>/ns/<kind>` cannot be stat'ed.
pub fn find_by_pid(kind: NamespaceKind, pid: u32) -> Result<Namespace> {
    let path = PathBuf::from(format!("/proc/{pid}/ns/{}", kind.proc_name()));
    let metadata = std::fs::metadata(&path).map_err(|e| EngineError::Io {
        path: path.clone(),
        source: e,
    })?;
    Ok(Namespace {
        path,
        id: metadata.ino(),
        kind,
    })
}

/// Opens a namespace and moves the calling thread into it.
///
/// # Errors
///
/// Returns an error if the namespace file cannot be opened or `setns(2)` fails.
pub fn join(namespace: &Namespace) -> Result<()> {
    namespace.open()?.enter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolated_network_includes_all_five_kinds() {
        let set = NamespaceSet::for_container(false);
        for kind in [
            NamespaceKind::Network,
            NamespaceKind::Mount,
            NamespaceKind::Pid,
            NamespaceKind::Ipc,
            NamespaceKind::Uts,
        ] {
            assert!(set.contains(kind), "{kind} missing");
        }
        assert_eq!(set.kinds().count(), 5);
    }

    #[test]
    fn shared_network_drops_only_network_flag() {
        let set = NamespaceSet::for_container(true);
        assert!(!set.contains(NamespaceKind::Network));
        assert!(set.contains(NamespaceKind::Mount));
        assert!(set.contains(NamespaceKind::Pid));
        assert!(set.contains(NamespaceKind::Ipc));
        assert!(set.contains(NamespaceKind::Uts));
        assert!(!set.clone_flags().contains(CloneFlags::CLONE_NEWNET));
    }

    #[test]
    fn user_and_cgroup_never_selected() {
        for share in [true, false] {
            let set = NamespaceSet::for_container(share);
            assert!(!set.contains(NamespaceKind::User));
            assert!(!set.contains(NamespaceKind::Cgroup));
        }
    }

    #[test]
    fn from_options_follows_share_flag() {
        let options = RunOptions {
            share_host_network: true,
            ..RunOptions::default()
        };
        assert_eq!(
            NamespaceSet::from_options(&options),
            NamespaceSet::for_container(true)
        );
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in NamespaceKind::ALL {
            assert_eq!(kind.proc_name().parse::<NamespaceKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<NamespaceKind>().is_err());
    }

    #[test]
    fn find_own_uts_namespace() {
        let ns = find_by_pid(NamespaceKind::Uts, std::process::id()).unwrap();
        assert_eq!(ns.kind, NamespaceKind::Uts);
        assert!(ns.id > 0);
        assert!(ns.path.ends_with("ns/uts"));
    }

    #[test]
    fn own_namespaces_are_stable() {
        let pid = std::process::id();
        let first = find_by_pid(NamespaceKind::Mount, pid).unwrap();
        let second = find_by_pid(NamespaceKind::Mount, pid).unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn find_missing_process_fails() {
        assert!(find_by_pid(NamespaceKind::Pid, u32::MAX).is_err());
    }
}
