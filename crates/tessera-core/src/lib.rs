//! # tessera-core
//!
//! Low-level Linux isolation primitives for the Tessera engine.
//!
//! This crate provides safe abstractions over:
//! - **Loop devices**: binding disk images to `/dev/loopN` and clearing them.
//! - **Filesystem**: mounting container roots, `pivot_root`, device nodes.
//! - **Namespaces**: clone-flag selection, introspection and `setns(2)`.
//! - **Terminals**: pseudo-terminal allocation and termios/window-size ioctls.
//! - **Processes**: launching a chrooted, namespaced child via `clone(2)`.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! proper error handling and `// SAFETY:` documentation.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

#[cfg(not(target_os = "linux"))]
compile_error!("tessera-core only supports Linux");

pub mod filesystem;
pub mod namespace;
pub mod process;
pub mod terminal;
