//! Execution engine for the Tessera runtime.
//!
//! [`engine::Engine`] drives a run end to end: attach the image, mount it,
//! launch the application inside new namespaces, wait, then unmount and
//! detach. [`init`] is the first process inside a container and
//! [`exec`] runs commands in the namespaces of a live one.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod engine;
pub mod exec;
pub mod guard;
pub mod init;
pub mod process;
pub mod relay;
pub mod session;
