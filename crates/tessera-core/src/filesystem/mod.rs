//! Filesystem management for container isolation.
//!
//! Provides loop device binding, container root mounting, `pivot_root`
//! for root filesystem switching, and `/dev` population.

pub mod devices;
pub mod loopdev;
pub mod mount;
pub mod pivot_root;
