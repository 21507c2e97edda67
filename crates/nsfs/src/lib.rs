#![forbid(unsafe_code)]
//! nsfs public API facade.
//!
//! Re-exports the namespace orchestrator from `nsfs-core` through a stable
//! external interface. The CLI depends on this crate.

pub use nsfs_core::*;
