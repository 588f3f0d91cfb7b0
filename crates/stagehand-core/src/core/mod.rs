//! Internal implementation modules for `stagehand-core`.
//!
//! Callers go through the re-exports in the crate root.

pub mod commands;
pub mod config;
pub mod fs;
pub mod launch;
pub mod pipeline;
pub mod stage;
pub mod tooling;
