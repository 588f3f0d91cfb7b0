//! CLI-facing outcome shaping and progress reporting.

pub mod outcome;
pub mod progress;
