//! Sandbox container plumbing: run arguments, runtime boundary and SSH upkeep.

pub mod plan;
pub mod runtime;
pub mod ssh;
