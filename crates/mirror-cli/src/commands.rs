//! Subcommand implementations.

pub mod refresh;
pub mod resources;
pub mod snapshot;
