//! Command-line interface for interview-queue.
//!
//! Provides operator commands for inspecting stream health, trimming and
//! recovering stuck consumer groups.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
