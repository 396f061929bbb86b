//! Command-line interface for elitecode-judge.
//!
//! Provides commands for judging submissions, running programs on custom
//! input, importing problems and inspecting stored results.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
