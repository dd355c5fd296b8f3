//! CLI layer for counsel-rs.
//!
//! Provides the command-line interface using clap, with commands for
//! asking questions, running demo scenarios, and managing prompts.

pub mod commands;
pub mod parser;

pub use commands::execute;
pub use parser::{Cli, Commands};
