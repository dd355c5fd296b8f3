//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// counsel-rs: multi-expert consultation agents.
///
/// Routes questions to retrieval-grounded legal and accounting experts
/// over the internal document knowledge base.
#[derive(Parser, Debug)]
#[command(name = "counsel-rs")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory with prompt template overrides.
    #[arg(long, env = "COUNSEL_PROMPT_DIR", global = true)]
    pub prompt_dir: Option<PathBuf>,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask one question and print the final answer.
    #[command(after_help = r#"Examples:
  counsel-rs ask "какой срок уплаты НДС"
  counsel-rs ask --thread t-42 "а за какой период?"
  counsel-rs ask --no-filter "Привет, кто ты?"
"#)]
    Ask {
        /// The question text.
        message: String,

        /// Existing conversation thread id (a new one is generated otherwise).
        #[arg(short, long)]
        thread: Option<String>,

        /// Skip the relevance-filter pass over search results.
        #[arg(long)]
        no_filter: bool,
    },

    /// Run the scripted demo scenarios against the live stack.
    Chat {
        /// Skip the relevance-filter pass over search results.
        #[arg(long)]
        no_filter: bool,
    },

    /// Prompt template operations.
    #[command(after_help = r#"Examples:
  counsel-rs prompts           # Show the resolved prompt directory
  counsel-rs prompts --write   # Scaffold the default templates there
"#)]
    Prompts {
        /// Write the default templates into the prompt directory.
        #[arg(long)]
        write: bool,
    },
}
