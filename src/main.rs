//! Binary entry point for counsel-rs.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use counsel_rs::cli::{Cli, execute};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    execute(cli).await
}

/// Initializes the tracing subscriber. Diagnostics go to stderr so
/// stdout stays clean for command output.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "counsel_rs=debug"
    } else {
        "counsel_rs=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
