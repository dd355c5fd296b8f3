//! CLI command execution.
//!
//! Wires configuration, the provider, the prompt store, and the
//! retrieval client into a graph and drives it from the terminal.

// Terminal output is this module's job.
#![allow(clippy::print_stdout)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::agent::{
    AgentConfig, AgentGraph, LocalPromptStore, TracingTelemetry, create_provider,
};
use crate::search::{SearchClient, SearchClientConfig};

use super::parser::{Cli, Commands};

/// Demo questions covering both experts and the small-talk path.
const DEMO_SCENARIOS: &[&str] = &[
    "какой срок уплаты НДС",
    "как отразить в учете покупку основного средства",
    "Привет, кто ты?",
];

/// Executes the parsed CLI command.
///
/// # Errors
///
/// Returns an error for configuration problems (missing API key,
/// unbuildable HTTP client, prompt directory I/O). Conversation-level
/// failures never surface here — the graph degrades internally.
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ask {
            message,
            thread,
            no_filter,
        } => {
            let graph = build_graph(cli.prompt_dir, no_filter)?;
            let (answer, thread_id) = graph.send(&message, thread).await;
            println!("{answer}");
            println!("\n[thread: {thread_id}]");
        }
        Commands::Chat { no_filter } => {
            let graph = build_graph(cli.prompt_dir, no_filter)?;
            for (idx, question) in DEMO_SCENARIOS.iter().enumerate() {
                println!("{}", "=".repeat(60));
                println!("Сценарий {}: {question}", idx + 1);
                println!("{}", "=".repeat(60));
                let (answer, _) = graph.send(question, None).await;
                println!("{answer}\n");
            }
        }
        Commands::Prompts { write } => {
            let dir = cli
                .prompt_dir
                .or_else(LocalPromptStore::default_dir)
                .context("cannot determine prompt directory")?;
            if write {
                let written = LocalPromptStore::write_defaults(&dir)
                    .with_context(|| format!("failed to write prompts to {}", dir.display()))?;
                for path in &written {
                    println!("wrote {}", path.display());
                }
                if written.is_empty() {
                    println!("all templates already present in {}", dir.display());
                }
            } else {
                println!("{}", dir.display());
            }
        }
    }
    Ok(())
}

/// Builds the standard graph from environment configuration.
fn build_graph(prompt_dir: Option<PathBuf>, no_filter: bool) -> Result<AgentGraph> {
    let mut builder = AgentConfig::builder().from_env();
    if let Some(dir) = prompt_dir {
        builder = builder.prompt_dir(dir);
    }
    if no_filter {
        builder = builder.relevance_filter(false);
    }
    let config = builder.build().context("agent configuration")?;

    let provider = create_provider(&config).context("LLM provider")?;
    let prompts = Arc::new(LocalPromptStore::new(config.prompt_dir.as_deref()));
    let retriever =
        Arc::new(SearchClient::new(SearchClientConfig::from_env()).context("retrieval client")?);

    Ok(AgentGraph::standard(
        &config,
        provider,
        prompts,
        Arc::new(TracingTelemetry),
        retriever,
    ))
}
