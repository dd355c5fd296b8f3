//! counsel-rs: multi-expert consultation agents.
//!
//! A supervisor inspects the conversation and routes each user question to
//! a specialist expert (legal or accounting) or terminates the turn. Each
//! expert decides whether to query an internal document knowledge base,
//! optionally narrows the retrieved material to relevant passages, and
//! produces a final answer grounded only in what was retrieved.
//!
//! # Architecture
//!
//! ```text
//! User message → Supervisor (route decision)
//!   ├── LegalExpert ──┐
//!   ├── AccountingExpert ─┤  decide → guard → search → filter → answer
//!   └── FINISH        ◄───┘  (every expert returns to the supervisor)
//! ```
//!
//! The LLM is reached through a pluggable [`agent::LlmProvider`]; documents
//! come from a paginated, concurrent [`search::SearchClient`] with
//! collection-specific parsers. No node ever raises across its boundary:
//! failures degrade to a routing FINISH or an apologetic assistant message.

pub mod agent;
pub mod cli;
pub mod error;
pub mod search;

pub use agent::{
    AgentAction, AgentConfig, AgentGraph, AgentState, Expert, LlmProvider, LocalPromptStore,
    Message, PromptProvider, Role, Route, Supervisor, TelemetrySink,
};
pub use error::AgentError;
pub use search::{
    FoundDocument, KnowledgeSearchTool, RelevanceFilter, SearchClient, SearchQueryResults,
};
