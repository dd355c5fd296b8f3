//! Supervisor/expert agent system.
//!
//! The routing and tool-augmented answering control loop:
//!
//! ```text
//! User message → Supervisor (structured Route decision)
//!   ├── Expert: decide → guard → act (search + filter) → ground & answer
//!   └── FINISH
//! ```
//!
//! All LLM access goes through the pluggable [`LlmProvider`] trait with
//! JSON-mode structured decoding; prompts come from a [`PromptProvider`]
//! that degrades to compiled-in fallbacks; telemetry is an injected
//! [`TelemetrySink`], never a global.

pub mod action;
pub mod client;
pub mod config;
pub mod expert;
pub mod graph;
pub mod message;
pub mod prompt;
pub mod provider;
pub mod providers;
pub mod state;
pub mod supervisor;
pub mod telemetry;

// Re-export key types
pub use action::{AgentAction, Route, RouteDecision, ToolArgs, ToolRequest};
pub use client::create_provider;
pub use config::AgentConfig;
pub use expert::Expert;
pub use graph::AgentGraph;
pub use message::{ChatRequest, ChatResponse, Message, Role, TokenUsage};
pub use prompt::{LocalPromptStore, ModelSettings, PromptData, PromptProvider};
pub use provider::LlmProvider;
pub use state::{AgentState, StateUpdate};
pub use supervisor::Supervisor;
pub use telemetry::{NoopTelemetry, TelemetrySink, TracingTelemetry};
