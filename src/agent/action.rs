//! Structured output contracts for supervisor and expert decisions.
//!
//! The LLM is never given native tool-calling. Instead, every decision
//! point requests JSON-mode output and validates it against one of these
//! serde schemas at the boundary. The guard and force-tool-call policies
//! in the expert node operate on the decoded values, independent of any
//! provider tool-calling feature.

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Routing decision produced by the supervisor.
///
/// The set is closed: the model must pick a registered expert or
/// [`Route::Finish`]. Anything else fails to decode and degrades to
/// FINISH at the supervisor boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Route {
    /// Hand the turn to the legal expert.
    LegalExpert,
    /// Hand the turn to the accounting expert.
    AccountingExpert,
    /// Terminate the graph run.
    #[serde(rename = "FINISH")]
    Finish,
}

impl Route {
    /// Node name used in logs for this route.
    #[must_use]
    pub const fn node_name(self) -> &'static str {
        match self {
            Self::LegalExpert => "legal_expert",
            Self::AccountingExpert => "accounting_expert",
            Self::Finish => "__end__",
        }
    }
}

/// Wrapper schema for the supervisor's structured response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    /// The chosen route.
    pub next: Route,
}

/// Arguments for a tool call decided by an expert.
///
/// All fields are optional; `queries` and `query` are merged (deduplicated,
/// order-preserving) before execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolArgs {
    /// Multiple search queries to run concurrently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queries: Option<Vec<String>>,
    /// Per-query result limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Single search query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

/// Default per-query result limit when the model leaves it unset.
pub const DEFAULT_SEARCH_LIMIT: usize = 3;

impl ToolArgs {
    /// Builds args for a single forced query.
    #[must_use]
    pub fn single(query: impl Into<String>) -> Self {
        Self {
            queries: Some(vec![query.into()]),
            limit: Some(DEFAULT_SEARCH_LIMIT),
            query: None,
        }
    }

    /// Merges `queries` and `query` into one deduplicated, ordered list.
    #[must_use]
    pub fn collected_queries(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        let candidates = self
            .queries
            .iter()
            .flatten()
            .chain(self.query.iter())
            .map(|q| q.trim())
            .filter(|q| !q.is_empty());
        for q in candidates {
            if !seen.iter().any(|s| s == q) {
                seen.push(q.to_string());
            }
        }
        seen
    }

    /// The effective per-query limit.
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).max(1)
    }
}

/// A tool invocation request decoded from the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Name of the tool to invoke (validated against the expert's alias table).
    pub tool_name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub tool_args: ToolArgs,
}

/// The structured action an expert's reasoning step must produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentAction {
    /// Call one of the expert's bound tools.
    CallTool {
        /// The requested tool and its arguments.
        tool: ToolRequest,
    },
    /// Produce the final grounded answer.
    FinalAnswer {
        /// Answer text. Must be non-empty to be usable.
        #[serde(default)]
        content: String,
        /// Titles of the materials actually used in the answer.
        #[serde(default)]
        references: Vec<String>,
    },
}

/// Parses a JSON-mode model response into a structured value.
///
/// Strips markdown code fences the model may wrap around the payload
/// before handing the remainder to serde.
///
/// # Errors
///
/// Returns [`AgentError::ResponseParse`] with a short preview of the raw
/// content when the payload does not match the target schema.
pub fn parse_structured<T: serde::de::DeserializeOwned>(content: &str) -> Result<T, AgentError> {
    let trimmed = content.trim();

    let json_str = if trimmed.starts_with("```") {
        trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
    } else {
        trimmed
    };

    serde_json::from_str::<T>(json_str).map_err(|e| {
        let preview: String = json_str.chars().take(200).collect();
        AgentError::ResponseParse {
            message: format!("{e}. Response length: {} bytes, preview: {preview:?}", json_str.len()),
            content: content.to_string(),
        }
    })
}
