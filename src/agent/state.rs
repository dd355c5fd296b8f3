//! Graph state passed between supervisor and expert nodes.
//!
//! The state is the single owned value threaded through one graph
//! invocation: an append-only message history, the routing pointer the
//! supervisor recomputes on every visit, and optional search artifacts
//! carried forward so a later turn can ground an answer without
//! re-searching.

use serde::{Deserialize, Serialize};

use super::action::Route;
use super::message::{Message, Role, user_message};
use crate::search::SearchQueryResults;

/// State for one graph invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// Ordered conversation history. Append-only across graph steps.
    pub messages: Vec<Message>,
    /// Routing pointer. Written by the supervisor, never read by experts.
    pub next: Route,
    /// Raw structured search results from the most recent tool run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_results: Option<SearchQueryResults>,
    /// Relevance-filtered materials retained for grounding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant_materials: Option<SearchQueryResults>,
}

/// A node's contribution to the state.
///
/// Nodes are total functions from state to update; the graph merges
/// updates by appending messages and overwriting the optional fields
/// that are present.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    /// Messages to append to history.
    pub messages: Vec<Message>,
    /// New routing pointer, if this node routes.
    pub next: Option<Route>,
    /// Search results to carry forward.
    pub search_results: Option<SearchQueryResults>,
    /// Filtered materials to carry forward.
    pub relevant_materials: Option<SearchQueryResults>,
}

impl StateUpdate {
    /// Update that only appends messages.
    #[must_use]
    pub fn messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Update that only sets the routing pointer.
    #[must_use]
    pub fn route(next: Route) -> Self {
        Self {
            next: Some(next),
            ..Self::default()
        }
    }
}

impl AgentState {
    /// Creates a state holding a single user message.
    #[must_use]
    pub fn from_user_text(text: &str) -> Self {
        Self {
            messages: vec![user_message(text)],
            next: Route::Finish,
            search_results: None,
            relevant_materials: None,
        }
    }

    /// Merges a node's update into the state.
    pub fn apply(&mut self, update: StateUpdate) {
        self.messages.extend(update.messages);
        if let Some(next) = update.next {
            self.next = next;
        }
        if update.search_results.is_some() {
            self.search_results = update.search_results;
        }
        if update.relevant_materials.is_some() {
            self.relevant_materials = update.relevant_materials;
        }
    }

    /// The most recent non-empty user message, if any.
    #[must_use]
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User && !m.content.trim().is_empty())
            .map(|m| m.content.as_str())
    }

    /// The most recent message, if any.
    #[must_use]
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Whether history or carried artifacts show a completed search.
    ///
    /// History does not keep intermediate tool turns, so carried
    /// artifacts are the usual evidence; a tool-result message naming
    /// the tool also counts when one was threaded in.
    #[must_use]
    pub fn has_search_evidence(&self, tool_name: &str) -> bool {
        if self
            .search_results
            .as_ref()
            .is_some_and(|r| !r.is_empty())
            || self
                .relevant_materials
                .as_ref()
                .is_some_and(|r| !r.is_empty())
        {
            return true;
        }
        self.messages
            .iter()
            .any(|m| m.role == Role::Tool && m.content.contains(tool_name))
    }
}
