//! Error types for the agent and retrieval layers.
//!
//! Every fallible operation in the crate returns [`AgentError`]. Node
//! boundaries (supervisor, experts) catch these and degrade to safe
//! defaults instead of propagating.

use thiserror::Error;

/// Errors produced by the agent system and the retrieval pipeline.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No API key was configured for the LLM provider.
    #[error("no API key configured (set OPENAI_API_KEY or COUNSEL_API_KEY)")]
    ApiKeyMissing,

    /// The configured provider name has no implementation.
    #[error("unsupported provider: {name}")]
    UnsupportedProvider {
        /// The unknown provider name.
        name: String,
    },

    /// An LLM API request failed.
    #[error("API request failed: {message}")]
    ApiRequest {
        /// Provider error description.
        message: String,
        /// HTTP status code, when one was received.
        status: Option<u16>,
    },

    /// A model response could not be parsed into the expected schema.
    #[error("failed to parse model response: {message}")]
    ResponseParse {
        /// What went wrong during parsing.
        message: String,
        /// The raw response content, for diagnostics.
        content: String,
    },

    /// A search-page or document fetch failed at the transport level.
    #[error("fetch failed: {message}")]
    Fetch {
        /// Transport error description.
        message: String,
    },

    /// A response arrived with a non-JSON content type.
    #[error("unexpected content-type {content_type:?}: {snippet}")]
    UnexpectedContentType {
        /// The content-type header value received.
        content_type: String,
        /// A short body excerpt for diagnostics.
        snippet: String,
    },

    /// A search response did not have the expected payload shape.
    #[error("malformed search response: {message}")]
    MalformedResponse {
        /// What was missing or mis-shaped.
        message: String,
    },

    /// A tool invocation failed.
    #[error("tool '{name}' failed: {message}")]
    ToolExecution {
        /// Name of the tool that failed.
        name: String,
        /// Failure description.
        message: String,
    },

    /// A graph-level coordination failure.
    #[error("orchestration error: {message}")]
    Orchestration {
        /// Failure description.
        message: String,
    },
}
