//! Document retrieval, parsing, and the knowledge search capability.
//!
//! The pipeline that turns a query string into LLM-consumable text:
//!
//! ```text
//! query → SearchClient (pages + document bodies, concurrent)
//!       → DocumentParser (JSON- or XML-flavored by collection)
//!       → KnowledgeSearchTool (truncate, format, retain structured set)
//!       → RelevanceFilter (optional per-document LLM narrowing)
//! ```

pub mod client;
pub mod parser;
pub mod relevance;
pub mod schema;
pub mod tool;

pub use client::{DocumentRetriever, SearchClient, SearchClientConfig};
pub use parser::{DocumentParser, JsonDocumentParser, XmlDocumentParser, parser_for};
pub use relevance::{NO_ANSWER_SENTINEL, RelevanceFilter};
pub use schema::{SearchItem, SearchParams, SearchResult};
pub use tool::{
    FoundDocument, INTERNAL_KNOWLEDGE_SEARCH, KnowledgeSearchTool, MAX_DOC_CHARS,
    SEARCH_LEGAL_CODE, SearchQueryResults, TRUNCATION_MARKER,
};
