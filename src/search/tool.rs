//! Knowledge search capability exposed to experts as a callable tool.
//!
//! Composes the retrieval client and the document parsers: one or more
//! query strings in, a query → documents mapping out. Each document is
//! capped at a fixed character budget to bound prompt size. The tool
//! retains the last structured result set so the calling expert can
//! fetch it again after the string-formatted output has already been
//! embedded in conversation history, without a second network round-trip.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::client::DocumentRetriever;
use super::parser::parser_for;
use super::schema::{SearchParams, SearchResult};
use crate::agent::action::ToolArgs;

/// Canonical name of the knowledge search tool.
pub const INTERNAL_KNOWLEDGE_SEARCH: &str = "internal_knowledge_search";

/// Legacy alias kept for the legal expert's tool table.
pub const SEARCH_LEGAL_CODE: &str = "search_legal_code";

/// Character budget per returned document.
pub const MAX_DOC_CHARS: usize = 4000;

/// Marker appended to content cut at the budget.
pub const TRUNCATION_MARKER: &str = "\n...[Content Truncated]...";

/// A parsed document ready for grounding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundDocument {
    /// Document title.
    pub title: String,
    /// URL the body was fetched from.
    pub url: String,
    /// Parsed plain-text content, capped at [`MAX_DOC_CHARS`].
    pub content: String,
    /// Source document identifier.
    pub source_id: String,
}

/// Ordered mapping from query string to its retrieved documents.
///
/// Queries appear in execution order; a query that yielded nothing is
/// recorded with an empty document list rather than omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQueryResults(Vec<(String, Vec<FoundDocument>)>);

impl SearchQueryResults {
    /// Creates an empty result set.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a query's documents.
    pub fn insert(&mut self, query: String, documents: Vec<FoundDocument>) {
        self.0.push((query, documents));
    }

    /// Documents for a query, if the query was recorded.
    #[must_use]
    pub fn get(&self, query: &str) -> Option<&[FoundDocument]> {
        self.0
            .iter()
            .find(|(q, _)| q == query)
            .map(|(_, docs)| docs.as_slice())
    }

    /// Iterates queries with their documents, in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[FoundDocument])> {
        self.0.iter().map(|(q, docs)| (q.as_str(), docs.as_slice()))
    }

    /// Number of recorded queries (including empty ones).
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.0.len()
    }

    /// Total number of documents across all queries.
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.0.iter().map(|(_, docs)| docs.len()).sum()
    }

    /// `true` when no query produced any document.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.document_count() == 0
    }

    /// JSON payload for telemetry: an ordered array of
    /// `{query, documents}` objects.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.0
                .iter()
                .map(|(query, documents)| json!({"query": query, "documents": documents}))
                .collect(),
        )
    }
}

/// Truncates parsed content to the per-document budget.
fn truncate_content(text: &str) -> String {
    if text.chars().count() <= MAX_DOC_CHARS {
        text.to_string()
    } else {
        let kept: String = text.chars().take(MAX_DOC_CHARS).collect();
        format!("{kept}{TRUNCATION_MARKER}")
    }
}

/// Search tool over the internal document knowledge base.
///
/// One instance per expert specialization: the constructor pins the
/// collection identifier and optional publication alias the expert
/// searches in.
pub struct KnowledgeSearchTool {
    retriever: Arc<dyn DocumentRetriever>,
    default_pubdivid: Option<i64>,
    pub_alias: Option<String>,
    last_results: Mutex<Option<SearchQueryResults>>,
}

impl KnowledgeSearchTool {
    /// Creates a tool scoped to a collection and optional publication alias.
    #[must_use]
    pub fn new(
        retriever: Arc<dyn DocumentRetriever>,
        default_pubdivid: Option<i64>,
        pub_alias: Option<String>,
    ) -> Self {
        Self {
            retriever,
            default_pubdivid,
            pub_alias,
            last_results: Mutex::new(None),
        }
    }

    /// Executes the search and returns formatted document contents.
    ///
    /// Total: failures surface as an error string in the output, never
    /// as an error value. Distinct queries run concurrently.
    pub async fn invoke(&self, args: &ToolArgs) -> String {
        let queries = args.collected_queries();
        if queries.is_empty() {
            return "Error: no search query provided.".to_string();
        }
        let limit = args.effective_limit();

        info!(queries = ?queries, limit, "knowledge search invoked");

        let per_query = join_all(queries.iter().map(|q| self.run_query(q, limit))).await;

        let mut results = SearchQueryResults::new();
        for (query, documents) in queries.into_iter().zip(per_query) {
            results.insert(query, documents);
        }
        log_results(&results);

        let formatted = format_results(&results);

        let mut guard = self
            .last_results
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Some(results);

        formatted
    }

    /// The structured result set from the most recent [`invoke`](Self::invoke).
    #[must_use]
    pub fn last_results(&self) -> Option<SearchQueryResults> {
        self.last_results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs one query against the retrieval client. A failed query is
    /// logged and yields an empty document list.
    async fn run_query(&self, query: &str, limit: usize) -> Vec<FoundDocument> {
        let mut params = SearchParams::for_query(query);
        params.pubdivid = self.default_pubdivid;
        params.pub_alias = self.pub_alias.clone();

        match self.retriever.fetch_search_pages_and_docs(&params, 1).await {
            Ok(results) => Self::documents_from_results(&results, limit),
            Err(e) => {
                warn!(query, error = %e, "search failed for query");
                Vec::new()
            }
        }
    }

    /// Turns the top-`limit` retrieval results into parsed documents.
    ///
    /// Items with a fetch error or a missing body are logged and
    /// skipped; the batch is never aborted.
    fn documents_from_results(results: &[SearchResult], limit: usize) -> Vec<FoundDocument> {
        let mut documents = Vec::new();

        for result in results.iter().take(limit) {
            if let Some(ref error) = result.error {
                warn!(
                    document_id = result.item.id.as_deref().unwrap_or(""),
                    error, "skipping document that failed to fetch"
                );
                continue;
            }
            let Some(ref body) = result.document else {
                continue;
            };

            let parser = parser_for(result.item.pubdivid);

            let parsed_title = parser.title(body);
            let title = if parsed_title.is_empty() {
                result
                    .item
                    .doc_name
                    .clone()
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| "Untitled".to_string())
            } else {
                parsed_title
            };

            documents.push(FoundDocument {
                title,
                url: result.item.url.clone().unwrap_or_default(),
                content: truncate_content(&parser.parse(body)),
                source_id: result.item.id.clone().unwrap_or_default(),
            });
        }

        documents
    }
}

impl std::fmt::Debug for KnowledgeSearchTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeSearchTool")
            .field("default_pubdivid", &self.default_pubdivid)
            .field("pub_alias", &self.pub_alias)
            .finish_non_exhaustive()
    }
}

/// Formats the result set for embedding into conversation history.
fn format_results(results: &SearchQueryResults) -> String {
    let mut entries = Vec::new();
    for (query, documents) in results.iter() {
        for doc in documents {
            entries.push(format!(
                "## Document: {}\nQuery Used: {query}\nSource ID: {}\nURL: {}\nContent:\n{}\n",
                doc.title, doc.source_id, doc.url, doc.content
            ));
        }
    }

    if entries.is_empty() {
        "No documents found matching your query.".to_string()
    } else {
        entries.join("\n---\n")
    }
}

/// Detailed per-query logging of what the search returned.
fn log_results(results: &SearchQueryResults) {
    for (query, documents) in results.iter() {
        info!(query, documents = documents.len(), "search query completed");
        for doc in documents {
            let preview: String = doc.content.chars().take(300).collect::<String>().replace('\n', " ");
            debug!(title = %doc.title, url = %doc.url, preview = %preview, "retrieved document");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::search::schema::SearchItem;
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticRetriever {
        results: Vec<SearchResult>,
    }

    #[async_trait]
    impl DocumentRetriever for StaticRetriever {
        async fn fetch_search_pages_and_docs(
            &self,
            _params: &SearchParams,
            _pages: usize,
        ) -> Result<Vec<SearchResult>, AgentError> {
            Ok(self.results.clone())
        }
    }

    struct FailingRetriever;

    #[async_trait]
    impl DocumentRetriever for FailingRetriever {
        async fn fetch_search_pages_and_docs(
            &self,
            _params: &SearchParams,
            _pages: usize,
        ) -> Result<Vec<SearchResult>, AgentError> {
            Err(AgentError::Fetch {
                message: "connection refused".to_string(),
            })
        }
    }

    fn item(id: &str, name: &str) -> SearchItem {
        SearchItem {
            id: Some(id.to_string()),
            module_id: Some("9".to_string()),
            url: Some(format!("https://kb.test/doc/{id}")),
            doc_name: Some(name.to_string()),
            ..SearchItem::default()
        }
    }

    fn ok_result(id: &str, name: &str, text: &str) -> SearchResult {
        SearchResult {
            item: item(id, name),
            document: Some(json!({"data": {"text": text, "title": name}})),
            error: None,
        }
    }

    fn failed_result(id: &str) -> SearchResult {
        SearchResult {
            item: item(id, "недоступный"),
            document: None,
            error: Some("HTTP 502".to_string()),
        }
    }

    fn tool(results: Vec<SearchResult>) -> KnowledgeSearchTool {
        KnowledgeSearchTool::new(Arc::new(StaticRetriever { results }), Some(1), None)
    }

    #[tokio::test]
    async fn test_one_failed_document_never_aborts_the_batch() {
        let tool = tool(vec![
            ok_result("1", "Первый", "текст один"),
            failed_result("2"),
            ok_result("3", "Третий", "текст три"),
        ]);
        let output = tool.invoke(&ToolArgs::single("запрос")).await;
        assert!(output.contains("Первый"));
        assert!(output.contains("Третий"));
        assert!(!output.contains("недоступный"));

        let results = tool.last_results().unwrap_or_default();
        assert_eq!(results.document_count(), 2);
        assert_eq!(
            results
                .get("запрос")
                .map(|docs| docs.iter().map(|d| d.source_id.clone()).collect::<Vec<_>>()),
            Some(vec!["1".to_string(), "3".to_string()])
        );
    }

    #[tokio::test]
    async fn test_zero_document_query_is_recorded() {
        let tool = KnowledgeSearchTool::new(Arc::new(FailingRetriever), Some(1), None);
        let output = tool.invoke(&ToolArgs::single("ничего")).await;
        assert_eq!(output, "No documents found matching your query.");

        let results = tool.last_results().unwrap_or_default();
        assert_eq!(results.query_count(), 1);
        assert_eq!(results.get("ничего").map(<[FoundDocument]>::len), Some(0));
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_no_queries_is_an_error_string() {
        let tool = tool(vec![]);
        let output = tool.invoke(&ToolArgs::default()).await;
        assert!(output.starts_with("Error:"));
        assert!(tool.last_results().is_none());
    }

    #[tokio::test]
    async fn test_limit_caps_documents_per_query() {
        let tool = tool(vec![
            ok_result("1", "a", "x"),
            ok_result("2", "b", "y"),
            ok_result("3", "c", "z"),
        ]);
        let args = ToolArgs {
            queries: Some(vec!["q".to_string()]),
            limit: Some(2),
            query: None,
        };
        tool.invoke(&args).await;
        let results = tool.last_results().unwrap_or_default();
        assert_eq!(results.document_count(), 2);
    }

    #[tokio::test]
    async fn test_idempotent_ordering() {
        let fixtures = vec![
            ok_result("10", "a", "x"),
            ok_result("20", "b", "y"),
            ok_result("30", "c", "z"),
        ];
        let tool = tool(fixtures);
        let args = ToolArgs::single("q");

        tool.invoke(&args).await;
        let first = tool.last_results().unwrap_or_default();
        tool.invoke(&args).await;
        let second = tool.last_results().unwrap_or_default();

        assert_eq!(first, second);
    }

    #[test]
    fn test_truncation_budget_and_marker() {
        let long = "н".repeat(MAX_DOC_CHARS + 500);
        let truncated = truncate_content(&long);
        assert!(truncated.ends_with(TRUNCATION_MARKER));
        let body_chars = truncated.chars().count() - TRUNCATION_MARKER.chars().count();
        assert_eq!(body_chars, MAX_DOC_CHARS);

        let short = "короткий текст";
        assert_eq!(truncate_content(short), short);
    }

    #[test]
    fn test_title_prefers_parsed_then_item_name() {
        let with_title = ok_result("1", "из item", "текст");
        let docs = KnowledgeSearchTool::documents_from_results(&[with_title], 3);
        assert_eq!(docs[0].title, "из item"); // parser found the same name field

        let no_title = SearchResult {
            item: item("2", "только docName"),
            document: Some(json!({"data": {"text": "текст"}})),
            error: None,
        };
        let docs = KnowledgeSearchTool::documents_from_results(&[no_title], 3);
        assert_eq!(docs[0].title, "только docName");
    }

    #[test]
    fn test_results_json_shape() {
        let mut results = SearchQueryResults::new();
        results.insert(
            "q1".to_string(),
            vec![FoundDocument {
                title: "t".to_string(),
                url: "u".to_string(),
                content: "c".to_string(),
                source_id: "1".to_string(),
            }],
        );
        let value = results.to_json();
        assert_eq!(value[0]["query"], "q1");
        assert_eq!(value[0]["documents"][0]["title"], "t");
    }
}
