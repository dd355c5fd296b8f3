//! Relevance filter: second-pass narrowing of retrieved documents.
//!
//! Each (query, document) pair gets a dedicated language-model call that
//! strips the document down to the passages answering that query. All
//! pairs run concurrently. The filter only ever removes: a document is
//! dropped when the model returns nothing useful or the call fails, and
//! queries left without documents are dropped from the mapping.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, warn};

use super::tool::{FoundDocument, SearchQueryResults};
use crate::agent::config::AgentConfig;
use crate::agent::message::{ChatRequest, system_message, user_message};
use crate::agent::prompt::PromptProvider;
use crate::agent::provider::LlmProvider;

/// Sentinel the filter model returns when a document holds nothing
/// relevant to the query.
pub const NO_ANSWER_SENTINEL: &str = "NO_ANSWER";

/// Name of the filter's prompt in the prompt store.
const FILTER_PROMPT: &str = "relevance-filter-prompt";

/// LLM-backed relevance filter over search results.
pub struct RelevanceFilter {
    provider: Arc<dyn LlmProvider>,
    prompts: Arc<dyn PromptProvider>,
    model: String,
    max_tokens: u32,
}

impl RelevanceFilter {
    /// Creates a filter using the configured filter model.
    #[must_use]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        prompts: Arc<dyn PromptProvider>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            provider,
            prompts,
            model: config.filter_model.clone(),
            max_tokens: config.filter_max_tokens,
        }
    }

    /// Narrows every document to the passages relevant to its query.
    ///
    /// Monotone: the output never contains a document or query absent
    /// from the input, and per-query document counts never grow.
    pub async fn filter(&self, results: &SearchQueryResults) -> SearchQueryResults {
        let pairs: Vec<(&str, &FoundDocument)> = results
            .iter()
            .flat_map(|(query, documents)| documents.iter().map(move |doc| (query, doc)))
            .collect();

        let filtered = join_all(
            pairs
                .iter()
                .map(|(query, doc)| self.filter_one(query, doc)),
        )
        .await;

        let mut surviving: Vec<(&str, FoundDocument)> = Vec::new();
        for ((query, _), kept) in pairs.into_iter().zip(filtered) {
            if let Some(doc) = kept {
                surviving.push((query, doc));
            }
        }

        let mut output = SearchQueryResults::new();
        for (query, _) in results.iter() {
            let documents: Vec<FoundDocument> = surviving
                .iter()
                .filter(|(q, _)| *q == query)
                .map(|(_, doc)| doc.clone())
                .collect();
            if !documents.is_empty() {
                output.insert(query.to_string(), documents);
            }
        }
        output
    }

    /// Filters a single pair. `None` means "drop this document" — on
    /// empty output, the no-answer sentinel, or any call failure.
    async fn filter_one(&self, query: &str, doc: &FoundDocument) -> Option<FoundDocument> {
        let prompt = self.prompts.get(FILTER_PROMPT, &[("query", query)]).await;

        let request = ChatRequest {
            model: prompt
                .settings
                .model
                .clone()
                .unwrap_or_else(|| self.model.clone()),
            messages: vec![system_message(&prompt.content), user_message(&doc.content)],
            temperature: prompt.settings.temperature.or(Some(0.0)),
            max_tokens: Some(self.max_tokens),
            json_mode: false,
        };

        match self.provider.chat(&request).await {
            Ok(response) => {
                let trimmed = response.content.trim();
                if trimmed.is_empty() || trimmed.starts_with(NO_ANSWER_SENTINEL) {
                    debug!(query, title = %doc.title, "document dropped by relevance filter");
                    None
                } else {
                    Some(FoundDocument {
                        content: trimmed.to_string(),
                        ..doc.clone()
                    })
                }
            }
            Err(e) => {
                warn!(query, title = %doc.title, error = %e, "relevance filter call failed, dropping document");
                None
            }
        }
    }
}

impl std::fmt::Debug for RelevanceFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelevanceFilter")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::message::{ChatResponse, TokenUsage};
    use crate::agent::prompt::LocalPromptStore;
    use crate::error::AgentError;
    use async_trait::async_trait;
    use std::path::Path;

    /// Provider that answers from the document text it receives.
    struct ScriptedProvider;

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
            let doc_text = request
                .messages
                .last()
                .map(|m| m.content.as_str())
                .unwrap_or_default();

            let content = match doc_text {
                text if text.contains("нерелевантный") => NO_ANSWER_SENTINEL.to_string(),
                text if text.contains("пустой") => String::new(),
                text if text.contains("сломанный") => {
                    return Err(AgentError::ApiRequest {
                        message: "boom".to_string(),
                        status: Some(500),
                    });
                }
                text => format!("выдержка: {text}"),
            };

            Ok(ChatResponse {
                content,
                usage: TokenUsage::default(),
                finish_reason: Some("stop".to_string()),
            })
        }
    }

    fn doc(id: &str, content: &str) -> FoundDocument {
        FoundDocument {
            title: format!("doc-{id}"),
            url: format!("https://kb.test/doc/{id}"),
            content: content.to_string(),
            source_id: id.to_string(),
        }
    }

    fn filter() -> RelevanceFilter {
        let config = AgentConfig::builder()
            .api_key("test")
            .build()
            .unwrap_or_else(|_| unreachable!());
        RelevanceFilter::new(
            Arc::new(ScriptedProvider),
            Arc::new(LocalPromptStore::new(Some(Path::new("/nonexistent")))),
            &config,
        )
    }

    #[tokio::test]
    async fn test_keeps_relevant_replaces_content() {
        let mut input = SearchQueryResults::new();
        input.insert("q1".to_string(), vec![doc("1", "срок уплаты НДС")]);

        let output = filter().filter(&input).await;
        let docs = output.get("q1").unwrap_or_default();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "выдержка: срок уплаты НДС");
        assert_eq!(docs[0].source_id, "1");
    }

    #[tokio::test]
    async fn test_drops_sentinel_empty_and_failed() {
        let mut input = SearchQueryResults::new();
        input.insert(
            "q1".to_string(),
            vec![
                doc("1", "нерелевантный текст"),
                doc("2", "пустой ответ"),
                doc("3", "сломанный вызов"),
                doc("4", "полезный текст"),
            ],
        );

        let output = filter().filter(&input).await;
        let docs = output.get("q1").unwrap_or_default();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source_id, "4");
    }

    #[tokio::test]
    async fn test_query_with_no_survivors_is_dropped() {
        let mut input = SearchQueryResults::new();
        input.insert("мертвый".to_string(), vec![doc("1", "нерелевантный")]);
        input.insert("живой".to_string(), vec![doc("2", "полезный")]);

        let output = filter().filter(&input).await;
        assert_eq!(output.query_count(), 1);
        assert!(output.get("мертвый").is_none());
        assert!(output.get("живой").is_some());
    }

    #[tokio::test]
    async fn test_monotonicity() {
        let mut input = SearchQueryResults::new();
        input.insert(
            "q1".to_string(),
            vec![doc("1", "полезный"), doc("2", "нерелевантный")],
        );
        input.insert("q2".to_string(), vec![]);

        let output = filter().filter(&input).await;
        // Never adds queries or documents.
        assert!(output.query_count() <= input.query_count());
        for (query, documents) in output.iter() {
            let original = input.get(query).unwrap_or_default();
            assert!(documents.len() <= original.len());
            for doc in documents {
                assert!(original.iter().any(|d| d.source_id == doc.source_id));
            }
        }
    }

    #[tokio::test]
    async fn test_empty_input_stays_empty() {
        let output = filter().filter(&SearchQueryResults::new()).await;
        assert!(output.is_empty());
        assert_eq!(output.query_count(), 0);
    }
}
