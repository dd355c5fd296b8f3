//! Expert control loop.
//!
//! One instance per specialization. Each invocation runs a fixed,
//! strictly sequential staging: decide → guard → act → ground & answer,
//! with concurrency only inside the act stage (search queries, filter
//! calls). The node is a total function over state: any failure
//! anywhere in the loop degrades to a single apologetic assistant
//! message rather than propagating.

use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, warn};

use super::action::{AgentAction, Route, ToolArgs, ToolRequest, parse_structured};
use super::config::AgentConfig;
use super::message::{ChatRequest, Message, Role, assistant_message, system_message, user_message};
use super::prompt::{PromptData, PromptProvider};
use super::provider::LlmProvider;
use super::state::{AgentState, StateUpdate};
use super::telemetry::TelemetrySink;
use crate::error::AgentError;
use crate::search::{
    INTERNAL_KNOWLEDGE_SEARCH, KnowledgeSearchTool, RelevanceFilter, SEARCH_LEGAL_CODE,
    SearchQueryResults,
};

/// Max characters of the user's message reused as a forced search query.
const FORCED_QUERY_MAX_CHARS: usize = 200;

/// Characters of document content included per material in the
/// grounding listing.
const MATERIAL_PREVIEW_CHARS: usize = 2000;

/// A specialization-bound expert node.
pub struct Expert {
    route: Route,
    prompt_name: &'static str,
    /// Alias table: several tool names may resolve to the same
    /// underlying search capability.
    tools: Vec<(&'static str, Arc<KnowledgeSearchTool>)>,
    provider: Arc<dyn LlmProvider>,
    prompts: Arc<dyn PromptProvider>,
    filter: Option<RelevanceFilter>,
    telemetry: Arc<dyn TelemetrySink>,
    model: String,
    max_tokens: u32,
}

impl Expert {
    /// Creates an expert with an explicit tool alias table.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        route: Route,
        prompt_name: &'static str,
        tools: Vec<(&'static str, Arc<KnowledgeSearchTool>)>,
        provider: Arc<dyn LlmProvider>,
        prompts: Arc<dyn PromptProvider>,
        filter: Option<RelevanceFilter>,
        telemetry: Arc<dyn TelemetrySink>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            route,
            prompt_name,
            tools,
            provider,
            prompts,
            filter,
            telemetry,
            model: config.expert_model.clone(),
            max_tokens: config.expert_max_tokens,
        }
    }

    /// The legal expert. Both historical tool names map to the same
    /// search capability.
    #[must_use]
    pub fn legal(
        search: Arc<KnowledgeSearchTool>,
        provider: Arc<dyn LlmProvider>,
        prompts: Arc<dyn PromptProvider>,
        filter: Option<RelevanceFilter>,
        telemetry: Arc<dyn TelemetrySink>,
        config: &AgentConfig,
    ) -> Self {
        Self::new(
            Route::LegalExpert,
            "legal-expert-prompt",
            vec![
                (SEARCH_LEGAL_CODE, Arc::clone(&search)),
                (INTERNAL_KNOWLEDGE_SEARCH, search),
            ],
            provider,
            prompts,
            filter,
            telemetry,
            config,
        )
    }

    /// The accounting expert.
    #[must_use]
    pub fn accounting(
        search: Arc<KnowledgeSearchTool>,
        provider: Arc<dyn LlmProvider>,
        prompts: Arc<dyn PromptProvider>,
        filter: Option<RelevanceFilter>,
        telemetry: Arc<dyn TelemetrySink>,
        config: &AgentConfig,
    ) -> Self {
        Self::new(
            Route::AccountingExpert,
            "accounting-expert-prompt",
            vec![(INTERNAL_KNOWLEDGE_SEARCH, search)],
            provider,
            prompts,
            filter,
            telemetry,
            config,
        )
    }

    /// The route this expert handles.
    #[must_use]
    pub const fn route(&self) -> Route {
        self.route
    }

    /// Node name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.route.node_name()
    }

    /// Runs one invocation of the control loop. Never fails: errors
    /// become a single apologetic assistant message.
    pub async fn run(&self, state: &AgentState) -> StateUpdate {
        match self.try_run(state).await {
            Ok(update) => update,
            Err(e) => {
                error!(expert = self.name(), error = %e, "expert node failed");
                StateUpdate::messages(vec![assistant_message(&format!(
                    "Извините, произошла ошибка при обработке вашего запроса: {e}"
                ))])
            }
        }
    }

    async fn try_run(&self, state: &AgentState) -> Result<StateUpdate, AgentError> {
        let last_user = state.last_user_message().map(str::to_string);
        let last_user_ref = last_user.as_deref().unwrap_or("");

        let prompt = self
            .prompts
            .get(self.prompt_name, &[("last_user_message", last_user_ref)])
            .await;
        if let Some(ref base_url) = prompt.settings.base_url {
            debug!(expert = self.name(), base_url = %base_url, "per-prompt base endpoint ignored at call time");
        }

        let mut action = self.decide(&prompt, state).await?;

        // Guard: an answer with no completed search behind it is not
        // grounded. Force a search from the user's own words.
        if matches!(action, AgentAction::FinalAnswer { .. })
            && !self.has_search_evidence(state)
            && let Some(ref user_text) = last_user
        {
            warn!(
                expert = self.name(),
                "final answer attempted without prior search, forcing tool call"
            );
            let query: String = user_text.chars().take(FORCED_QUERY_MAX_CHARS).collect();
            action = AgentAction::CallTool {
                tool: ToolRequest {
                    tool_name: INTERNAL_KNOWLEDGE_SEARCH.to_string(),
                    tool_args: ToolArgs::single(query),
                },
            };
        }

        match action {
            AgentAction::CallTool { tool } => self.act_and_answer(&prompt, state, &tool).await,
            AgentAction::FinalAnswer {
                content,
                references,
            } => {
                if content.trim().is_empty() {
                    Ok(StateUpdate::messages(vec![assistant_message(
                        "Извините, я не смог определить дальнейшие действия.",
                    )]))
                } else {
                    Ok(StateUpdate::messages(vec![final_answer_message(
                        content, references,
                    )]))
                }
            }
        }
    }

    /// Whether any of this expert's bound tools already ran.
    fn has_search_evidence(&self, state: &AgentState) -> bool {
        self.tools
            .iter()
            .any(|(name, _)| state.has_search_evidence(name))
    }

    fn resolve_tool(&self, name: &str) -> Option<&Arc<KnowledgeSearchTool>> {
        self.tools
            .iter()
            .find(|(alias, _)| *alias == name)
            .map(|(_, tool)| tool)
    }

    fn chat_request(&self, prompt: &PromptData, messages: Vec<Message>) -> ChatRequest {
        ChatRequest {
            model: prompt
                .settings
                .model
                .clone()
                .unwrap_or_else(|| self.model.clone()),
            messages,
            temperature: prompt.settings.temperature.or(Some(0.0)),
            max_tokens: Some(self.max_tokens),
            json_mode: true,
        }
    }

    /// Decide stage: structured action from system prompt + history.
    async fn decide(
        &self,
        prompt: &PromptData,
        state: &AgentState,
    ) -> Result<AgentAction, AgentError> {
        let mut messages = vec![system_message(&prompt.content)];
        messages.extend(state.messages.iter().cloned());

        let response = self.provider.chat(&self.chat_request(prompt, messages)).await?;
        let action = parse_structured::<AgentAction>(&response.content)?;

        match &action {
            AgentAction::CallTool { tool } => debug!(
                expert = self.name(),
                tool = %tool.tool_name,
                queries = ?tool.tool_args.collected_queries(),
                "expert decided to call tool"
            ),
            AgentAction::FinalAnswer { .. } => {
                debug!(expert = self.name(), "expert decided to answer directly");
            }
        }
        Ok(action)
    }

    /// Act stage: run the tool, optionally filter, keep the non-empty
    /// material set, then ground the final answer in it.
    async fn act_and_answer(
        &self,
        prompt: &PromptData,
        state: &AgentState,
        tool_req: &ToolRequest,
    ) -> Result<StateUpdate, AgentError> {
        let (tool_output, structured) = match self.resolve_tool(&tool_req.tool_name) {
            Some(tool) => {
                let output = tool.invoke(&tool_req.tool_args).await;
                let structured = tool.last_results();
                if let Some(ref results) = structured {
                    self.telemetry.event(
                        "search_results_structured",
                        &json!({"search_results": results.to_json()}),
                    );
                }
                (output, structured)
            }
            None => {
                warn!(expert = self.name(), tool = %tool_req.tool_name, "unknown tool requested");
                (
                    format!("Error: Tool '{}' not found.", tool_req.tool_name),
                    None,
                )
            }
        };

        let filtered = match (&self.filter, &structured) {
            (Some(filter), Some(results)) if !results.is_empty() => {
                Some(filter.filter(results).await)
            }
            _ => None,
        };

        // Ground in the filtered set when it survived, else the raw set.
        let retained = match filtered {
            Some(ref f) if !f.is_empty() => filtered.clone(),
            _ => structured.clone(),
        };

        let answer = self
            .ground_and_answer(
                prompt,
                state,
                &tool_req.tool_name,
                &tool_output,
                retained.as_ref(),
            )
            .await?;

        Ok(StateUpdate {
            messages: vec![answer],
            next: None,
            search_results: structured,
            relevant_materials: retained,
        })
    }

    /// Ground & answer stage: re-invoke the model with the retained
    /// materials and a strict grounding instruction.
    async fn ground_and_answer(
        &self,
        prompt: &PromptData,
        state: &AgentState,
        tool_name: &str,
        tool_output: &str,
        materials: Option<&SearchQueryResults>,
    ) -> Result<Message, AgentError> {
        let mut system = prompt.content.clone();
        if let Some(materials) = materials.filter(|m| !m.is_empty()) {
            let _ = write!(
                system,
                "\n\nНАЙДЕННЫЕ МАТЕРИАЛЫ ИЗ ВНУТРЕННЕЙ БАЗЫ ЗНАНИЙ:\n{}\n\n\
                 КРИТИЧЕСКИ ВАЖНО: Твой ответ должен строиться СТРОГО на основе этих \
                 найденных материалов. Используй ТОЛЬКО информацию из материалов выше. \
                 Запрещено добавлять информацию, которой нет в найденных материалах. \
                 В поле 'references' укажи ТОЛЬКО те материалы, которые реально \
                 использованы в ответе (наименования из раздела \"Наименование\" выше).",
                render_materials(materials)
            );
        }

        let mut messages = vec![system_message(&system)];
        messages.extend(state.messages.iter().cloned());
        messages.push(user_message(&format!(
            "Результат выполнения инструмента {tool_name}:\n{tool_output}\n\n\
             КРИТИЧЕСКИ ВАЖНО: Теперь дай финальный ответ, используя СТРОГО ТОЛЬКО \
             информацию из результатов поиска выше. В поле 'references' укажи ТОЛЬКО \
             те материалы, которые реально использованы в ответе."
        )));

        let response = self.provider.chat(&self.chat_request(prompt, messages)).await?;
        let action = parse_structured::<AgentAction>(&response.content)?;

        Ok(match action {
            AgentAction::FinalAnswer {
                content,
                references,
            } if !content.trim().is_empty() => final_answer_message(content, references),
            _ => assistant_message("Извините, не удалось сформировать ответ после поиска."),
        })
    }
}

impl std::fmt::Debug for Expert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expert")
            .field("route", &self.route)
            .field("prompt_name", &self.prompt_name)
            .field(
                "tools",
                &self.tools.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

/// Renders the retained materials for the grounding system prompt,
/// grouped by query.
fn render_materials(materials: &SearchQueryResults) -> String {
    let mut out = String::new();
    for (query, documents) in materials.iter() {
        let _ = write!(out, "\nПоисковый запрос: {query}");
        for (idx, doc) in documents.iter().enumerate() {
            let title = if doc.title.is_empty() {
                "Без названия"
            } else {
                &doc.title
            };
            let url = if doc.url.is_empty() {
                "Нет URL"
            } else {
                &doc.url
            };
            let content: String = doc.content.chars().take(MATERIAL_PREVIEW_CHARS).collect();
            let _ = write!(
                out,
                "\nМатериал {}:\n  Наименование: {title}\n  URL: {url}\n  Содержание:\n{content}",
                idx + 1
            );
        }
        out.push('\n');
    }
    out
}

/// Builds the assistant message for a final answer, appending the
/// reference list when present.
fn final_answer_message(content: String, references: Vec<String>) -> Message {
    let text = if references.is_empty() {
        content.clone()
    } else {
        let refs: String = references
            .iter()
            .map(|r| format!("- {r}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!("{content}\n\nИспользованные материалы:\n{refs}")
    };

    Message {
        role: Role::Assistant,
        content: text,
        action: Some(AgentAction::FinalAnswer {
            content,
            references,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::message::{ChatResponse, TokenUsage};
    use crate::agent::prompt::LocalPromptStore;
    use crate::agent::telemetry::NoopTelemetry;
    use crate::search::schema::{SearchItem, SearchParams, SearchResult};
    use crate::search::DocumentRetriever;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that replays a scripted queue of responses.
    struct QueueProvider {
        responses: Mutex<VecDeque<Result<String, AgentError>>>,
        calls: AtomicUsize,
    }

    impl QueueProvider {
        fn new(responses: Vec<Result<String, AgentError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for QueueProvider {
        fn name(&self) -> &'static str {
            "queue"
        }

        async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .responses
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .pop_front();
            match next {
                Some(Ok(content)) => Ok(ChatResponse {
                    content,
                    usage: TokenUsage::default(),
                    finish_reason: Some("stop".to_string()),
                }),
                Some(Err(e)) => Err(e),
                None => Err(AgentError::ApiRequest {
                    message: "queue exhausted".to_string(),
                    status: None,
                }),
            }
        }
    }

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

    fn search_tool() -> Arc<KnowledgeSearchTool> {
        let results = vec![SearchResult {
            item: SearchItem {
                id: Some("42".to_string()),
                module_id: Some("9".to_string()),
                url: Some("https://kb.test/doc/42".to_string()),
                doc_name: Some("Сроки уплаты НДС".to_string()),
                ..SearchItem::default()
            },
            document: Some(json!({"data": {"text": "НДС уплачивается до 28 числа.", "title": "Сроки уплаты НДС"}})),
            error: None,
        }];
        Arc::new(KnowledgeSearchTool::new(
            Arc::new(StaticRetriever { results }),
            Some(1),
            None,
        ))
    }

    fn expert(provider: Arc<QueueProvider>) -> Expert {
        let config = AgentConfig::builder()
            .api_key("test")
            .relevance_filter(false)
            .build()
            .unwrap_or_else(|_| unreachable!());
        Expert::accounting(
            search_tool(),
            provider,
            Arc::new(LocalPromptStore::new(Some(Path::new("/nonexistent")))),
            None,
            Arc::new(NoopTelemetry),
            &config,
        )
    }

    const CALL_TOOL_JSON: &str = r#"{"action": "call_tool", "tool": {"tool_name": "internal_knowledge_search", "tool_args": {"queries": ["срок уплаты НДС"], "limit": 3}}}"#;
    const FINAL_ANSWER_JSON: &str =
        r#"{"action": "final_answer", "content": "До 28 числа.", "references": ["Сроки уплаты НДС"]}"#;

    #[tokio::test]
    async fn test_call_tool_then_grounded_answer() {
        let provider = Arc::new(QueueProvider::new(vec![
            Ok(CALL_TOOL_JSON.to_string()),
            Ok(FINAL_ANSWER_JSON.to_string()),
        ]));
        let expert = expert(Arc::clone(&provider));

        let state = AgentState::from_user_text("какой срок уплаты НДС");
        let update = expert.run(&state).await;

        assert_eq!(update.messages.len(), 1);
        let answer = &update.messages[0];
        assert_eq!(answer.role, Role::Assistant);
        assert!(answer.content.contains("До 28 числа."));
        assert!(answer.content.contains("Использованные материалы:"));
        assert!(answer.content.contains("- Сроки уплаты НДС"));

        // Raw results carried forward for later turns.
        assert!(update.search_results.is_some_and(|r| !r.is_empty()));
        assert!(update.relevant_materials.is_some_and(|r| !r.is_empty()));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_guard_forces_tool_call_without_evidence() {
        // Model tries to answer directly with no search behind it.
        let provider = Arc::new(QueueProvider::new(vec![
            Ok(r#"{"action": "final_answer", "content": "Выдуманный ответ."}"#.to_string()),
            Ok(FINAL_ANSWER_JSON.to_string()),
        ]));
        let expert = expert(Arc::clone(&provider));

        let state = AgentState::from_user_text("какой срок уплаты НДС");
        let update = expert.run(&state).await;

        // The forced search ran: the grounded second call produced the
        // answer and the artifacts are populated.
        assert_eq!(provider.call_count(), 2);
        assert!(update.search_results.is_some_and(|r| !r.is_empty()));
        assert!(update.messages[0].content.contains("До 28 числа."));
    }

    #[tokio::test]
    async fn test_direct_answer_allowed_with_carried_evidence() {
        let provider = Arc::new(QueueProvider::new(vec![Ok(
            r#"{"action": "final_answer", "content": "Ответ по материалам."}"#.to_string(),
        )]));
        let expert = expert(Arc::clone(&provider));

        let mut state = AgentState::from_user_text("какой срок уплаты НДС");
        let mut carried = SearchQueryResults::new();
        carried.insert(
            "срок уплаты НДС".to_string(),
            vec![crate::search::FoundDocument {
                title: "Сроки".to_string(),
                url: String::new(),
                content: "до 28".to_string(),
                source_id: "42".to_string(),
            }],
        );
        state.relevant_materials = Some(carried);

        let update = expert.run(&state).await;
        assert_eq!(provider.call_count(), 1);
        assert_eq!(update.messages[0].content, "Ответ по материалам.");
    }

    #[tokio::test]
    async fn test_unknown_tool_yields_error_string_result() {
        let provider = Arc::new(QueueProvider::new(vec![
            Ok(r#"{"action": "call_tool", "tool": {"tool_name": "bogus_tool", "tool_args": {}}}"#
                .to_string()),
            Ok(r#"{"action": "final_answer", "content": "Инструмент не найден."}"#.to_string()),
        ]));
        let expert = expert(Arc::clone(&provider));

        let state = AgentState::from_user_text("вопрос");
        let update = expert.run(&state).await;

        // The loop continued: no artifacts, but a grounded call happened
        // with the error string as the tool result.
        assert!(update.search_results.is_none());
        assert_eq!(update.messages[0].content, "Инструмент не найден.");
    }

    #[tokio::test]
    async fn test_provider_failure_becomes_apology() {
        let provider = Arc::new(QueueProvider::new(vec![Err(AgentError::ApiRequest {
            message: "unavailable".to_string(),
            status: Some(503),
        })]));
        let expert = expert(provider);

        let state = AgentState::from_user_text("вопрос");
        let update = expert.run(&state).await;

        assert_eq!(update.messages.len(), 1);
        assert_eq!(update.messages[0].role, Role::Assistant);
        assert!(update.messages[0].content.starts_with("Извините"));
    }

    #[tokio::test]
    async fn test_empty_grounded_answer_becomes_apology() {
        let provider = Arc::new(QueueProvider::new(vec![
            Ok(CALL_TOOL_JSON.to_string()),
            Ok(r#"{"action": "final_answer", "content": ""}"#.to_string()),
        ]));
        let expert = expert(provider);

        let state = AgentState::from_user_text("вопрос");
        let update = expert.run(&state).await;
        assert!(update.messages[0].content.contains("не удалось сформировать ответ"));
    }

    #[test]
    fn test_alias_table_resolution() {
        let provider = Arc::new(QueueProvider::new(vec![]));
        let config = AgentConfig::builder()
            .api_key("test")
            .build()
            .unwrap_or_else(|_| unreachable!());
        let legal = Expert::legal(
            search_tool(),
            provider,
            Arc::new(LocalPromptStore::new(Some(Path::new("/nonexistent")))),
            None,
            Arc::new(NoopTelemetry),
            &config,
        );
        // Both names resolve, and to the same underlying tool.
        let a = legal.resolve_tool(SEARCH_LEGAL_CODE);
        let b = legal.resolve_tool(INTERNAL_KNOWLEDGE_SEARCH);
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(Arc::ptr_eq(
            a.unwrap_or_else(|| unreachable!()),
            b.unwrap_or_else(|| unreachable!())
        ));
        assert!(legal.resolve_tool("bogus").is_none());
    }

    #[test]
    fn test_render_materials_grouped_by_query() {
        let mut materials = SearchQueryResults::new();
        materials.insert(
            "НДС".to_string(),
            vec![crate::search::FoundDocument {
                title: "Сроки".to_string(),
                url: "https://kb.test/doc/1".to_string(),
                content: "до 28 числа".to_string(),
                source_id: "1".to_string(),
            }],
        );
        let rendered = render_materials(&materials);
        assert!(rendered.contains("Поисковый запрос: НДС"));
        assert!(rendered.contains("Материал 1:"));
        assert!(rendered.contains("Наименование: Сроки"));
        assert!(rendered.contains("до 28 числа"));
    }
}
