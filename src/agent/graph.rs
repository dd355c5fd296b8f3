//! Fixed-topology orchestration graph.
//!
//! Entry → Supervisor; the supervisor's decision conditionally
//! transitions to the named expert or to termination; every expert
//! unconditionally transitions back to the supervisor. No cycle
//! bypasses the supervisor, so its assistant-at-tail rule is the sole
//! loop-termination condition.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::action::Route;
use super::config::AgentConfig;
use super::expert::Expert;
use super::message::Role;
use super::prompt::PromptProvider;
use super::provider::LlmProvider;
use super::state::AgentState;
use super::supervisor::Supervisor;
use super::telemetry::TelemetrySink;
use crate::search::{DocumentRetriever, KnowledgeSearchTool, RelevanceFilter};

/// Collection identifier the legal expert searches in.
const LEGAL_PUBDIVID: i64 = 13;
/// Publication alias for the legal knowledge base.
const LEGAL_PUB_ALIAS: &str = "uss";
/// Collection identifier the accounting expert searches in.
const ACCOUNTING_PUBDIVID: i64 = 1;

/// The compiled supervisor ↔ experts state machine.
pub struct AgentGraph {
    supervisor: Supervisor,
    experts: Vec<Expert>,
}

impl AgentGraph {
    /// Assembles a graph from already-built nodes.
    #[must_use]
    pub fn new(supervisor: Supervisor, experts: Vec<Expert>) -> Self {
        Self {
            supervisor,
            experts,
        }
    }

    /// Assembles the standard two-expert graph: a legal expert over the
    /// legal collection and an accounting expert over the accounting
    /// collection, both sharing one retrieval client.
    #[must_use]
    pub fn standard(
        config: &AgentConfig,
        provider: Arc<dyn LlmProvider>,
        prompts: Arc<dyn PromptProvider>,
        telemetry: Arc<dyn TelemetrySink>,
        retriever: Arc<dyn DocumentRetriever>,
    ) -> Self {
        let legal_search = Arc::new(KnowledgeSearchTool::new(
            Arc::clone(&retriever),
            Some(LEGAL_PUBDIVID),
            Some(LEGAL_PUB_ALIAS.to_string()),
        ));
        let accounting_search = Arc::new(KnowledgeSearchTool::new(
            retriever,
            Some(ACCOUNTING_PUBDIVID),
            None,
        ));

        let make_filter = || {
            config.relevance_filter.then(|| {
                RelevanceFilter::new(Arc::clone(&provider), Arc::clone(&prompts), config)
            })
        };

        let legal = Expert::legal(
            legal_search,
            Arc::clone(&provider),
            Arc::clone(&prompts),
            make_filter(),
            Arc::clone(&telemetry),
            config,
        );
        let accounting = Expert::accounting(
            accounting_search,
            Arc::clone(&provider),
            Arc::clone(&prompts),
            make_filter(),
            Arc::clone(&telemetry),
            config,
        );

        let supervisor = Supervisor::new(
            provider,
            prompts,
            vec![Route::LegalExpert, Route::AccountingExpert],
            config,
        );

        Self::new(supervisor, vec![legal, accounting])
    }

    /// Runs the graph to termination, mutating the state in place.
    pub async fn run(&self, state: &mut AgentState) {
        loop {
            let update = self.supervisor.run(state).await;
            state.apply(update);

            let route = state.next;
            if route == Route::Finish {
                break;
            }

            let Some(expert) = self.experts.iter().find(|e| e.route() == route) else {
                // The conditional edge treats anything unknown as
                // termination, same as FINISH.
                warn!(route = route.node_name(), "no node for route, terminating");
                break;
            };

            debug!(node = expert.name(), "entering expert node");
            let update = expert.run(state).await;
            state.apply(update);
        }
    }

    /// Conversation entry point: one user turn in, the assistant's
    /// final text and the (possibly newly generated) thread id out.
    pub async fn send(&self, text: &str, thread_id: Option<String>) -> (String, String) {
        let thread_id = thread_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        info!(thread_id = %thread_id, "conversation turn started");

        let mut state = AgentState::from_user_text(text);
        self.run(&mut state).await;

        let answer = state
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map_or_else(
                || "Извините, агент не вернул корректный ответ.".to_string(),
                |m| m.content.clone(),
            );

        (answer, thread_id)
    }
}

impl std::fmt::Debug for AgentGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentGraph")
            .field("supervisor", &self.supervisor)
            .field(
                "experts",
                &self.experts.iter().map(Expert::name).collect::<Vec<_>>(),
            )
            .finish()
    }
}
