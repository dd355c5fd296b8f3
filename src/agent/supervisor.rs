//! Supervisor node: routing decisions over the conversation.
//!
//! The supervisor recomputes the routing pointer on every visit. Two
//! rules are deterministic and never touch the model: an assistant
//! message at the tail means an expert just answered (FINISH, otherwise
//! the expert↔supervisor cycle never ends), and a history without a
//! user message has nothing to route. Everything else is a structured
//! model decision constrained to the registered expert set. Routing
//! failures never propagate — they degrade to FINISH.

use std::sync::Arc;

use tracing::{debug, warn};

use super::action::{Route, RouteDecision, parse_structured};
use super::config::AgentConfig;
use super::message::{ChatRequest, Role, user_message};
use super::prompt::PromptProvider;
use super::provider::LlmProvider;
use super::state::{AgentState, StateUpdate};
use crate::error::AgentError;

/// Name of the supervisor's prompt in the prompt store.
const SUPERVISOR_PROMPT: &str = "supervisor-system-prompt";

/// The routing decision-maker.
pub struct Supervisor {
    provider: Arc<dyn LlmProvider>,
    prompts: Arc<dyn PromptProvider>,
    registered: Vec<Route>,
    model: String,
    max_tokens: u32,
}

impl Supervisor {
    /// Creates a supervisor constrained to the given expert routes.
    #[must_use]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        prompts: Arc<dyn PromptProvider>,
        registered: Vec<Route>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            provider,
            prompts,
            registered,
            model: config.supervisor_model.clone(),
            max_tokens: config.supervisor_max_tokens,
        }
    }

    /// Runs one routing decision. Never fails: errors degrade to FINISH.
    pub async fn run(&self, state: &AgentState) -> StateUpdate {
        let route = match self.try_route(state).await {
            Ok(route) => route,
            Err(e) => {
                warn!(error = %e, "supervisor failed, finishing the turn");
                Route::Finish
            }
        };
        debug!(decision = route.node_name(), "supervisor decision");
        StateUpdate::route(route)
    }

    async fn try_route(&self, state: &AgentState) -> Result<Route, AgentError> {
        // An expert just answered. Route back to it only with new input;
        // since none arrived, finish.
        if state
            .last_message()
            .is_some_and(|m| m.role == Role::Assistant)
        {
            return Ok(Route::Finish);
        }

        let Some(last_user) = state.last_user_message() else {
            return Ok(Route::Finish);
        };

        let prompt = self
            .prompts
            .get(SUPERVISOR_PROMPT, &[("last_user_message", last_user)])
            .await;

        let request = ChatRequest {
            model: prompt
                .settings
                .model
                .clone()
                .unwrap_or_else(|| self.model.clone()),
            messages: vec![user_message(&prompt.content)],
            temperature: prompt.settings.temperature.or(Some(0.0)),
            max_tokens: Some(self.max_tokens),
            json_mode: true,
        };

        let response = self.provider.chat(&request).await?;
        let decision = parse_structured::<RouteDecision>(&response.content)?;

        // The schema already constrains the value; membership in the
        // registered set guards against experts absent from this graph.
        if decision.next != Route::Finish && !self.registered.contains(&decision.next) {
            warn!(decision = decision.next.node_name(), "unregistered expert chosen, finishing");
            return Ok(Route::Finish);
        }

        Ok(decision.next)
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("registered", &self.registered)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}
