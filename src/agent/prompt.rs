//! Prompt store: named system prompts with model settings.
//!
//! Prompts normally live in an external prompt-management service; the
//! core only sees the [`PromptProvider`] trait. [`LocalPromptStore`] is
//! the always-available implementation: it loads prompt templates from an
//! on-disk directory and falls back to compiled-in defaults, so the
//! system keeps working when no store is reachable.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// System prompt for the supervisor routing decision.
pub const SUPERVISOR_SYSTEM_PROMPT: &str = r#"You are the supervisor of a multi-agent assistant. You have two specialists:

- LegalExpert: Russian law (civil, criminal, administrative codes, tax law, corporate law).
- AccountingExpert: Russian accounting standards (PBU, FSBU), bookkeeping entries, chart of accounts, tax accounting.

Decide who should handle the user's message:
1. Legal questions (contracts, liability, regulations, taxes as law) → LegalExpert.
2. Accounting questions (bookkeeping, entries, reporting, standards) → AccountingExpert.
3. Greetings, small talk, or anything outside both specializations, or a question that has already been answered → FINISH.

User message:
{{last_user_message}}

Respond with ONLY a JSON object: {"next": "LegalExpert" | "AccountingExpert" | "FINISH"}."#;

/// System prompt for the legal expert.
pub const LEGAL_EXPERT_SYSTEM_PROMPT: &str = r#"You are an experienced lawyer specialized in Russian legislation: the Civil Code, the Criminal Code, the Administrative Offenses Code, tax law, and corporate law.

Rules:
- Use ONLY the provided search tools to find information. Never invent laws or article numbers.
- Cite only material found through the tools. If nothing relevant is found, say so honestly.
- Answer professionally and concisely, with references to the specific provisions you relied on.

Available tools:
- internal_knowledge_search — search the internal legal knowledge base.
- search_legal_code — alias of the same search over legal codes.

Respond with ONLY a JSON object in one of two forms:
1. To search: {"action": "call_tool", "tool": {"tool_name": "internal_knowledge_search", "tool_args": {"queries": ["query 1", "query 2"], "limit": 3}}}
2. To answer: {"action": "final_answer", "content": "your answer", "references": ["title of material used"]}"#;

/// System prompt for the accounting expert.
pub const ACCOUNTING_EXPERT_SYSTEM_PROMPT: &str = r#"You are an experienced accountant specialized in Russian accounting standards (PBU, FSBU), bookkeeping entries, the chart of accounts, and tax accounting.

Rules:
- Use ONLY the provided search tool to find information. Never invent standards or entries.
- Cite only material found through the tool. If nothing relevant is found, say so honestly.
- Answer professionally and concisely, with references to the specific standards you relied on.

Available tools:
- internal_knowledge_search — search the internal accounting knowledge base.

Respond with ONLY a JSON object in one of two forms:
1. To search: {"action": "call_tool", "tool": {"tool_name": "internal_knowledge_search", "tool_args": {"queries": ["query 1", "query 2"], "limit": 3}}}
2. To answer: {"action": "final_answer", "content": "your answer", "references": ["title of material used"]}"#;

/// System prompt for the relevance filter.
pub const RELEVANCE_FILTER_SYSTEM_PROMPT: &str = r#"You extract relevant passages from a document.

Given the search query below and a document, return only the passages of the document that help answer the query, verbatim, in their original language. Do not summarize, do not add commentary, do not add information that is not in the document.

If the document contains nothing that helps answer the query, respond with exactly: NO_ANSWER

Search query:
{{query}}"#;

/// Default prompt directory under user config.
const DEFAULT_PROMPT_DIR: &str = ".config/counsel-rs/prompts";

/// Template filename for each named prompt.
const PROMPT_FILES: &[(&str, &str, &str)] = &[
    (
        "supervisor-system-prompt",
        "supervisor.md",
        SUPERVISOR_SYSTEM_PROMPT,
    ),
    (
        "legal-expert-prompt",
        "legal_expert.md",
        LEGAL_EXPERT_SYSTEM_PROMPT,
    ),
    (
        "accounting-expert-prompt",
        "accounting_expert.md",
        ACCOUNTING_EXPERT_SYSTEM_PROMPT,
    ),
    (
        "relevance-filter-prompt",
        "relevance_filter.md",
        RELEVANCE_FILTER_SYSTEM_PROMPT,
    ),
];

/// Model configuration attached to a prompt.
#[derive(Debug, Clone, Default)]
pub struct ModelSettings {
    /// Model name override.
    pub model: Option<String>,
    /// Temperature override.
    pub temperature: Option<f32>,
    /// Base endpoint override. Honored at provider construction only;
    /// a per-call difference is logged and ignored.
    pub base_url: Option<String>,
}

/// A rendered prompt with its model settings.
#[derive(Debug, Clone)]
pub struct PromptData {
    /// Rendered prompt text.
    pub content: String,
    /// Model settings for calls made with this prompt.
    pub settings: ModelSettings,
}

/// Source of named prompts.
///
/// Implementations must be total: when the underlying store is
/// unreachable they return a usable fallback rather than an error.
#[async_trait]
pub trait PromptProvider: Send + Sync {
    /// Returns the rendered prompt for `name`, substituting `{{key}}`
    /// occurrences with values from `vars`.
    async fn get(&self, name: &str, vars: &[(&str, &str)]) -> PromptData;
}

/// Prompt store backed by an optional template directory with
/// compiled-in fallbacks.
///
/// Resolution order for the directory:
/// 1. Explicit directory (from configuration)
/// 2. `COUNSEL_PROMPT_DIR` environment variable
/// 3. `~/.config/counsel-rs/prompts/`
///
/// Each prompt is loaded independently — a missing file uses its default.
#[derive(Debug, Clone, Default)]
pub struct LocalPromptStore {
    dir: Option<PathBuf>,
    settings: HashMap<String, ModelSettings>,
}

impl LocalPromptStore {
    /// Creates a store rooted at the given directory (or the resolved default).
    #[must_use]
    pub fn new(prompt_dir: Option<&Path>) -> Self {
        let dir = prompt_dir
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("COUNSEL_PROMPT_DIR")
                    .ok()
                    .map(PathBuf::from)
            })
            .or_else(|| dirs::home_dir().map(|h| h.join(DEFAULT_PROMPT_DIR)));

        Self {
            dir,
            settings: HashMap::new(),
        }
    }

    /// Attaches model settings to a named prompt.
    #[must_use]
    pub fn with_settings(mut self, name: impl Into<String>, settings: ModelSettings) -> Self {
        self.settings.insert(name.into(), settings);
        self
    }

    /// Writes the compiled-in default prompts to the given directory.
    ///
    /// Creates the directory if it does not exist. Existing files are
    /// **not** overwritten — use this for initial scaffolding only.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if directory creation or file writing fails.
    pub fn write_defaults(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;

        let mut written = Vec::new();
        for (_, filename, content) in PROMPT_FILES {
            let path = dir.join(filename);
            if !path.exists() {
                std::fs::write(&path, content)?;
                written.push(path);
            }
        }

        Ok(written)
    }

    /// Returns the default prompt directory under the user's home.
    ///
    /// Returns `None` if the home directory cannot be determined.
    #[must_use]
    pub fn default_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(DEFAULT_PROMPT_DIR))
    }

    fn raw_template(&self, name: &str) -> String {
        let entry = PROMPT_FILES.iter().find(|(n, _, _)| *n == name);

        if let Some((_, filename, fallback)) = entry {
            self.dir
                .as_ref()
                .map(|dir| dir.join(filename))
                .and_then(|path| std::fs::read_to_string(&path).ok())
                .unwrap_or_else(|| (*fallback).to_string())
        } else {
            // An unknown prompt name still yields something the model can
            // act on instead of failing the node.
            let mut content = String::new();
            let _ = write!(content, "Prompt '{name}' is not defined.");
            content
        }
    }
}

/// Substitutes `{{key}}` placeholders in a template.
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (key, value) in vars {
        rendered = rendered.replace(&format!("{{{{{key}}}}}"), value);
    }
    rendered
}

#[async_trait]
impl PromptProvider for LocalPromptStore {
    async fn get(&self, name: &str, vars: &[(&str, &str)]) -> PromptData {
        let content = render(&self.raw_template(name), vars);
        let settings = self.settings.get(name).cloned().unwrap_or_default();
        PromptData { content, settings }
    }
}
