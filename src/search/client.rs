//! Concurrent document retrieval client.
//!
//! Fetches search-result pages and the full document bodies behind them.
//! All requests for one logical search run concurrently over a shared
//! connection pool with a bounded connection budget and a fixed timeout.
//! Document bodies route by collection identifier: some collections
//! require the authenticated gateway endpoint, the rest use the public
//! per-document endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::schema::{SearchItem, SearchParams, SearchResult};
use crate::error::AgentError;

/// Collections whose documents must be fetched through the gateway.
pub const GATEWAY_COLLECTIONS: &[i64] = &[3, 13];

/// Per-request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 15;
/// Maximum concurrent connections across one client.
const DEFAULT_MAX_CONNECTIONS: usize = 50;
/// Body excerpt length attached to content-type errors.
const SNIPPET_LEN: usize = 300;

/// Browser-like user agent the backend expects.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Endpoints and limits for the retrieval client.
#[derive(Debug, Clone)]
pub struct SearchClientConfig {
    /// Search-page endpoint.
    pub search_url: String,
    /// Public per-document endpoint.
    pub doc_url: String,
    /// Authenticated gateway endpoint for gateway collections.
    pub gateway_url: String,
    /// Bearer token for the gateway endpoint.
    pub gateway_token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for SearchClientConfig {
    fn default() -> Self {
        Self {
            search_url: "https://site-backend-ss.prod.ss.aservices.tech/api/v1/desktop/search"
                .to_string(),
            doc_url:
                "https://site-backend-ss.prod.ss.aservices.tech/api/v1/desktop/document_get-by-id"
                    .to_string(),
            gateway_url:
                "https://internal-gateway-backend-ss.prod.ss.aservices.tech/api/v1/content/part-doc_get"
                    .to_string(),
            gateway_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl SearchClientConfig {
    /// Builds configuration from environment variables over the defaults.
    ///
    /// Recognized variables: `COUNSEL_SEARCH_URL`, `COUNSEL_DOC_URL`,
    /// `COUNSEL_GATEWAY_URL`, `COUNSEL_GATEWAY_TOKEN`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("COUNSEL_SEARCH_URL") {
            config.search_url = url;
        }
        if let Ok(url) = std::env::var("COUNSEL_DOC_URL") {
            config.doc_url = url;
        }
        if let Ok(url) = std::env::var("COUNSEL_GATEWAY_URL") {
            config.gateway_url = url;
        }
        if let Ok(token) = std::env::var("COUNSEL_GATEWAY_TOKEN") {
            config.gateway_token = Some(token);
        }
        config
    }
}

/// Retrieval seam for the knowledge search tool.
///
/// [`SearchClient`] is the production implementation; tests substitute
/// scripted retrievers.
#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    /// Fetches `pages` search-result pages for `params` and the document
    /// body behind every returned item.
    ///
    /// Per-document failures are recorded on the corresponding
    /// [`SearchResult`] rather than failing the batch.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] when a search page itself cannot be
    /// fetched or has an unexpected shape.
    async fn fetch_search_pages_and_docs(
        &self,
        params: &SearchParams,
        pages: usize,
    ) -> Result<Vec<SearchResult>, AgentError>;
}

/// HTTP client for the document search and content APIs.
pub struct SearchClient {
    http: reqwest::Client,
    limiter: Arc<Semaphore>,
    config: SearchClientConfig,
}

impl SearchClient {
    /// Creates a client with a shared pool, default headers, and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Fetch`] if the underlying HTTP client
    /// cannot be constructed.
    pub fn new(config: SearchClientConfig) -> Result<Self, AgentError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(REFERER, HeaderValue::from_static("https://1gl.ru/"));
        headers.insert(
            "X-Requested-With",
            HeaderValue::from_static("XMLHttpRequest"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("ru-RU,ru;q=0.9,en;q=0.8"),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.max_connections)
            .build()
            .map_err(|e| AgentError::Fetch {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        let limiter = Arc::new(Semaphore::new(config.max_connections.max(1)));

        Ok(Self {
            http,
            limiter,
            config,
        })
    }

    /// Whether a collection identifier routes through the gateway.
    #[must_use]
    pub fn uses_gateway(pubdivid: Option<i64>) -> bool {
        pubdivid.is_some_and(|p| GATEWAY_COLLECTIONS.contains(&p))
    }

    fn doc_url(&self, module_id: &str, document_id: &str, locale: &str) -> String {
        format!(
            "{}?moduleId={module_id}&documentId={document_id}&locale={locale}",
            self.config.doc_url
        )
    }

    fn gateway_url(&self, module_id: &str, document_id: &str) -> String {
        format!(
            "{}?PubId=9&ModuleId={module_id}&Id={document_id}",
            self.config.gateway_url
        )
    }

    /// Sends a request and decodes the body as JSON after validating the
    /// status and content type. Holds a limiter permit for the duration
    /// of the request to bound concurrent connections.
    async fn get_json(&self, request: reqwest::RequestBuilder) -> Result<Value, AgentError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| AgentError::Fetch {
                message: format!("connection limiter closed: {e}"),
            })?;

        let response = request.send().await.map_err(|e| AgentError::Fetch {
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::Fetch {
                message: format!("HTTP {status}"),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.contains("application/json") {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(SNIPPET_LEN).collect::<String>().replace('\n', " ");
            return Err(AgentError::UnexpectedContentType {
                content_type,
                snippet,
            });
        }

        response.json().await.map_err(|e| AgentError::Fetch {
            message: format!("invalid JSON body: {e}"),
        })
    }

    async fn fetch_page(&self, params: &SearchParams, page: usize) -> Result<Value, AgentError> {
        let mut params = params.clone();
        params.page = Some(page);
        debug!(page, query = params.fstring.as_deref().unwrap_or(""), "fetching search page");
        self.get_json(self.http.get(&self.config.search_url).query(&params))
            .await
    }

    async fn search_pages(
        &self,
        params: &SearchParams,
        pages: usize,
    ) -> Result<Vec<Value>, AgentError> {
        if pages == 0 {
            return Ok(Vec::new());
        }
        let fetches = (1..=pages).map(|page| self.fetch_page(params, page));
        join_all(fetches).await.into_iter().collect()
    }

    /// Extracts search items from a result page, stamping the request's
    /// collection identifier onto each.
    fn extract_items(
        page_json: &Value,
        pubdivid: Option<i64>,
    ) -> Result<Vec<SearchItem>, AgentError> {
        let items = page_json
            .pointer("/data/searchResponse/items")
            .ok_or_else(|| AgentError::MalformedResponse {
                message: "missing data.searchResponse.items".to_string(),
            })?;

        let Some(raw_items) = items.as_array() else {
            return Ok(Vec::new());
        };

        let mut extracted = Vec::with_capacity(raw_items.len());
        for raw in raw_items {
            match serde_json::from_value::<SearchItem>(raw.clone()) {
                Ok(mut item) => {
                    item.pubdivid = pubdivid;
                    extracted.push(item);
                }
                Err(e) => warn!(error = %e, "skipping malformed search item"),
            }
        }
        Ok(extracted)
    }

    /// Fetches one document body, routing by collection identifier.
    /// Failures are captured on the result, never returned.
    async fn fetch_doc(&self, mut item: SearchItem) -> SearchResult {
        let module_id = item.module_id.clone().unwrap_or_default();
        let document_id = item.id.clone().unwrap_or_default();

        let request = if Self::uses_gateway(item.pubdivid) {
            let url = self.gateway_url(&module_id, &document_id);
            let mut request = self.http.get(&url);
            if let Some(ref token) = self.config.gateway_token {
                request = request.bearer_auth(token);
            }
            item.url = Some(url);
            request
        } else {
            let url = self.doc_url(&module_id, &document_id, "ru");
            item.url = Some(url.clone());
            self.http.get(&url)
        };

        match self.get_json(request).await {
            Ok(document) => SearchResult {
                item,
                document: Some(document),
                error: None,
            },
            Err(e) => {
                warn!(document_id = %document_id, error = %e, "document fetch failed");
                SearchResult {
                    item,
                    document: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

impl std::fmt::Debug for SearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DocumentRetriever for SearchClient {
    async fn fetch_search_pages_and_docs(
        &self,
        params: &SearchParams,
        pages: usize,
    ) -> Result<Vec<SearchResult>, AgentError> {
        let pages_json = self.search_pages(params, pages).await?;

        let mut all_items = Vec::new();
        for page_json in &pages_json {
            all_items.extend(Self::extract_items(page_json, params.pubdivid)?);
        }

        let fetched = join_all(all_items.into_iter().map(|item| self.fetch_doc(item))).await;
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_client() -> SearchClient {
        SearchClient::new(SearchClientConfig {
            search_url: "https://search.test/api/search".to_string(),
            doc_url: "https://search.test/api/doc".to_string(),
            gateway_url: "https://gateway.test/api/part-doc_get".to_string(),
            gateway_token: Some("token".to_string()),
            ..SearchClientConfig::default()
        })
        .unwrap_or_else(|_| unreachable!())
    }

    #[test]
    fn test_doc_url_format() {
        let client = test_client();
        assert_eq!(
            client.doc_url("12", "345", "ru"),
            "https://search.test/api/doc?moduleId=12&documentId=345&locale=ru"
        );
    }

    #[test]
    fn test_gateway_url_format() {
        let client = test_client();
        assert_eq!(
            client.gateway_url("12", "345"),
            "https://gateway.test/api/part-doc_get?PubId=9&ModuleId=12&Id=345"
        );
    }

    #[test]
    fn test_gateway_routing() {
        assert!(SearchClient::uses_gateway(Some(3)));
        assert!(SearchClient::uses_gateway(Some(13)));
        assert!(!SearchClient::uses_gateway(Some(1)));
        assert!(!SearchClient::uses_gateway(None));
    }

    #[test]
    fn test_extract_items_stamps_pubdivid() {
        let page = json!({
            "data": {
                "searchResponse": {
                    "items": [
                        {"id": 1, "moduleId": 9, "docName": "Первый"},
                        {"id": "2", "moduleId": "10", "docName": "Второй"}
                    ]
                }
            }
        });
        let items =
            SearchClient::extract_items(&page, Some(13)).unwrap_or_else(|_| unreachable!());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id.as_deref(), Some("1"));
        assert_eq!(items[0].pubdivid, Some(13));
        assert_eq!(items[1].pubdivid, Some(13));
    }

    #[test]
    fn test_extract_items_missing_shape() {
        let page = json!({"data": {}});
        let result = SearchClient::extract_items(&page, None);
        assert!(result.is_err());
    }

    #[test]
    fn test_extract_items_non_array() {
        let page = json!({"data": {"searchResponse": {"items": "nope"}}});
        let items = SearchClient::extract_items(&page, None).unwrap_or_else(|_| unreachable!());
        assert!(items.is_empty());
    }
}
