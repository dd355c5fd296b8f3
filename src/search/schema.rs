//! Wire records for the document search and content APIs.
//!
//! Field names mirror the external API exactly; these records are
//! transient — they live only for the duration of one retrieval call.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Query parameters for a search-page request.
///
/// `None` fields are omitted from the query string. The defaults request
/// relevance-sorted, current-revision documents as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct SearchParams {
    /// Publication alias filter.
    #[serde(rename = "pubAlias", skip_serializing_if = "Option::is_none")]
    pub pub_alias: Option<String>,
    /// Region code filter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixedregioncode: Option<String>,
    /// Whether the backend may expand the query with hints.
    #[serde(rename = "isUseHints", skip_serializing_if = "Option::is_none")]
    pub is_use_hints: Option<String>,
    /// Full-text query string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fstring: Option<String>,
    /// Sort order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sortby: Option<String>,
    /// Document revision status filter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Response format requested from the backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataformat: Option<String>,
    /// Collection identifier the search is scoped to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubdivid: Option<i64>,
    /// Publication identifier.
    #[serde(rename = "pubId", skip_serializing_if = "Option::is_none")]
    pub pub_id: Option<i64>,
    /// Result page (1-based). Set per request by the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            pub_alias: None,
            fixedregioncode: None,
            is_use_hints: Some("false".to_string()),
            fstring: None,
            sortby: Some("Relevance".to_string()),
            status: Some("actual".to_string()),
            dataformat: Some("json".to_string()),
            pubdivid: None,
            pub_id: None,
            page: None,
        }
    }
}

impl SearchParams {
    /// Builds relevance-sorted params for a full-text query.
    #[must_use]
    pub fn for_query(query: &str) -> Self {
        Self {
            fstring: Some(query.to_string()),
            ..Self::default()
        }
    }
}

/// One item of a search-result page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchItem {
    /// Document identifier. Arrives as a string or a number.
    #[serde(deserialize_with = "string_or_number")]
    pub id: Option<String>,
    /// Module identifier. Arrives as a string or a number.
    #[serde(deserialize_with = "string_or_number")]
    pub module_id: Option<String>,
    /// Document URL. Rewritten by the client to the fetch endpoint used.
    pub url: Option<String>,
    /// Document display name.
    pub doc_name: Option<String>,
    /// Search snippet.
    pub snippet: Option<String>,
    /// In-document anchor.
    pub anchor: Option<String>,
    /// Collection identifier, stamped from the request parameters.
    pub pubdivid: Option<i64>,
    /// Rank position within the page.
    pub position: Option<i64>,
    /// Relevance score.
    pub score: Option<f64>,
    /// Whether the backend marks this as a reference document.
    pub is_etalon: Option<bool>,
    /// Whether the backend marks this as a popular document.
    pub is_popular: Option<bool>,
}

/// A search item paired with its fetched document body or fetch error.
///
/// One failing document never fails the batch: the error is recorded
/// here and the caller decides what to skip.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// The originating search item.
    pub item: SearchItem,
    /// The fetched document body, when the fetch succeeded.
    pub document: Option<Value>,
    /// The fetch error, when it failed.
    pub error: Option<String>,
}

/// Accepts a JSON string, number, or null where the API is inconsistent.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(other) => Some(other.to_string()),
    })
}
