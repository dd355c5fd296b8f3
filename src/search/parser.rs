//! Document content parsers.
//!
//! Raw document payloads arrive in two flavors selected by collection
//! identifier: plain structured JSON, and JSON wrapping an HTML-escaped
//! XML fragment. Both parsers normalize to plain text and never fail:
//! malformed XML degrades to regex tag stripping, unexpected shapes
//! degrade to an empty string.

use std::sync::LazyLock;

use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use super::client::SearchClient;

/// Capability to turn a raw document payload into plain text.
pub trait DocumentParser: Send + Sync {
    /// Extracts readable text from the payload. Total: returns an empty
    /// string rather than failing.
    fn parse(&self, document: &Value) -> String;

    /// Extracts the document title, trying a list of known fields.
    /// Returns an empty string if none is present.
    fn title(&self, document: &Value) -> String;
}

/// Parser for plain structured JSON documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDocumentParser;

/// Parser for gateway documents embedding an HTML-escaped XML fragment
/// in the `topTextXml` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlDocumentParser;

/// Selects the parser for a collection identifier.
#[must_use]
pub fn parser_for(pubdivid: Option<i64>) -> &'static dyn DocumentParser {
    if SearchClient::uses_gateway(pubdivid) {
        &XmlDocumentParser
    } else {
        &JsonDocumentParser
    }
}

/// Keys whose string content is considered document text.
const TEXT_KEYS: &[&str] = &["text", "content", "snippet", "paragraphs", "items", "blocks"];

/// Title fields in lookup order.
const TITLE_KEYS: &[&str] = &["title", "name", "docName", "documentName"];

/// HTML void elements that arrive unterminated and must be made
/// self-closing before XML parsing.
const VOID_ELEMENTS: &str = "br|hr|img|input|meta|link|area|base|col|embed|source|track|wbr";

fn compile(pattern: &str) -> Regex {
    // All call sites pass literal patterns covered by tests.
    #[allow(clippy::unwrap_used)]
    let re = Regex::new(pattern).unwrap();
    re
}

static VOID_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| compile(&format!(r"(?i)<({VOID_ELEMENTS})(\s[^>]*)?>")));
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"<[^>]+>"));
static WS_RUN_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"\s+"));
static SPACE_BEFORE_PUNCT_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"\s+([,.;:)\]])"));
static SPACE_AFTER_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"([(\[])\s+"));
static MISSING_SPACE_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"([;:])(\S)"));
static MULTI_SPACE_RE: LazyLock<Regex> = LazyLock::new(|| compile(r" {2,}"));
static DANGLING_CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"[;:]\s*$"));

/// Unwraps the optional `data` envelope.
fn data_envelope(document: &Value) -> &Value {
    document.get("data").unwrap_or(document)
}

/// Looks up the title through the known field names, coercing numbers.
fn title_from(document: &Value) -> String {
    let data = data_envelope(document);
    for key in TITLE_KEYS {
        match data.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return s.clone(),
            Some(Value::Number(n)) => return n.to_string(),
            _ => {}
        }
    }
    String::new()
}

/// Resolves the XML-predefined entities plus the named HTML entities
/// these documents actually carry.
fn html_entity(name: &str) -> Option<&'static str> {
    if let Some(predefined) = quick_xml::escape::resolve_predefined_entity(name) {
        return Some(predefined);
    }
    Some(match name {
        "nbsp" => "\u{a0}",
        "laquo" => "«",
        "raquo" => "»",
        "mdash" => "—",
        "ndash" => "–",
        "hellip" => "…",
        "sect" => "§",
        "copy" => "©",
        _ => return None,
    })
}

/// Decodes HTML entities, tolerating payloads `unescape` rejects.
fn unescape_html(raw: &str) -> String {
    quick_xml::escape::unescape_with(raw, |name| html_entity(name)).map_or_else(
        |_| {
            raw.replace("&lt;", "<")
                .replace("&gt;", ">")
                .replace("&quot;", "\"")
                .replace("&apos;", "'")
                .replace("&nbsp;", "\u{a0}")
                .replace("&amp;", "&")
        },
        |decoded| decoded.into_owned(),
    )
}

/// Rewrites unterminated HTML void elements (`<br>`) into self-closing
/// form (`<br/>`) so the fragment parses as XML. Already-closed tags are
/// left untouched.
fn normalize_void_elements(fragment: &str) -> String {
    VOID_TAG_RE
        .replace_all(fragment, |caps: &regex::Captures<'_>| {
            let attrs = caps.get(2).map_or("", |m| m.as_str());
            if attrs.trim_end().ends_with('/') {
                caps[0].to_string()
            } else {
                format!("<{}{attrs}/>", &caps[1])
            }
        })
        .into_owned()
}

/// Walks the XML fragment collecting all element and tail text.
fn extract_xml_text(xml: &str) -> Result<String, String> {
    let mut reader = Reader::from_str(xml);
    let mut parts: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Text(text)) => {
                let raw = String::from_utf8_lossy(&text);
                match quick_xml::escape::unescape_with(&raw, |name| html_entity(name)) {
                    Ok(decoded) => {
                        let trimmed = decoded.trim();
                        if !trimmed.is_empty() {
                            parts.push(trimmed.to_string());
                        }
                    }
                    Err(e) => return Err(e.to_string()),
                }
            }
            Ok(Event::CData(cdata)) => {
                let decoded = String::from_utf8_lossy(&cdata);
                let trimmed = decoded.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
    }

    Ok(parts.join(" "))
}

/// Tag-stripping extraction used when XML parsing fails. Never fails.
fn strip_tags_fallback(fragment: &str) -> String {
    let without_tags = TAG_RE.replace_all(fragment, " ");
    let decoded = unescape_html(&without_tags);
    let collapsed = WS_RUN_RE.replace_all(&decoded, " ");
    clean_text(collapsed.trim())
}

/// Shared post-extraction cleaning pass.
///
/// Applies in order: residual `&#160;` removal, `;...` spacing, stray
/// whitespace before punctuation, whitespace after opening brackets,
/// missing whitespace after `;`/`:`, NBSP joining, space-run collapse,
/// and a trailing `;`/`:` turned into ` ...`.
pub(crate) fn clean_text(text: &str) -> String {
    let mut s = text.replace("&#160;", " ");
    s = s.replace(";...", "; ...");
    s = SPACE_BEFORE_PUNCT_RE.replace_all(&s, "${1}").into_owned();
    s = SPACE_AFTER_OPEN_RE.replace_all(&s, "${1}").into_owned();
    s = MISSING_SPACE_RE.replace_all(&s, "${1} ${2}").into_owned();

    s = s.replace("\u{a0} ", "\u{a0}").replace(" \u{a0}", "\u{a0}");
    s = MULTI_SPACE_RE.replace_all(&s, " ").into_owned();

    if DANGLING_CLAUSE_RE.is_match(&s) {
        s = DANGLING_CLAUSE_RE.replace(&s, " ...").into_owned();
        s = MULTI_SPACE_RE.replace_all(&s, " ").into_owned();
    }

    s.trim().to_string()
}

impl JsonDocumentParser {
    fn collect_text(value: &Value, parts: &mut Vec<String>) {
        match value {
            Value::String(s) => {
                let trimmed = s.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
            }
            Value::Array(items) => {
                for item in items {
                    Self::collect_text(item, parts);
                }
            }
            Value::Object(map) => {
                for (key, child) in map {
                    if TEXT_KEYS.contains(&key.as_str()) {
                        Self::collect_text(child, parts);
                    }
                }
            }
            _ => {}
        }
    }
}

impl DocumentParser for JsonDocumentParser {
    fn parse(&self, document: &Value) -> String {
        let mut parts = Vec::new();
        Self::collect_text(data_envelope(document), &mut parts);
        clean_text(&parts.join(" "))
    }

    fn title(&self, document: &Value) -> String {
        title_from(document)
    }
}

impl DocumentParser for XmlDocumentParser {
    fn parse(&self, document: &Value) -> String {
        let data = data_envelope(document);

        let Some(xml_content) = data.get("topTextXml").and_then(Value::as_str) else {
            warn!("no 'topTextXml' field in document payload");
            return String::new();
        };
        if xml_content.is_empty() {
            warn!("empty topTextXml");
            return String::new();
        }

        let decoded = unescape_html(xml_content);
        let normalized = normalize_void_elements(&decoded);

        match extract_xml_text(&normalized) {
            Ok(text) => clean_text(&text),
            Err(e) => {
                warn!(error = %e, "failed to parse XML, falling back to tag stripping");
                strip_tags_fallback(&decoded)
            }
        }
    }

    fn title(&self, document: &Value) -> String {
        title_from(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test]
    fn test_xml_parse_escaped_fragment() {
        let doc = json!({
            "data": {
                "topTextXml": "&lt;div&gt;&lt;p&gt;Срок уплаты НДС&lt;/p&gt;&lt;p&gt;до 28 числа.&lt;/p&gt;&lt;/div&gt;",
                "title": "Сроки уплаты"
            }
        });
        let parser = XmlDocumentParser;
        assert_eq!(parser.parse(&doc), "Срок уплаты НДС до 28 числа.");
        assert_eq!(parser.title(&doc), "Сроки уплаты");
    }

    #[test]
    fn test_xml_parse_collects_tail_text() {
        let doc = json!({
            "topTextXml": "&lt;div&gt;первая&lt;br&gt;вторая&lt;/div&gt;"
        });
        assert_eq!(XmlDocumentParser.parse(&doc), "первая вторая");
    }

    #[test]
    fn test_xml_malformed_falls_back_to_tag_stripping() {
        // Unclosed <b> makes the fragment ill-formed XML.
        let doc = json!({
            "data": {"topTextXml": "&lt;div&gt;Текст &lt;b&gt;важный&lt;/div&gt;"}
        });
        let text = XmlDocumentParser.parse(&doc);
        assert!(!text.is_empty());
        assert!(text.contains("Текст"));
        assert!(text.contains("важный"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn test_xml_missing_field_returns_empty() {
        let doc = json!({"data": {"other": 1}});
        assert_eq!(XmlDocumentParser.parse(&doc), "");
    }

    #[test]
    fn test_xml_nbsp_entity_decoded() {
        let doc = json!({
            "topTextXml": "&lt;p&gt;статья&amp;nbsp;146&lt;/p&gt;"
        });
        assert_eq!(XmlDocumentParser.parse(&doc), "статья\u{a0}146");
    }

    #[test_case("<br>", "<br/>"; "bare break")]
    #[test_case("<BR>", "<BR/>"; "uppercase")]
    #[test_case("<br/>", "<br/>"; "already closed")]
    #[test_case("<br />", "<br />"; "closed with space")]
    #[test_case(r#"<img src="x.png">"#, r#"<img src="x.png"/>"#; "with attributes")]
    #[test_case("<broken>", "<broken>"; "non void tag untouched")]
    fn test_normalize_void_elements(input: &str, expected: &str) {
        assert_eq!(normalize_void_elements(input), expected);
    }

    #[test_case("слово , слово", "слово, слово"; "space before comma")]
    #[test_case("( скобки )", "(скобки)"; "spaces inside brackets")]
    #[test_case("список:первый", "список: первый"; "missing space after colon")]
    #[test_case("итог  ;...", "итог; ..."; "semicolon ellipsis")]
    #[test_case("перечень включает:", "перечень включает ..."; "trailing colon becomes ellipsis")]
    #[test_case("&#160;текст", "текст"; "residual nbsp entity")]
    fn test_clean_text(input: &str, expected: &str) {
        assert_eq!(clean_text(input), expected);
    }

    #[test]
    fn test_title_fallback_order() {
        let parser = XmlDocumentParser;
        let doc = json!({"data": {"docName": "Из docName", "documentName": "Из documentName"}});
        assert_eq!(parser.title(&doc), "Из docName");

        let doc = json!({"data": {"documentName": "Последний"}});
        assert_eq!(parser.title(&doc), "Последний");

        let doc = json!({"data": {}});
        assert_eq!(parser.title(&doc), "");
    }

    #[test]
    fn test_title_skips_empty_primary() {
        let doc = json!({"title": "", "name": "Название"});
        assert_eq!(XmlDocumentParser.title(&doc), "Название");
    }

    #[test]
    fn test_json_parser_walks_text_fields() {
        let doc = json!({
            "data": {
                "text": "Первый абзац.",
                "blocks": [
                    {"text": "Второй абзац."},
                    {"caption": "пропущено"},
                    {"content": ["Третий", "абзац."]}
                ],
                "meta": {"text": "пропущено: ключ вне текстовых полей"}
            }
        });
        let text = JsonDocumentParser.parse(&doc);
        assert!(text.contains("Первый абзац."));
        assert!(text.contains("Второй абзац."));
        assert!(text.contains("Третий абзац."));
        assert!(!text.contains("пропущено"));
    }

    #[test]
    fn test_json_parser_unexpected_shape_is_empty() {
        assert_eq!(JsonDocumentParser.parse(&json!(42)), "");
        assert_eq!(JsonDocumentParser.parse(&json!({"data": {"other": true}})), "");
    }

    #[test]
    fn test_parser_selection_by_collection() {
        assert_eq!(parser_for(Some(13)).title(&json!({"title": "t"})), "t");
        // Collection 1 routes to the JSON parser: topTextXml is ignored.
        let doc = json!({"data": {"topTextXml": "&lt;p&gt;x&lt;/p&gt;", "text": "plain"}});
        assert_eq!(parser_for(Some(1)).parse(&doc), "plain");
    }
}
