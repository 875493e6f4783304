use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tracing::info;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::RawRecord;

use super::content::{html_to_text, PageFetcher};
use super::{ApiSource, ParamValue};

const MAX_CONTENT_CHARS: usize = 5000;

const ITEM_KEYS: &[&str] = &["SearchResults", "results", "items", "data"];
const TITLE_KEYS: &[&str] = &["title", "Title", "name", "headline"];
const URL_KEYS: &[&str] = &["url", "Url", "link", "href", "permalink"];
const PUBLISHED_KEYS: &[&str] = &[
    "published",
    "publishedDate",
    "published_at",
    "PublishedDate",
    "pubDate",
    "date",
    "created_at",
    "updated_at",
];
const CONTENT_KEYS: &[&str] = &[
    "content",
    "description",
    "Description",
    "summary",
    "body",
    "abstract",
    "text",
];
const AUTHOR_KEYS: &[&str] = &["author", "byline"];

pub struct ApiConnector {
    pages: PageFetcher,
}

/// Query pairs for the configured params; list values repeat the key.
pub fn query_pairs(params: &std::collections::BTreeMap<String, ParamValue>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in params {
        match value {
            ParamValue::Text(s) => pairs.push((key.clone(), s.clone())),
            ParamValue::Int(n) => pairs.push((key.clone(), n.to_string())),
            ParamValue::Float(n) => pairs.push((key.clone(), n.to_string())),
            ParamValue::Bool(b) => pairs.push((key.clone(), b.to_string())),
            ParamValue::List(items) => {
                pairs.extend(items.iter().map(|item| (key.clone(), item.clone())));
            }
        }
    }
    pairs
}

fn at_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|seg| !seg.is_empty())
        .try_fold(value, |current, seg| match current {
            Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => current.get(seg),
        })
}

fn items<'a>(body: &'a Value, items_path: Option<&str>) -> Option<&'a Vec<Value>> {
    if let Some(path) = items_path {
        return at_path(body, path).and_then(Value::as_array);
    }
    if let Some(array) = body.as_array() {
        return Some(array);
    }
    ITEM_KEYS
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_array))
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("name").and_then(as_text),
        Value::Array(values) => values.first().and_then(as_text),
        _ => None,
    }
}

fn field(item: &Value, configured: Option<&str>, defaults: &[&str]) -> Option<String> {
    match configured {
        Some(path) => at_path(item, path).and_then(as_text),
        None => defaults.iter().find_map(|key| item.get(*key).and_then(as_text)),
    }
}

fn truncate_chars(text: String, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text,
    }
}

/// Map a JSON response onto records. Items without a resolvable link are skipped.
pub fn parse_response(source: &ApiSource, body: &Value) -> Result<Vec<RawRecord>> {
    let name = &source.meta.name;
    let items = items(body, source.items_path.as_deref()).ok_or_else(|| {
        AppError::parse(
            name,
            match &source.items_path {
                Some(path) => format!("no array at items_path '{path}'"),
                None => "response has no recognisable item array".to_string(),
            },
        )
    })?;

    let base = source
        .base_url
        .as_deref()
        .or(source.meta.url.as_deref())
        .and_then(|u| Url::parse(u).ok());
    let fields = &source.fields;

    let records = items
        .iter()
        .filter_map(|item| {
            let link = field(item, fields.url.as_deref(), URL_KEYS)?;
            let url = match Url::parse(&link) {
                Ok(u) => u.to_string(),
                Err(_) => base.as_ref()?.join(&link).ok()?.to_string(),
            };
            let raw = field(item, fields.content.as_deref(), CONTENT_KEYS).unwrap_or_default();
            let content = if raw.contains('<') { html_to_text(&raw) } else { raw.clone() };
            Some(RawRecord {
                title: field(item, fields.title.as_deref(), TITLE_KEYS)
                    .unwrap_or_else(|| "Untitled".to_string()),
                url,
                author: field(item, fields.author.as_deref(), AUTHOR_KEYS),
                published_at: field(item, fields.published.as_deref(), PUBLISHED_KEYS),
                content: truncate_chars(content, MAX_CONTENT_CHARS),
                raw_markup: Some(raw).filter(|r| r.contains('<')),
                ..Default::default()
            })
        })
        .collect();

    Ok(records)
}

fn header_map(source: &ApiSource) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (key, value) in &source.headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| AppError::parse(&source.meta.name, format!("header '{key}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AppError::parse(&source.meta.name, format!("header '{key}': {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

impl ApiConnector {
    pub fn new(pages: PageFetcher) -> Self {
        Self { pages }
    }

    pub async fn fetch(&self, source: &ApiSource) -> Result<Vec<RawRecord>> {
        let name = &source.meta.name;
        let url = source
            .meta
            .url
            .as_deref()
            .ok_or_else(|| AppError::parse(name, "no url configured"))?;

        let response = self
            .pages
            .client()
            .get(url)
            .query(&query_pairs(&source.params))
            .headers(header_map(source)?)
            .send()
            .await
            .map_err(|e| AppError::fetch(name, e))?;

        if !response.status().is_success() {
            return Err(AppError::fetch(name, format!("HTTP {}", response.status())));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::parse(name, format!("invalid JSON: {e}")))?;

        let records = parse_response(source, &body)?;
        info!(source = %name, count = records.len(), "Queried API");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::sources::{ApiFields, SourceMeta};

    fn source() -> ApiSource {
        ApiSource {
            meta: SourceMeta {
                name: "Vendor API".into(),
                url: Some("https://api.vendor.test/v1/search".into()),
                ..Default::default()
            },
            base_url: Some("https://vendor.test".into()),
            ..Default::default()
        }
    }

    #[test]
    fn list_params_repeat_the_key() {
        let mut params = std::collections::BTreeMap::new();
        params.insert("product".to_string(), ParamValue::List(vec!["a".into(), "b".into()]));
        params.insert("top".to_string(), ParamValue::Int(20));
        assert_eq!(
            query_pairs(&params),
            vec![
                ("product".to_string(), "a".to_string()),
                ("product".to_string(), "b".to_string()),
                ("top".to_string(), "20".to_string()),
            ]
        );
    }

    #[test]
    fn default_item_keys_and_relative_links() {
        let body = json!({
            "SearchResults": [
                { "Title": "Hotfix rollup", "Url": "/kb/123", "PublishedDate": "2025-03-01",
                  "Description": "<p>Fixes <b>login</b> loop.</p>" },
                { "Title": "No link" }
            ]
        });
        let records = parse_response(&source(), &body).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Hotfix rollup");
        assert_eq!(records[0].url, "https://vendor.test/kb/123");
        assert_eq!(records[0].published_at.as_deref(), Some("2025-03-01"));
        assert!(records[0].content.contains("loop"));
        assert!(!records[0].content.contains("<p>"));
    }

    #[test]
    fn configured_paths_win() {
        let mut src = source();
        src.items_path = Some("response.docs".into());
        src.fields = ApiFields {
            title: Some("headline.main".into()),
            url: Some("web_url".into()),
            content: Some("lead".into()),
            ..Default::default()
        };
        let body = json!({ "response": { "docs": [
            { "headline": { "main": "Breach disclosed" }, "web_url": "https://news.test/a",
              "lead": "x".repeat(6000) }
        ]}});
        let records = parse_response(&src, &body).unwrap();
        assert_eq!(records[0].title, "Breach disclosed");
        assert_eq!(records[0].content.chars().count(), MAX_CONTENT_CHARS);
    }

    #[test]
    fn top_level_array_is_accepted() {
        let body = json!([{ "title": "One", "link": "https://vendor.test/1" }]);
        assert_eq!(parse_response(&source(), &body).unwrap().len(), 1);
    }

    #[test]
    fn missing_items_is_a_parse_error() {
        let err = parse_response(&source(), &json!({ "error": "quota" })).unwrap_err();
        assert!(matches!(err, AppError::ScrapeParse { .. }));
    }
}
