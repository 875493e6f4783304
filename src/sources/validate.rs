//! Load-time validation of source definitions.
//!
//! Checks run on the raw TOML table, before deserialization, so unknown and
//! misspelled keys are reported instead of silently ignored.

use regex::Regex;
use toml::{Table, Value};

use crate::error::{AppError, Result};

use super::web::ParserStrategy;
use super::SourceConfig;

const SOURCE_TYPES: &[&str] = &["rss", "web", "api", "headless"];

const COMMON_FIELDS: &[&str] = &[
    "name",
    "type",
    "url",
    "vendor",
    "product",
    "products",
    "keywords",
    "max_articles",
    "max_age_days",
];

const RSS_FIELDS: &[&str] = &["feed_url", "filter_pattern", "filter_by_title"];
const WEB_FIELDS: &[&str] = &[
    "content_selector",
    "article_selector",
    "single_page",
    "selectors",
    "parser",
];
const API_FIELDS: &[&str] = &["params", "headers", "items_path", "fields", "base_url"];
const HEADLESS_FIELDS: &[&str] = &[
    "url_template",
    "wait_for",
    "dynamic_year",
    "fallback_to_previous_year",
    "parser",
    "selectors",
    "content_selector",
];

const SELECTOR_KEYS: &[&str] = &["item", "title", "link", "date", "content"];
const API_FIELD_KEYS: &[&str] = &["title", "url", "published", "content", "author"];

#[derive(Clone, Copy, PartialEq)]
enum Expected {
    Text,
    Flag,
    Count,
    TextList,
    Table,
}

impl Expected {
    fn describe(self) -> &'static str {
        match self {
            Expected::Text => "a string",
            Expected::Flag => "true or false",
            Expected::Count => "a non-negative integer",
            Expected::TextList => "a list of strings",
            Expected::Table => "a table",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Expected::Text => value.is_str(),
            Expected::Flag => value.is_bool(),
            Expected::Count => value.as_integer().is_some_and(|n| n >= 0),
            Expected::TextList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_str)),
            Expected::Table => value.is_table(),
        }
    }
}

fn expected_type(field: &str) -> Expected {
    match field {
        "filter_by_title" | "single_page" | "dynamic_year" | "fallback_to_previous_year" => {
            Expected::Flag
        }
        "max_articles" | "max_age_days" => Expected::Count,
        "products" | "keywords" => Expected::TextList,
        "selectors" | "params" | "headers" | "fields" => Expected::Table,
        _ => Expected::Text,
    }
}

fn fields_for(kind: &str) -> &'static [&'static str] {
    match kind {
        "rss" => RSS_FIELDS,
        "web" => WEB_FIELDS,
        "api" => API_FIELDS,
        "headless" => HEADLESS_FIELDS,
        _ => &[],
    }
}

fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Closest known name: equal ignoring case and underscores, or one
/// containing the other.
pub fn suggest<'a>(unknown: &str, known: &[&'a str]) -> Option<&'a str> {
    let target = squash(unknown);
    if target.len() < 3 {
        return None;
    }
    known
        .iter()
        .find(|k| squash(k) == target)
        .or_else(|| {
            known.iter().find(|k| {
                let k = squash(k);
                k.contains(&target) || target.contains(&k)
            })
        })
        .copied()
}

struct Checker<'a> {
    tracker: &'a str,
    source: String,
    issues: Vec<AppError>,
}

impl Checker<'_> {
    fn issue(&mut self, field: &str, message: String, hint: Option<String>) {
        self.issues.push(AppError::ConfigValidation {
            tracker: self.tracker.to_string(),
            source_name: self.source.clone(),
            field: field.to_string(),
            message,
            hint,
        });
    }

    fn unknown_keys(&mut self, scope: &str, table: &Table, known: &[&str], others: &[&str]) {
        for key in table.keys() {
            if known.contains(&key.as_str()) {
                continue;
            }
            let field = if scope.is_empty() {
                key.clone()
            } else {
                format!("{scope}.{key}")
            };
            let hint = if others.contains(&key.as_str()) {
                Some("This field belongs to a different source type.".to_string())
            } else {
                suggest(key, known).map(|s| format!("Did you mean '{s}'?"))
            };
            self.issue(&field, format!("Unknown field: '{key}'"), hint);
        }
    }
}

/// Every problem with one raw source definition.
pub fn check_source(tracker: &str, index: usize, table: &Table) -> Vec<AppError> {
    let source = table
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("source #{}", index + 1));
    let mut check = Checker {
        tracker,
        source,
        issues: Vec::new(),
    };

    if !table.contains_key("name") {
        check.issue(
            "name",
            "Missing required field".into(),
            Some("Every source needs a unique 'name'.".into()),
        );
    }

    let Some(kind) = table.get("type") else {
        check.issue(
            "type",
            "Missing required field".into(),
            Some(format!("Set type to one of: {}", SOURCE_TYPES.join(", "))),
        );
        return check.issues;
    };
    let kind = kind.as_str().unwrap_or_default().to_string();
    if !SOURCE_TYPES.contains(&kind.as_str()) {
        let hint = suggest(&kind, SOURCE_TYPES)
            .map(|s| format!("Did you mean '{s}'?"))
            .unwrap_or_else(|| format!("Valid types: {}", SOURCE_TYPES.join(", ")));
        check.issue("type", format!("Unknown source type '{kind}'"), Some(hint));
        return check.issues;
    }

    let mut known: Vec<&str> = COMMON_FIELDS.to_vec();
    known.extend_from_slice(fields_for(&kind));
    let others: Vec<&str> = SOURCE_TYPES
        .iter()
        .flat_map(|t| fields_for(t).iter().copied())
        .filter(|f| !known.contains(f))
        .collect();
    check.unknown_keys("", table, &known, &others);

    for (key, value) in table {
        if !known.contains(&key.as_str()) {
            continue;
        }
        let expected = expected_type(key);
        if !expected.accepts(value) {
            check.issue(
                key,
                format!("Expected {}, found {}", expected.describe(), value.type_str()),
                None,
            );
        }
    }

    let text = |key: &str| table.get(key).and_then(Value::as_str);
    match kind.as_str() {
        "rss" => {
            let feed_like = text("url").is_some_and(|u| {
                let u = u.to_lowercase();
                ["rss", "feed", "atom", ".xml"].iter().any(|m| u.contains(m))
            });
            if text("feed_url").is_none() && !feed_like {
                check.issue(
                    "feed_url",
                    "RSS source needs a feed address".into(),
                    Some("Add feed_url = \"https://…/feed.xml\".".into()),
                );
            }
        }
        "web" | "api" => {
            if text("url").is_none() {
                check.issue("url", "Missing required field".into(), None);
            }
        }
        "headless" => match (text("url"), text("url_template")) {
            (None, None) => check.issue(
                "url",
                "Headless source needs 'url' or 'url_template'".into(),
                None,
            ),
            (_, Some(template)) if !template.contains("{year}") => check.issue(
                "url_template",
                "Template has no {year} placeholder".into(),
                Some("Use 'url' for fixed addresses, or include {year}.".into()),
            ),
            _ => {}
        },
        _ => {}
    }

    if let Some(pattern) = text("filter_pattern") {
        if let Err(e) = Regex::new(pattern) {
            check.issue("filter_pattern", format!("Invalid regex: {e}"), None);
        }
    }

    if let Some(parser) = text("parser") {
        if !ParserStrategy::NAMES.contains(&parser) {
            let hint = suggest(parser, ParserStrategy::NAMES)
                .map(|s| format!("Did you mean '{s}'?"))
                .unwrap_or_else(|| format!("Valid parsers: {}", ParserStrategy::NAMES.join(", ")));
            check.issue("parser", format!("Unknown parser '{parser}'"), Some(hint));
        }
    }

    if let Some(selectors) = table.get("selectors").and_then(Value::as_table) {
        check.unknown_keys("selectors", selectors, SELECTOR_KEYS, &[]);
    }
    if let Some(fields) = table.get("fields").and_then(Value::as_table) {
        check.unknown_keys("fields", fields, API_FIELD_KEYS, &[]);
    }

    check.issues
}

/// Every problem across a tracker's sources, including duplicate names.
pub fn validation_issues(tracker: &str, raw: &[Table]) -> Vec<AppError> {
    let mut issues: Vec<AppError> = raw
        .iter()
        .enumerate()
        .flat_map(|(i, table)| check_source(tracker, i, table))
        .collect();

    let mut seen = std::collections::HashSet::new();
    for name in raw.iter().filter_map(|t| t.get("name").and_then(Value::as_str)) {
        if !seen.insert(name) {
            issues.push(AppError::ConfigValidation {
                tracker: tracker.to_string(),
                source_name: name.to_string(),
                field: "name".into(),
                message: "Duplicate source name".into(),
                hint: Some("Source names must be unique within a tracker.".into()),
            });
        }
    }
    issues
}

/// Validate and type every source of a tracker. The first problem is fatal.
pub fn load_sources(tracker: &str, raw: &[Table]) -> Result<Vec<SourceConfig>> {
    if let Some(issue) = validation_issues(tracker, raw).into_iter().next() {
        return Err(issue);
    }
    raw.iter()
        .map(|table| {
            Value::Table(table.clone()).try_into::<SourceConfig>().map_err(|e| {
                AppError::ConfigValidation {
                    tracker: tracker.to_string(),
                    source_name: table
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    field: "type".into(),
                    message: e.to_string(),
                    hint: None,
                }
            })
        })
        .collect()
}
