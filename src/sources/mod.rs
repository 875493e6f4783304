//! Source connectors.
//!
//! A source definition is one of four shapes selected by its `type` key.
//! [`Connectors`] dispatches a definition to the matching connector and
//! applies the filters every variant shares.

mod api;
mod content;
mod headless;
mod rss;
pub mod validate;
mod web;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::HeadlessConfig;
use crate::error::Result;
use crate::ingest::parse_published;
use crate::models::RawRecord;

pub use api::ApiConnector;
pub use content::PageFetcher;
pub use headless::HeadlessConnector;
pub use rss::RssConnector;
pub use web::{ParserStrategy, WebConnector};

pub const DEFAULT_MAX_ARTICLES: usize = 50;

/// Keys shared by every source type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMeta {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub max_articles: Option<usize>,
    #[serde(default)]
    pub max_age_days: Option<i64>,
}

impl SourceMeta {
    pub fn max_articles(&self) -> usize {
        self.max_articles.unwrap_or(DEFAULT_MAX_ARTICLES)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RssSource {
    #[serde(flatten)]
    pub meta: SourceMeta,
    #[serde(default)]
    pub feed_url: Option<String>,
    #[serde(default)]
    pub filter_pattern: Option<String>,
    #[serde(default)]
    pub filter_by_title: bool,
}

impl RssSource {
    pub fn feed_url(&self) -> Option<&str> {
        self.feed_url.as_deref().or(self.meta.url.as_deref())
    }
}

/// Per-field CSS overrides for the generic page strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectorOverrides {
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebSource {
    #[serde(flatten)]
    pub meta: SourceMeta,
    #[serde(default)]
    pub content_selector: Option<String>,
    #[serde(default)]
    pub article_selector: Option<String>,
    #[serde(default)]
    pub single_page: bool,
    #[serde(default)]
    pub selectors: Option<SelectorOverrides>,
    #[serde(default)]
    pub parser: Option<ParserStrategy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<String>),
}

/// JSON keys to read each record field from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiFields {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub published: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiSource {
    #[serde(flatten)]
    pub meta: SourceMeta,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub items_path: Option<String>,
    #[serde(default)]
    pub fields: ApiFields,
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadlessSource {
    #[serde(flatten)]
    pub meta: SourceMeta,
    #[serde(default)]
    pub url_template: Option<String>,
    #[serde(default)]
    pub wait_for: Option<String>,
    #[serde(default = "default_true")]
    pub dynamic_year: bool,
    #[serde(default)]
    pub fallback_to_previous_year: bool,
    #[serde(default)]
    pub parser: Option<ParserStrategy>,
    #[serde(default)]
    pub selectors: Option<SelectorOverrides>,
    #[serde(default)]
    pub content_selector: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    Rss(RssSource),
    Web(WebSource),
    Api(ApiSource),
    Headless(HeadlessSource),
}

impl SourceConfig {
    pub fn meta(&self) -> &SourceMeta {
        match self {
            SourceConfig::Rss(s) => &s.meta,
            SourceConfig::Web(s) => &s.meta,
            SourceConfig::Api(s) => &s.meta,
            SourceConfig::Headless(s) => &s.meta,
        }
    }

    pub fn name(&self) -> &str {
        &self.meta().name
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceConfig::Rss(_) => "rss",
            SourceConfig::Web(_) => "web",
            SourceConfig::Api(_) => "api",
            SourceConfig::Headless(_) => "headless",
        }
    }

    /// The address a connection test should probe.
    pub fn probe_url(&self) -> Option<String> {
        match self {
            SourceConfig::Rss(s) => s.feed_url().map(str::to_string),
            SourceConfig::Headless(s) => s.meta.url.clone().or_else(|| {
                s.url_template
                    .as_ref()
                    .map(|t| headless::with_year(t, headless::current_year()))
            }),
            _ => self.meta().url.clone(),
        }
    }
}

/// Turns one source definition into the records it currently publishes.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn fetch(&self, source: &SourceConfig) -> Result<Vec<RawRecord>>;
}

/// The production connector set, one per source type.
pub struct Connectors {
    rss: RssConnector,
    web: WebConnector,
    api: ApiConnector,
    headless: HeadlessConnector,
}

impl Connectors {
    pub fn new(headless: &HeadlessConfig) -> Result<Self> {
        let pages = PageFetcher::new()?;
        Ok(Self {
            rss: RssConnector::new(pages.clone()),
            web: WebConnector::new(pages.clone()),
            api: ApiConnector::new(pages.clone()),
            headless: HeadlessConnector::new(headless, pages)?,
        })
    }
}

#[async_trait]
impl Connector for Connectors {
    async fn fetch(&self, source: &SourceConfig) -> Result<Vec<RawRecord>> {
        let records = match source {
            SourceConfig::Rss(s) => self.rss.fetch(s).await?,
            SourceConfig::Web(s) => self.web.fetch(s).await?,
            SourceConfig::Api(s) => self.api.fetch(s).await?,
            SourceConfig::Headless(s) => self.headless.fetch(s).await?,
        };
        Ok(finish(source.meta(), records))
    }
}

/// Case-insensitive keyword match against title and body. An empty keyword
/// list admits everything.
pub(crate) fn matches_keywords(keywords: &[String], title: &str, content: &str) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let text = format!("{title} {content}").to_lowercase();
    keywords.iter().any(|k| text.contains(&k.to_lowercase()))
}

/// Filters shared by all variants: keyword match, age limit, record cap.
/// Vendor and product from the definition fill records that lack them.
pub fn finish(meta: &SourceMeta, records: Vec<RawRecord>) -> Vec<RawRecord> {
    let cutoff = meta.max_age_days.map(|days| Utc::now() - Duration::days(days));
    let before = records.len();

    let kept: Vec<RawRecord> = records
        .into_iter()
        .filter(|r| matches_keywords(&meta.keywords, &r.title, &r.content))
        .filter(|r| match (cutoff, r.published_at.as_deref().and_then(parse_published)) {
            (Some(cutoff), Some(published)) => published >= cutoff,
            _ => true,
        })
        .take(meta.max_articles())
        .map(|mut r| {
            if r.vendor.is_none() {
                r.vendor = meta.vendor.clone();
            }
            if r.product.is_none() {
                r.product = meta.product.clone();
            }
            r
        })
        .collect();

    if kept.len() != before {
        debug!(source = %meta.name, before, after = kept.len(), "filtered records");
    }
    kept
}
