use feed_rs::parser;
use regex::{Regex, RegexBuilder};
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::models::RawRecord;

use super::content::{html_to_text, PageFetcher};
use super::{matches_keywords, RssSource};

/// Bodies shorter than this are treated as teasers and the linked page is
/// fetched for the full text.
const TEASER_CHARS: usize = 500;

pub struct RssConnector {
    pages: PageFetcher,
}

/// Entry filters configured on a feed source.
#[derive(Default)]
pub struct FeedFilter {
    pattern: Option<Regex>,
    keywords: Vec<String>,
    products: Vec<String>,
    by_title: bool,
}

impl FeedFilter {
    pub fn from_source(source: &RssSource) -> Result<Self> {
        let pattern = source
            .filter_pattern
            .as_deref()
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
            .transpose()
            .map_err(|e| AppError::parse(&source.meta.name, format!("filter_pattern: {e}")))?;
        Ok(Self {
            pattern,
            keywords: source.meta.keywords.clone(),
            products: source.meta.products.clone(),
            by_title: source.filter_by_title,
        })
    }

    /// Whether the entry is kept, and the product it names when filtering by title.
    fn admit(&self, title: &str, body: &str) -> Option<Option<String>> {
        if let Some(re) = &self.pattern {
            if !re.is_match(title) && !re.is_match(body) {
                return None;
            }
        }
        if !matches_keywords(&self.keywords, title, body) {
            return None;
        }
        if self.by_title && !self.products.is_empty() {
            let lowered = title.to_lowercase();
            let product = self
                .products
                .iter()
                .find(|p| lowered.contains(&p.to_lowercase()))?;
            return Some(Some(product.clone()));
        }
        Some(None)
    }
}

/// Parse a syndication document into records. Entries without a link or
/// rejected by `filter` are dropped before `limit` applies.
pub fn parse_feed(
    source_name: &str,
    bytes: &[u8],
    filter: &FeedFilter,
    limit: usize,
) -> Result<Vec<RawRecord>> {
    let feed = parser::parse(bytes).map_err(|e| AppError::parse(source_name, e))?;

    let records = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            // Try content first, then fall back to summary
            let content_html = entry
                .content
                .as_ref()
                .and_then(|c| c.body.clone())
                .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()));

            let content = content_html.as_deref().map(html_to_text).unwrap_or_default();
            let title = entry
                .title
                .map(|t| t.content.trim().to_string())
                .unwrap_or_else(|| "Untitled".to_string());
            let url = entry.links.first().map(|l| l.href.clone())?;

            let product = filter.admit(&title, &content)?;

            Some(RawRecord {
                title,
                url,
                author: entry.authors.first().map(|a| a.name.clone()),
                published_at: entry.published.or(entry.updated).map(|dt| dt.to_rfc3339()),
                content,
                raw_markup: content_html,
                vendor: None,
                product,
                tags: entry
                    .categories
                    .into_iter()
                    .map(|c| c.label.unwrap_or(c.term))
                    .collect(),
            })
        })
        .take(limit)
        .collect();

    Ok(records)
}

impl RssConnector {
    pub fn new(pages: PageFetcher) -> Self {
        Self { pages }
    }

    pub async fn fetch(&self, source: &RssSource) -> Result<Vec<RawRecord>> {
        let name = &source.meta.name;
        let url = source
            .feed_url()
            .ok_or_else(|| AppError::parse(name, "no feed_url configured"))?;
        let filter = FeedFilter::from_source(source)?;

        let bytes = self.pages.get_bytes(name, url).await?;
        let mut records = parse_feed(name, &bytes, &filter, source.meta.max_articles())?;

        for record in records.iter_mut() {
            if record.content.chars().count() >= TEASER_CHARS {
                continue;
            }
            match self.pages.fetch_main_content(name, &record.url, None).await {
                Ok(Some(full)) if full.len() > record.content.len() => {
                    debug!(source = %name, url = %record.url, "replaced teaser with linked page");
                    record.content = full;
                }
                Ok(_) => {}
                Err(e) => debug!(source = %name, url = %record.url, error = %e, "teaser page fetch failed"),
            }
        }

        info!(source = %name, count = records.len(), "Fetched feed");
        Ok(records)
    }
}
