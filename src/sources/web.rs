//! Static page scraping and the page-structure strategies shared with the
//! headless connector.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::RawRecord;

use super::content::{main_content, visible_text, PageFetcher};
use super::{matches_keywords, SelectorOverrides, WebSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserStrategy {
    /// Article or entry blocks, each with a heading and a link.
    #[default]
    Generic,
    /// One block per dated release; entries are addressed by fragment.
    #[serde(alias = "release_page", alias = "release_notes_dated")]
    ReleaseBlocks,
    /// Version headings, each linking to its release notes.
    VersionList,
    /// `Month YYYY` headings with the text up to the next heading.
    MonthlySections,
}

impl ParserStrategy {
    pub const NAMES: &'static [&'static str] = &[
        "generic",
        "release_blocks",
        "release_page",
        "release_notes_dated",
        "version_list",
        "monthly_sections",
    ];
}

const GENERIC_ITEMS: &str =
    "article, .post, .entry, .blog-post, .news-item, .card, .release-note, li.item";
const GENERIC_TITLE: &str = "h1, h2, h3, h4, .title, .entry-title, .post-title";
const GENERIC_LINK: &str = "a[href]";
const GENERIC_DATE: &str = "time, .date, .published, .post-date, [datetime]";
const GENERIC_CONTENT: &str = "p, .summary, .excerpt, .entry-content, .description";

const JUNK_TITLES: &[&str] = &[
    "read more",
    "learn more",
    "continue reading",
    "subscribe",
    "sign up",
    "sign in",
    "log in",
    "home",
    "contact us",
    "privacy policy",
    "cookie settings",
    "load more",
    "next page",
    "previous",
];

const JUNK_LINK_MARKERS: &[&str] = &[
    "javascript:",
    "mailto:",
    "/tag/",
    "/tags/",
    "/category/",
    "/author/",
    "/login",
    "/signup",
    "/subscribe",
    "/search",
    "/feed",
];

static MONTH_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?i)(January|February|March|April|May|June|July|August|September|October|November|December)\s+(\d{4})$",
    )
    .expect("valid regex")
});

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").expect("valid regex"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

fn user_selector(source_name: &str, css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| AppError::parse(source_name, format!("selector '{css}': {e}")))
}

fn first_text(element: ElementRef, sel: &Selector) -> Option<String> {
    element
        .select(sel)
        .map(visible_text)
        .find(|t| !t.is_empty())
}

fn slug(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn with_fragment(page: &Url, fragment: &str) -> String {
    let mut url = page.clone();
    url.set_fragment(Some(&slug(fragment)));
    url.to_string()
}

fn is_junk_title(title: &str) -> bool {
    let lowered = title.trim().to_lowercase();
    lowered.chars().count() < 8 || JUNK_TITLES.contains(&lowered.as_str())
}

fn is_junk_link(href: &str) -> bool {
    let lowered = href.to_lowercase();
    lowered.is_empty() || lowered.starts_with('#') || JUNK_LINK_MARKERS.iter().any(|m| lowered.contains(m))
}

fn date_of(element: ElementRef) -> Option<String> {
    element
        .value()
        .attr("datetime")
        .map(str::to_string)
        .or_else(|| Some(visible_text(element)).filter(|t| !t.is_empty()))
}

/// Links matched by `article_selector`, resolved against the page and de-duplicated.
pub fn article_links(
    source_name: &str,
    html: &str,
    page: &Url,
    article_selector: &str,
) -> Result<Vec<(String, String)>> {
    let document = Html::parse_document(html);
    let sel = user_selector(source_name, article_selector)?;
    let anchor = selector("a[href]");

    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&sel) {
        let link = if element.value().name() == "a" {
            Some(element)
        } else {
            element.select(&anchor).next()
        };
        let Some(link) = link else { continue };
        let Some(href) = link.value().attr("href") else { continue };
        if is_junk_link(href) {
            continue;
        }
        let Ok(resolved) = page.join(href) else { continue };
        let resolved = resolved.to_string();
        if seen.insert(resolved.clone()) {
            links.push((visible_text(element), resolved));
        }
    }
    Ok(links)
}

/// The whole page as one record.
pub fn single_page_record(html: &str, page: &Url, content_selector: Option<&str>) -> RawRecord {
    let document = Html::parse_document(html);
    let title = document
        .select(&selector("title"))
        .next()
        .map(visible_text)
        .or_else(|| document.select(&selector("h1")).next().map(visible_text))
        .unwrap_or_else(|| page.to_string());
    RawRecord {
        title,
        url: page.to_string(),
        content: main_content(html, content_selector).unwrap_or_default(),
        raw_markup: Some(html.to_string()),
        ..Default::default()
    }
}

pub fn parse_page(
    source_name: &str,
    strategy: ParserStrategy,
    html: &str,
    page: &Url,
    overrides: Option<&SelectorOverrides>,
) -> Result<Vec<RawRecord>> {
    match strategy {
        ParserStrategy::Generic => generic(source_name, html, page, overrides),
        ParserStrategy::ReleaseBlocks => Ok(release_blocks(html, page)),
        ParserStrategy::VersionList => Ok(version_list(html, page)),
        ParserStrategy::MonthlySections => Ok(monthly_sections(html, page)),
    }
}

fn generic(
    source_name: &str,
    html: &str,
    page: &Url,
    overrides: Option<&SelectorOverrides>,
) -> Result<Vec<RawRecord>> {
    let overrides = overrides.cloned().unwrap_or_default();
    let pick = |custom: &Option<String>, fallback: &str| -> Result<Selector> {
        match custom {
            Some(css) => user_selector(source_name, css),
            None => Ok(selector(fallback)),
        }
    };
    let items = pick(&overrides.item, GENERIC_ITEMS)?;
    let title_sel = pick(&overrides.title, GENERIC_TITLE)?;
    let link_sel = pick(&overrides.link, GENERIC_LINK)?;
    let date_sel = pick(&overrides.date, GENERIC_DATE)?;
    let content_sel = pick(&overrides.content, GENERIC_CONTENT)?;

    let document = Html::parse_document(html);
    let mut seen = std::collections::HashSet::new();
    let mut records = Vec::new();

    for block in document.select(&items) {
        let Some(title) = first_text(block, &title_sel) else { continue };
        if is_junk_title(&title) {
            continue;
        }
        let href = block
            .select(&link_sel)
            .filter_map(|a| a.value().attr("href"))
            .find(|href| !is_junk_link(href));
        let Some(url) = href.and_then(|h| page.join(h).ok()) else { continue };
        let url = url.to_string();
        if !seen.insert(url.clone()) {
            continue;
        }

        let content = block
            .select(&content_sel)
            .map(visible_text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        records.push(RawRecord {
            title,
            url,
            published_at: block.select(&date_sel).next().and_then(date_of),
            content: if content.is_empty() { visible_text(block) } else { content },
            raw_markup: Some(block.html()),
            ..Default::default()
        });
    }
    Ok(records)
}

fn release_blocks(html: &str, page: &Url) -> Vec<RawRecord> {
    let document = Html::parse_document(html);
    let blocks = selector("div.release, section.release, [data-release-date]");
    let heading = selector("h1, h2, h3, h4");
    let date_sel = selector("time, .date, .release-date");

    document
        .select(&blocks)
        .filter_map(|block| {
            let text = visible_text(block);
            let date = block
                .value()
                .attr("data-release-date")
                .map(str::to_string)
                .or_else(|| block.select(&date_sel).next().and_then(date_of))
                .or_else(|| ISO_DATE.captures(&text).map(|c| c[1].to_string()))?;
            let title = first_text(block, &heading).unwrap_or_else(|| format!("Release {date}"));
            Some(RawRecord {
                url: with_fragment(page, &date),
                title,
                published_at: Some(date),
                content: text,
                raw_markup: Some(block.html()),
                ..Default::default()
            })
        })
        .collect()
}

fn version_list(html: &str, page: &Url) -> Vec<RawRecord> {
    let document = Html::parse_document(html);
    let items = selector("li");
    let heading = selector("div.heading");
    let notes = selector("ul.group li a");

    document
        .select(&items)
        .filter_map(|item| {
            let title = first_text(item, &heading)?;
            let link = item
                .select(&notes)
                .find(|a| visible_text(*a).to_lowercase().contains("release notes"))
                .and_then(|a| a.value().attr("href"))
                .and_then(|href| page.join(href).ok())
                .map(|u| u.to_string())
                .unwrap_or_else(|| with_fragment(page, &title));
            Some(RawRecord {
                title,
                url: link,
                content: visible_text(item),
                raw_markup: Some(item.html()),
                ..Default::default()
            })
        })
        .collect()
}

fn monthly_sections(html: &str, page: &Url) -> Vec<RawRecord> {
    let document = Html::parse_document(html);
    let headings = selector("h2");

    document
        .select(&headings)
        .filter_map(|h2| {
            let heading = visible_text(h2);
            if !MONTH_HEADING.is_match(&heading) {
                return None;
            }
            let mut parts = Vec::new();
            for sibling in h2.next_siblings() {
                if let Some(el) = ElementRef::wrap(sibling) {
                    if el.value().name() == "h2" {
                        break;
                    }
                    let text = visible_text(el);
                    if !text.is_empty() {
                        parts.push(text);
                    }
                } else if let Some(text) = sibling.value().as_text() {
                    let text = text.trim();
                    if !text.is_empty() {
                        parts.push(text.to_string());
                    }
                }
            }
            if parts.is_empty() {
                return None;
            }
            Some(RawRecord {
                url: with_fragment(page, &heading),
                title: heading.clone(),
                published_at: Some(heading),
                content: parts.join("\n"),
                ..Default::default()
            })
        })
        .collect()
}

pub struct WebConnector {
    pages: PageFetcher,
}

impl WebConnector {
    pub fn new(pages: PageFetcher) -> Self {
        Self { pages }
    }

    pub async fn fetch(&self, source: &WebSource) -> Result<Vec<RawRecord>> {
        let name = &source.meta.name;
        let url = source
            .meta
            .url
            .as_deref()
            .ok_or_else(|| AppError::parse(name, "no url configured"))?;
        let page = Url::parse(url).map_err(|e| AppError::parse(name, format!("url: {e}")))?;
        let html = self.pages.get_text(name, url).await?;

        let records = if source.single_page {
            vec![single_page_record(&html, &page, source.content_selector.as_deref())]
        } else if let Some(article_selector) = &source.article_selector {
            let links = article_links(name, &html, &page, article_selector)?;
            let limit = source.meta.max_articles();
            let mut records = Vec::new();
            for (title, link) in links {
                if records.len() >= limit {
                    break;
                }
                match self
                    .pages
                    .fetch_main_content(name, &link, source.content_selector.as_deref())
                    .await
                {
                    Ok(Some(content))
                        if !matches_keywords(&source.meta.keywords, &title, &content) =>
                    {
                        debug!(source = %name, url = %link, "no keyword match");
                    }
                    Ok(Some(content)) => records.push(RawRecord {
                        title,
                        url: link,
                        content,
                        ..Default::default()
                    }),
                    Ok(None) => warn!(source = %name, url = %link, "linked page had no content"),
                    Err(e) => warn!(source = %name, url = %link, error = %e, "linked page fetch failed"),
                }
            }
            records
        } else {
            parse_page(
                name,
                source.parser.unwrap_or_default(),
                &html,
                &page,
                source.selectors.as_ref(),
            )?
        };

        info!(source = %name, count = records.len(), "Scraped page");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Url {
        Url::parse("https://vendor.test/blog/").unwrap()
    }

    #[test]
    fn generic_blocks_skip_junk() {
        let html = r##"
          <main>
            <article>
              <h2><a href="/blog/new-loader">New loader targets finance sector</a></h2>
              <time datetime="2025-03-04">March 4, 2025</time>
              <p>Researchers observed a new loader.</p>
            </article>
            <article>
              <h2><a href="#">Read more</a></h2>
            </article>
            <article>
              <h3>Tag archive page heading</h3>
              <a href="/tag/malware">malware</a>
            </article>
          </main>"##;
        let records = parse_page("Blog", ParserStrategy::Generic, html, &page(), None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].url, "https://vendor.test/blog/new-loader");
        assert_eq!(records[0].published_at.as_deref(), Some("2025-03-04"));
        assert_eq!(records[0].content, "Researchers observed a new loader.");
    }

    #[test]
    fn selector_overrides_replace_defaults() {
        let html = r#"
          <div class="row"><span class="t">Advisory for gateway appliances</span>
            <a class="go" href="adv-1">details</a><span class="d">2025-01-02</span></div>"#;
        let overrides = SelectorOverrides {
            item: Some("div.row".into()),
            title: Some("span.t".into()),
            link: Some("a.go".into()),
            date: Some("span.d".into()),
            content: None,
        };
        let records =
            parse_page("Blog", ParserStrategy::Generic, html, &page(), Some(&overrides)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].url, "https://vendor.test/blog/adv-1");
        assert_eq!(records[0].published_at.as_deref(), Some("2025-01-02"));
    }

    #[test]
    fn invalid_override_is_a_parse_error() {
        let overrides = SelectorOverrides {
            item: Some("div[".into()),
            ..Default::default()
        };
        let err = parse_page("Blog", ParserStrategy::Generic, "<p></p>", &page(), Some(&overrides))
            .unwrap_err();
        assert!(matches!(err, AppError::ScrapeParse { .. }));
    }

    #[test]
    fn release_blocks_are_addressed_by_date() {
        let html = r#"
          <div class="release" data-release-date="2025-02-11">
            <h3>Platform 7.2</h3><p>Adds SSO support.</p>
          </div>
          <div class="release"><h3>Platform 7.1</h3><p>Released 2025-01-14 with fixes.</p></div>"#;
        let records = parse_page("Notes", ParserStrategy::ReleaseBlocks, html, &page(), None).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].url, "https://vendor.test/blog/#2025-02-11");
        assert_eq!(records[0].title, "Platform 7.2");
        assert_eq!(records[1].published_at.as_deref(), Some("2025-01-14"));
    }

    #[test]
    fn version_list_follows_release_note_links() {
        let html = r#"
          <ul>
            <li><div class="heading">Agent 4.18.2501</div>
              <ul class="group"><li><a href="/kb/download">Download</a></li>
                <li><a href="/kb/4-18-2501">Release notes</a></li></ul></li>
          </ul>"#;
        let records = parse_page("Agent", ParserStrategy::VersionList, html, &page(), None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Agent 4.18.2501");
        assert_eq!(records[0].url, "https://vendor.test/kb/4-18-2501");
    }

    #[test]
    fn monthly_sections_split_on_headings() {
        let html = r#"<body>
          <h2>March 2025</h2><p>New console.</p><ul><li>Faster scans</li></ul>
          <h2>February 2025</h2><p>Bug fixes.</p>
          <h2>Resources</h2><p>Links</p>
        </body>"#;
        let records =
            parse_page("Whats new", ParserStrategy::MonthlySections, html, &page(), None).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].url, "https://vendor.test/blog/#march-2025");
        assert_eq!(records[0].content, "New console.\nFaster scans");
        assert_eq!(records[1].published_at.as_deref(), Some("February 2025"));
    }

    #[test]
    fn article_links_resolve_and_dedupe() {
        let html = r#"<div class="list">
            <a class="story" href="one">One</a>
            <a class="story" href="/blog/one">One again</a>
            <a class="story" href="mailto:x@vendor.test">Mail</a></div>"#;
        let links = article_links("Blog", html, &page(), "a.story").unwrap();
        assert_eq!(links, vec![("One".to_string(), "https://vendor.test/blog/one".to_string())]);
    }

    #[test]
    fn single_page_uses_title_tag() {
        let html = "<html><head><title>Status page</title></head><body><p>All good.</p></body></html>";
        let record = single_page_record(html, &page(), None);
        assert_eq!(record.title, "Status page");
        assert_eq!(record.content, "All good.");
        assert_eq!(record.url, "https://vendor.test/blog/");
    }
}
