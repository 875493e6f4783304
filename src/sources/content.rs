use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::error::{AppError, Result};

pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:128.0) Gecko/20100101 Firefox/128.0",
];

const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role=main]",
    ".post-content",
    ".entry-content",
    ".article-content",
    ".article-body",
    "#content",
    ".content",
];

const SKIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "aside", "form", "svg",
];

const MIN_MAIN_CONTENT: usize = 200;

/// Shared HTTP access for every connector.
#[derive(Clone)]
pub struct PageFetcher {
    client: Client,
}

impl PageFetcher {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENTS[0]));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .default_headers(headers)
            .build()?;

        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn get_bytes(&self, source_name: &str, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::fetch(source_name, e))?;

        if !response.status().is_success() {
            return Err(AppError::fetch(
                source_name,
                format!("HTTP {} for {url}", response.status()),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::fetch(source_name, e))?;
        Ok(bytes.to_vec())
    }

    pub async fn get_text(&self, source_name: &str, url: &str) -> Result<String> {
        let bytes = self.get_bytes(source_name, url).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// HTTP status of a plain GET, for connection tests.
    pub async fn probe(&self, source_name: &str, url: &str) -> Result<u16> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::fetch(source_name, e))?;
        let status = response.status();
        if status.is_success() || status.is_redirection() {
            Ok(status.as_u16())
        } else {
            Err(AppError::fetch(source_name, format!("HTTP {status}")))
        }
    }

    /// Fetch a linked page and reduce it to its main readable text.
    pub async fn fetch_main_content(
        &self,
        source_name: &str,
        url: &str,
        content_selector: Option<&str>,
    ) -> Result<Option<String>> {
        let html = self.get_text(source_name, url).await?;
        Ok(main_content(&html, content_selector))
    }
}

fn collect_text(element: ElementRef, out: &mut Vec<String>) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            let text = text.trim();
            if !text.is_empty() {
                out.push(text.to_string());
            }
        } else if let Some(el) = ElementRef::wrap(child) {
            if !SKIPPED_ELEMENTS.contains(&el.value().name()) {
                collect_text(el, out);
            }
        }
    }
}

/// Text of an element with chrome (scripts, navigation, footers) left out.
pub fn visible_text(element: ElementRef) -> String {
    let mut parts = Vec::new();
    collect_text(element, &mut parts);
    parts
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Main readable text of a page: the configured selector first, then common
/// article containers, then the whole body.
pub fn main_content(html: &str, content_selector: Option<&str>) -> Option<String> {
    let document = Html::parse_document(html);

    let candidates = content_selector.into_iter().chain(CONTENT_SELECTORS.iter().copied());
    for css in candidates {
        let Ok(selector) = Selector::parse(css) else {
            debug!(selector = css, "skipping invalid content selector");
            continue;
        };
        let text = document
            .select(&selector)
            .map(visible_text)
            .max_by_key(|t| t.len())
            .unwrap_or_default();
        if text.chars().count() >= MIN_MAIN_CONTENT {
            return Some(text);
        }
    }

    let body = Selector::parse("body").ok()?;
    document
        .select(&body)
        .next()
        .map(visible_text)
        .filter(|t| !t.is_empty())
}

/// Markup to plain text with blank lines collapsed.
pub fn html_to_text(html: &str) -> String {
    let text = match html2text::from_read(html.as_bytes(), 100) {
        Ok(t) => t,
        Err(e) => {
            debug!(error = %e, "Failed to convert HTML to text");
            return html.to_string();
        }
    };

    text.lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
