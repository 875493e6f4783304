//! Rendering through a Browserless-compatible service.
//!
//! Each URL is tried on the primary engine, then the secondary engine, then
//! with a plain HTTP request. Year-templated URLs are resolved against the
//! current year and, when configured, retried with the previous year if the
//! current one yields nothing.

use std::time::Duration;

use chrono::{Datelike, Utc};
use rand::seq::IndexedRandom;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::HeadlessConfig;
use crate::error::{AppError, Result};
use crate::models::RawRecord;

use super::content::{PageFetcher, USER_AGENTS};
use super::web::{parse_page, single_page_record};
use super::HeadlessSource;

const NAVIGATION_TIMEOUT_MS: u64 = 30_000;
const SELECTOR_TIMEOUT_MS: u64 = 15_000;

pub fn current_year() -> i32 {
    Utc::now().year()
}

pub fn with_year(template: &str, year: i32) -> String {
    template.replace("{year}", &year.to_string())
}

pub struct HeadlessConnector {
    client: Client,
    endpoint: String,
    token: Option<String>,
    engines: Vec<String>,
    pages: PageFetcher,
}

impl HeadlessConnector {
    pub fn new(config: &HeadlessConfig, pages: PageFetcher) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(NAVIGATION_TIMEOUT_MS + SELECTOR_TIMEOUT_MS + 15_000))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.is_empty()),
            engines: config.engines.clone(),
            pages,
        })
    }

    fn content_endpoint(&self, engine: &str) -> String {
        let mut endpoint = format!("{}/{engine}/content?stealth=true", self.endpoint);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("&token={}", urlencoding::encode(token)));
        }
        endpoint
    }

    async fn render(&self, engine: &str, url: &str, wait_for: &str) -> Result<String> {
        let user_agent = USER_AGENTS
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        let body = json!({
            "url": url,
            "userAgent": user_agent,
            "viewport": { "width": 1920, "height": 1080 },
            "gotoOptions": { "waitUntil": "networkidle2", "timeout": NAVIGATION_TIMEOUT_MS },
            "waitForSelector": { "selector": wait_for, "timeout": SELECTOR_TIMEOUT_MS },
        });

        let resp = self
            .client
            .post(self.content_endpoint(engine))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(AppError::Other(anyhow::anyhow!(
                "{engine} render returned HTTP {status}: {}",
                message.chars().take(200).collect::<String>()
            )));
        }

        Ok(resp.text().await?)
    }

    /// Rendered HTML from the first engine that succeeds, or a plain fetch.
    async fn load(&self, source_name: &str, url: &str, wait_for: &str) -> Result<String> {
        for engine in &self.engines {
            match self.render(engine, url, wait_for).await {
                Ok(html) if !html.trim().is_empty() => {
                    debug!(source = %source_name, engine = %engine, url, "rendered page");
                    return Ok(html);
                }
                Ok(_) => warn!(source = %source_name, engine = %engine, url, "empty render"),
                Err(e) => warn!(source = %source_name, engine = %engine, url, error = %e, "render failed"),
            }
        }
        debug!(source = %source_name, url, "falling back to plain HTTP");
        self.pages.get_text(source_name, url).await
    }

    async fn scrape(&self, source: &HeadlessSource, url: &str) -> Result<Vec<RawRecord>> {
        let name = &source.meta.name;
        let page = Url::parse(url).map_err(|e| AppError::parse(name, format!("url: {e}")))?;
        let html = self
            .load(name, url, source.wait_for.as_deref().unwrap_or("body"))
            .await?;

        match source.parser {
            Some(strategy) => parse_page(name, strategy, &html, &page, source.selectors.as_ref()),
            None if source.selectors.is_some() => parse_page(
                name,
                Default::default(),
                &html,
                &page,
                source.selectors.as_ref(),
            ),
            None => Ok(vec![single_page_record(
                &html,
                &page,
                source.content_selector.as_deref(),
            )]),
        }
    }

    /// URLs to try in order: the resolved template for this year, then the
    /// previous year when fallback is enabled.
    pub fn candidate_urls(source: &HeadlessSource, year: i32) -> Vec<String> {
        match (&source.url_template, &source.meta.url) {
            (Some(template), _) if source.dynamic_year => {
                let mut urls = vec![with_year(template, year)];
                if source.fallback_to_previous_year {
                    urls.push(with_year(template, year - 1));
                }
                urls
            }
            (_, Some(url)) => vec![url.clone()],
            (Some(template), None) => vec![template.clone()],
            (None, None) => Vec::new(),
        }
    }

    pub async fn fetch(&self, source: &HeadlessSource) -> Result<Vec<RawRecord>> {
        let name = &source.meta.name;
        let urls = Self::candidate_urls(source, current_year());
        if urls.is_empty() {
            return Err(AppError::parse(name, "no url or url_template configured"));
        }

        let mut last_error = None;
        for url in &urls {
            match self.scrape(source, url).await {
                Ok(records) if !records.is_empty() => {
                    info!(source = %name, url = %url, count = records.len(), "Rendered source");
                    return Ok(records);
                }
                Ok(_) => info!(source = %name, url = %url, "no entries found"),
                Err(e) => {
                    warn!(source = %name, url = %url, error = %e, "headless fetch failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceMeta;

    fn source(template: Option<&str>, url: Option<&str>, fallback: bool) -> HeadlessSource {
        HeadlessSource {
            meta: SourceMeta {
                name: "Portal".into(),
                url: url.map(str::to_string),
                ..Default::default()
            },
            url_template: template.map(str::to_string),
            wait_for: None,
            dynamic_year: true,
            fallback_to_previous_year: fallback,
            parser: None,
            selectors: None,
            content_selector: None,
        }
    }

    #[test]
    fn year_template_with_previous_year_fallback() {
        let s = source(Some("https://vendor.test/{year}/notes"), None, true);
        assert_eq!(
            HeadlessConnector::candidate_urls(&s, 2025),
            vec![
                "https://vendor.test/2025/notes".to_string(),
                "https://vendor.test/2024/notes".to_string()
            ]
        );
    }

    #[test]
    fn static_url_is_used_as_is() {
        let s = source(None, Some("https://vendor.test/notes"), true);
        assert_eq!(
            HeadlessConnector::candidate_urls(&s, 2025),
            vec!["https://vendor.test/notes".to_string()]
        );
    }

    #[test]
    fn endpoint_carries_stealth_and_encoded_token() {
        let config = HeadlessConfig {
            endpoint: "http://render.local:3000/".into(),
            token: Some("a b&c".into()),
            engines: vec!["chromium".into()],
        };
        let connector = HeadlessConnector::new(&config, PageFetcher::new().unwrap()).unwrap();
        assert_eq!(
            connector.content_endpoint("chromium"),
            "http://render.local:3000/chromium/content?stealth=true&token=a%20b%26c"
        );
    }
}
