use std::fmt;
use std::path::Path;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::ai::{build_backend, canned_summary, classify, summarize, AiBackend};
use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::extract::extract;
use crate::ingest::{ingest, update_type_tags};
use crate::models::{Article, ContentCategory, IngestOutcome};
use crate::report::{write_digest, Tier};
use crate::sources::{Connector, Connectors, PageFetcher, SourceConfig};

/// Resource caps from the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunLimits {
    pub max_sources: Option<usize>,
    pub max_articles: Option<usize>,
    pub max_summaries: Option<usize>,
}

#[derive(Debug, Default)]
pub struct ScrapeSummary {
    pub sources_ok: usize,
    pub fetched: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub rejected: usize,
    /// Source name and error for each source that produced nothing.
    pub failures: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct AnalyzeSummary {
    pub analyzed: usize,
    pub unsummarized: usize,
    pub fallbacks: usize,
    pub failed: usize,
    pub indicators: usize,
}

impl fmt::Display for ScrapeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sources ok, {} failed; {} records, {} new, {} duplicates",
            self.sources_ok,
            self.failures.len(),
            self.fetched,
            self.inserted,
            self.skipped
        )?;
        if self.rejected > 0 {
            write!(f, ", {} rejected", self.rejected)?;
        }
        Ok(())
    }
}

impl fmt::Display for AnalyzeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} analyzed ({} without model, {} classification fallbacks), {} left pending, {} indicators",
            self.analyzed, self.unsummarized, self.fallbacks, self.failed, self.indicators
        )
    }
}

enum Analysis {
    Summarized { fallback: bool },
    Unsummarized,
    AlreadyDone,
}

pub struct App {
    config: Config,
    limits: RunLimits,
    pub repository: Repository,
    connectors: Box<dyn Connector>,
    backend: Box<dyn AiBackend>,
}

impl App {
    pub async fn new(config: Config, limits: RunLimits) -> Result<Self> {
        let repository = Repository::new(&config.db_path).await?;
        let connectors = Box::new(Connectors::new(&config.headless)?);
        let backend = build_backend(&config.ai)?;
        Ok(Self::with_parts(config, limits, repository, connectors, backend))
    }

    pub fn with_parts(
        config: Config,
        limits: RunLimits,
        repository: Repository,
        connectors: Box<dyn Connector>,
        backend: Box<dyn AiBackend>,
    ) -> Self {
        Self {
            config,
            limits,
            repository,
            connectors,
            backend,
        }
    }

    /// Fetch every source of the tracker in order and store unseen records.
    /// A failing source is logged and counted; only configuration and store
    /// faults end the run.
    pub async fn scrape(&self, tracker: &str) -> Result<ScrapeSummary> {
        let display_name = self.config.tracker(tracker)?.display_name(tracker).to_string();
        let sources = self.config.sources_for(tracker)?;
        self.repository.register_tracker(tracker, &display_name).await?;

        let limit = self.limits.max_sources.unwrap_or(sources.len());
        info!(tracker, sources = sources.len().min(limit), "Scraping");

        let mut summary = ScrapeSummary::default();
        let mut batches = std::pin::pin!(stream::iter(sources.iter().take(limit)).then(
            |source| async move { (source, self.connectors.fetch(source).await) }
        ));

        while let Some((source, fetched)) = batches.next().await {
            let name = source.name();
            let records = match fetched {
                Ok(records) => records,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(tracker, source = %name, kind = source.kind(), error = %e, "Source failed");
                    summary.failures.push((name.to_string(), e.to_string()));
                    continue;
                }
            };

            let cap = self.limits.max_articles.unwrap_or(records.len());
            let (mut inserted, mut skipped) = (0, 0);
            for record in records.into_iter().take(cap) {
                summary.fetched += 1;
                match ingest(&self.repository, tracker, name, record).await {
                    Ok(IngestOutcome::Inserted(_)) => inserted += 1,
                    Ok(IngestOutcome::Skipped) => skipped += 1,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(tracker, source = %name, error = %e, "Record rejected");
                        summary.rejected += 1;
                    }
                }
            }
            info!(tracker, source = %name, new = inserted, duplicates = skipped, "Source done");
            summary.sources_ok += 1;
            summary.inserted += inserted;
            summary.skipped += skipped;
        }

        info!(tracker, "Scrape finished: {summary}");
        Ok(summary)
    }

    /// Extract, classify and summarize pending articles, oldest first.
    pub async fn analyze(&self, tracker: &str) -> Result<AnalyzeSummary> {
        self.config.tracker(tracker)?;
        let pending = self
            .repository
            .pending_articles(tracker, self.limits.max_summaries)
            .await?;
        info!(tracker, pending = pending.len(), model = %self.backend.model_name(), "Analyzing");

        let mut summary = AnalyzeSummary::default();
        for article in &pending {
            let (outcome, indicator_count) = match self.analyze_article(article).await {
                Ok(done) => done,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(tracker, article = article.id, title = %article.title, error = %e, "Left pending");
                    summary.failed += 1;
                    continue;
                }
            };
            summary.indicators += indicator_count;
            match outcome {
                Analysis::Summarized { fallback } => {
                    summary.analyzed += 1;
                    if fallback {
                        summary.fallbacks += 1;
                    }
                }
                Analysis::Unsummarized => {
                    summary.analyzed += 1;
                    summary.unsummarized += 1;
                }
                Analysis::AlreadyDone => {}
            }
        }

        info!(tracker, "Analyze finished: {summary}");
        Ok(summary)
    }

    async fn analyze_article(&self, article: &Article) -> Result<(Analysis, usize)> {
        let text = format!("{}\n{}", article.title, article.content);
        let indicators: Vec<_> = extract(&text).into_iter().collect();
        let indicator_count = self
            .repository
            .replace_indicators(article.id, indicators.clone())
            .await?;

        let (category, summary, outcome) = match canned_summary(&article.content) {
            Some(canned) => {
                warn!(article = article.id, title = %article.title, "Content unusable, skipping model");
                (ContentCategory::IndustryNews, canned, Analysis::Unsummarized)
            }
            None => {
                let classification =
                    classify(self.backend.as_ref(), &article.title, &article.content).await;
                let summary = summarize(
                    self.backend.as_ref(),
                    &article.title,
                    &article.content,
                    classification.category,
                    &indicators,
                )
                .await?;
                (
                    classification.category,
                    summary,
                    Analysis::Summarized {
                        fallback: classification.fallback,
                    },
                )
            }
        };

        let committed = self
            .repository
            .mark_analyzed(article.id, category, summary, Utc::now())
            .await?;
        if !committed {
            return Ok((Analysis::AlreadyDone, indicator_count));
        }

        if article.vendor.is_some() || article.product.is_some() {
            self.repository
                .add_tags(article.id, update_type_tags(&article.title, &article.content))
                .await?;
        }
        info!(article = article.id, category = %category, indicators = indicator_count, "Analyzed");
        Ok((outcome, indicator_count))
    }

    pub async fn report(&self, tracker: &str, tier: Tier) -> Result<(std::path::PathBuf, usize)> {
        let display_name = self.config.tracker(tracker)?.display_name(tracker).to_string();
        write_digest(
            &self.repository,
            Path::new(&self.config.report_dir),
            tracker,
            &display_name,
            tier,
        )
        .await
    }

    /// Scrape then analyze, then write a digest when a tier is given.
    pub async fn run(&self, tracker: &str, tier: Option<Tier>) -> Result<()> {
        let scraped = self.scrape(tracker).await?;
        let analyzed = self.analyze(tracker).await?;
        info!(tracker, "Run: {scraped}; {analyzed}");
        if let Some(tier) = tier {
            self.report(tracker, tier).await?;
        }
        Ok(())
    }
}

/// Reachability of each source's address, without parsing anything.
pub async fn probe_sources(sources: &[SourceConfig]) -> Result<Vec<(String, Result<u16>)>> {
    let pages = PageFetcher::new()?;
    let mut results = Vec::with_capacity(sources.len());
    for source in sources {
        let outcome = match source.probe_url() {
            Some(url) => pages.probe(source.name(), &url).await,
            None => Err(AppError::parse(source.name(), "no address to probe")),
        };
        results.push((source.name().to_string(), outcome));
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::ai::router::tests::FakeBackend;
    use crate::models::{ArticleState, RawRecord};

    const CONFIG: &str = r#"
[trackers.threat_intel]
display_name = "Threat Intelligence"

[[trackers.threat_intel.sources]]
name = "Alpha"
type = "web"
url = "https://alpha.test"

[[trackers.threat_intel.sources]]
name = "Broken"
type = "rss"
feed_url = "https://broken.test/feed"

[[trackers.threat_intel.sources]]
name = "Gamma"
type = "api"
url = "https://gamma.test/api"
vendor = "Gamma Corp"
"#;

    /// Serves canned records per source name; unknown names fail to fetch.
    struct FakeConnector {
        records: HashMap<String, Vec<RawRecord>>,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn fetch(&self, source: &SourceConfig) -> Result<Vec<RawRecord>> {
            let records = self
                .records
                .get(source.name())
                .cloned()
                .ok_or_else(|| AppError::fetch(source.name(), "connection refused"))?;
            Ok(crate::sources::finish(source.meta(), records))
        }
    }

    fn record(url: &str, title: &str, content: &str) -> RawRecord {
        RawRecord {
            title: title.into(),
            url: url.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    fn long_body(lead: &str) -> String {
        format!("{lead} {}", "Analysts observed the activity across several sectors. ".repeat(10))
    }

    async fn app(dir: &TempDir, replies: Vec<Result<String>>, limits: RunLimits) -> App {
        let mut config: Config = toml::from_str(CONFIG).unwrap();
        config.db_path = dir.path().join("test.db").to_string_lossy().to_string();
        config.report_dir = dir.path().join("reports").to_string_lossy().to_string();
        let repository = Repository::new(&config.db_path).await.unwrap();

        let mut records = HashMap::new();
        records.insert(
            "Alpha".to_string(),
            vec![
                record(
                    "https://alpha.test/a1",
                    "Loader beacons to 8.8.8.8",
                    &long_body("The loader contacts 8.8.8.8 and exploits CVE-2024-12345."),
                ),
                record("https://alpha.test/a2", "Short teaser", "Too short."),
            ],
        );
        records.insert(
            "Gamma".to_string(),
            vec![record(
                "https://gamma.test/g1",
                "Console 5.2 adds new feature",
                &long_body("This release introduces a new dashboard."),
            )],
        );

        App::with_parts(
            config,
            limits,
            repository,
            Box::new(FakeConnector { records }),
            Box::new(FakeBackend::replying(replies)),
        )
    }

    #[tokio::test]
    async fn failing_source_does_not_stop_siblings() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, vec![], RunLimits::default()).await;

        let summary = app.scrape("threat_intel").await.unwrap();
        assert_eq!(summary.sources_ok, 2);
        assert_eq!(summary.inserted, 3);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].0, "Broken");

        let stats = app.repository.tracker_stats("threat_intel").await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 3);
    }

    #[tokio::test]
    async fn rescrape_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, vec![], RunLimits::default()).await;

        app.scrape("threat_intel").await.unwrap();
        let again = app.scrape("threat_intel").await.unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(again.skipped, 3);
        assert_eq!(app.repository.tracker_stats("threat_intel").await.unwrap().total, 3);
    }

    #[tokio::test]
    async fn limits_cap_sources_and_articles() {
        let dir = TempDir::new().unwrap();
        let limits = RunLimits {
            max_sources: Some(1),
            max_articles: Some(1),
            ..Default::default()
        };
        let app = app(&dir, vec![], limits).await;
        let summary = app.scrape("threat_intel").await.unwrap();
        assert_eq!(summary.sources_ok, 1);
        assert_eq!(summary.inserted, 1);
    }

    #[tokio::test]
    async fn analyze_routes_and_persists() {
        let dir = TempDir::new().unwrap();
        let app = app(
            &dir,
            vec![
                Ok("threat_advisory".into()),
                Ok("Loader abuses CVE-2024-12345.".into()),
                Ok("product_update".into()),
                Ok("Adds a dashboard.".into()),
            ],
            RunLimits::default(),
        )
        .await;
        app.scrape("threat_intel").await.unwrap();

        let summary = app.analyze("threat_intel").await.unwrap();
        assert_eq!(summary.analyzed, 3);
        assert_eq!(summary.unsummarized, 1);
        assert_eq!(summary.failed, 0);

        let stats = app.repository.tracker_stats("threat_intel").await.unwrap();
        assert_eq!(stats.analyzed, 3);

        let pending = app.repository.pending_articles("threat_intel", None).await.unwrap();
        assert!(pending.is_empty());

        let threat = app.repository.get_article(1).await.unwrap().unwrap();
        assert_eq!(threat.state(), ArticleState::Analyzed);
        assert_eq!(threat.category, Some(ContentCategory::ThreatAdvisory));
        let kinds: Vec<String> = app
            .repository
            .indicators_for(1)
            .await
            .unwrap()
            .iter()
            .map(|i| format!("{}:{}", i.kind, i.value))
            .collect();
        assert!(kinds.contains(&"ip:8.8.8.8".to_string()));
        assert!(kinds.contains(&"cve:CVE-2024-12345".to_string()));

        let teaser = app.repository.get_article(2).await.unwrap().unwrap();
        assert_eq!(teaser.category, Some(ContentCategory::IndustryNews));
        assert!(teaser.summary.unwrap().contains("insufficient"));

        let vendor_tags = app.repository.tags_for(3).await.unwrap();
        assert!(vendor_tags.contains(&"Feature Update".to_string()));
    }

    #[tokio::test]
    async fn failed_summary_leaves_article_pending_for_next_run() {
        let dir = TempDir::new().unwrap();
        let limits = RunLimits {
            max_summaries: Some(1),
            ..Default::default()
        };
        let app = app(
            &dir,
            vec![
                Ok("threat_advisory".into()),
                Err(AppError::Ai("timeout".into())),
                Ok("threat_advisory".into()),
                Ok("Recovered summary.".into()),
            ],
            limits,
        )
        .await;
        app.scrape("threat_intel").await.unwrap();

        let first = app.analyze("threat_intel").await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(first.analyzed, 0);
        let article = app.repository.get_article(1).await.unwrap().unwrap();
        assert_eq!(article.state(), ArticleState::Pending);

        let second = app.analyze("threat_intel").await.unwrap();
        assert_eq!(second.analyzed, 1);
        let article = app.repository.get_article(1).await.unwrap().unwrap();
        assert_eq!(article.summary.as_deref(), Some("Recovered summary."));
    }

    #[test]
    fn unknown_tracker_is_a_config_error() {
        tokio_test::block_on(async {
            let dir = TempDir::new().unwrap();
            let app = app(&dir, vec![], RunLimits::default()).await;
            let err = app.scrape("nope").await.unwrap_err();
            assert!(matches!(err, AppError::Config(_)));
            assert!(err.is_fatal());
        });
    }

    #[tokio::test]
    async fn run_with_tier_writes_digest() {
        let dir = TempDir::new().unwrap();
        let app = app(
            &dir,
            vec![
                Ok("garbled reply".into()),
                Ok("Summary one.".into()),
                Ok("industry_news".into()),
                Ok("Summary two.".into()),
            ],
            RunLimits::default(),
        )
        .await;
        app.run("threat_intel", Some(Tier::Daily)).await.unwrap();

        let digest_dir = dir.path().join("reports").join("threat_intel");
        let written: Vec<_> = std::fs::read_dir(digest_dir).unwrap().collect();
        assert_eq!(written.len(), 1);
    }
}
