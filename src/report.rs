//! Time-windowed selection of analyzed articles and the JSON digest built
//! from it.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;

use crate::db::{format_timestamp, Repository};
use crate::error::{AppError, Result};
use crate::models::{Article, ContentCategory, Indicator};

/// Lookback window, measured against analysis time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
}

impl Tier {
    pub fn days(self) -> i64 {
        match self {
            Tier::Daily => 1,
            Tier::Weekly => 7,
            Tier::Biweekly => 14,
            Tier::Monthly => 30,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Tier::Daily => 0,
            Tier::Weekly => 1,
            Tier::Biweekly => 2,
            Tier::Monthly => 3,
        }
    }
}

impl TryFrom<u8> for Tier {
    type Error = AppError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Tier::Daily),
            1 => Ok(Tier::Weekly),
            2 => Ok(Tier::Biweekly),
            3 => Ok(Tier::Monthly),
            other => Err(AppError::Config(format!(
                "tier must be 0, 1, 2 or 3 (got {other})"
            ))),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier {} ({} days)", self.number(), self.days())
    }
}

/// Analyzed articles inside the tier's window ending at `now`, newest
/// publication first. Never-analyzed articles are excluded.
pub async fn select_for_tier(
    repo: &Repository,
    tracker: &str,
    tier: Tier,
    now: DateTime<Utc>,
) -> Result<Vec<Article>> {
    repo.analyzed_since(tracker, now - Duration::days(tier.days()))
        .await
}

/// Articles bucketed by category in presentation order. Order within a
/// bucket is preserved; empty buckets are omitted.
pub fn group_by_category(articles: Vec<Article>) -> Vec<(ContentCategory, Vec<Article>)> {
    let mut groups: Vec<(ContentCategory, Vec<Article>)> = ContentCategory::ALL
        .iter()
        .map(|c| (*c, Vec::new()))
        .collect();
    for article in articles {
        let category = article.category.unwrap_or(ContentCategory::IndustryNews);
        if let Some((_, bucket)) = groups.iter_mut().find(|(c, _)| *c == category) {
            bucket.push(article);
        }
    }
    groups.retain(|(_, bucket)| !bucket.is_empty());
    groups
}

#[derive(Debug, Serialize)]
pub struct Digest {
    pub tracker: String,
    pub display_name: String,
    pub tier: u8,
    pub window_days: i64,
    pub generated_at: String,
    pub article_count: usize,
    pub sections: Vec<DigestSection>,
}

#[derive(Debug, Serialize)]
pub struct DigestSection {
    pub category: ContentCategory,
    pub heading: &'static str,
    pub articles: Vec<DigestEntry>,
}

#[derive(Debug, Serialize)]
pub struct DigestEntry {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    pub published_at: Option<String>,
    pub analyzed_at: Option<String>,
    pub summary: String,
    pub tags: Vec<String>,
    pub indicators: Vec<Indicator>,
}

pub async fn build_digest(
    repo: &Repository,
    tracker: &str,
    display_name: &str,
    tier: Tier,
    now: DateTime<Utc>,
) -> Result<Digest> {
    let articles = select_for_tier(repo, tracker, tier, now).await?;
    let article_count = articles.len();

    let mut sections = Vec::new();
    for (category, bucket) in group_by_category(articles) {
        let mut entries = Vec::with_capacity(bucket.len());
        for article in bucket {
            let indicators = repo.indicators_for(article.id).await?;
            let tags = repo.tags_for(article.id).await?;
            entries.push(DigestEntry {
                id: article.id,
                title: article.title,
                url: article.url,
                source: article.source,
                author: article.author,
                vendor: article.vendor,
                product: article.product,
                published_at: article.published_at.as_ref().map(format_timestamp),
                analyzed_at: article.analyzed_at.as_ref().map(format_timestamp),
                summary: article.summary.unwrap_or_default(),
                tags,
                indicators,
            });
        }
        sections.push(DigestSection {
            category,
            heading: category.heading(),
            articles: entries,
        });
    }

    Ok(Digest {
        tracker: tracker.to_string(),
        display_name: display_name.to_string(),
        tier: tier.number(),
        window_days: tier.days(),
        generated_at: format_timestamp(&now),
        article_count,
        sections,
    })
}

pub fn digest_path(report_dir: &Path, tracker: &str, tier: Tier, now: DateTime<Utc>) -> PathBuf {
    report_dir
        .join(tracker)
        .join(format!("{}_tier{}.json", now.format("%Y-%m-%d"), tier.number()))
}

/// Write the digest for `tracker` and return where it went.
pub async fn write_digest(
    repo: &Repository,
    report_dir: &Path,
    tracker: &str,
    display_name: &str,
    tier: Tier,
) -> Result<(PathBuf, usize)> {
    let now = Utc::now();
    let digest = build_digest(repo, tracker, display_name, tier, now).await?;
    let path = digest_path(report_dir, tracker, tier, now);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(&digest)?)?;

    info!(
        tracker,
        tier = tier.number(),
        articles = digest.article_count,
        path = %path.display(),
        "Wrote digest"
    );
    Ok((path, digest.article_count))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::models::{IngestOutcome, IndicatorKind, NewArticle};

    async fn setup() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let repo = Repository::new(path.to_str().unwrap()).await.unwrap();
        (dir, repo)
    }

    async fn insert(repo: &Repository, slug: &str, published: DateTime<Utc>) -> i64 {
        let outcome = repo
            .insert_article(NewArticle {
                tracker: "threat_intel".into(),
                source: "Feed".into(),
                title: slug.into(),
                url: format!("https://news.test/{slug}"),
                author: None,
                published_at: published,
                content: "body".into(),
                vendor: None,
                product: None,
                scraped_at: published,
            })
            .await
            .unwrap();
        match outcome {
            IngestOutcome::Inserted(id) => id,
            IngestOutcome::Skipped => panic!("unexpected duplicate"),
        }
    }

    #[test]
    fn tiers_map_to_fixed_windows() {
        let days: Vec<i64> = (0..=3u8)
            .map(|n| Tier::try_from(n).unwrap().days())
            .collect();
        assert_eq!(days, vec![1, 7, 14, 30]);
        assert!(Tier::try_from(4).is_err());
    }

    #[tokio::test]
    async fn window_is_measured_against_analysis_time() {
        let (_dir, repo) = setup().await;
        let now = Utc::now();

        let recent = insert(&repo, "recent", now - Duration::days(40)).await;
        let old = insert(&repo, "old", now - Duration::days(40)).await;
        let _pending = insert(&repo, "pending", now).await;

        repo.mark_analyzed(recent, ContentCategory::ThreatAdvisory, "s".into(), now - Duration::days(2))
            .await
            .unwrap();
        repo.mark_analyzed(old, ContentCategory::ThreatAdvisory, "s".into(), now - Duration::days(10))
            .await
            .unwrap();

        let weekly = select_for_tier(&repo, "threat_intel", Tier::Weekly, now).await.unwrap();
        assert_eq!(weekly.iter().map(|a| a.id).collect::<Vec<_>>(), vec![recent]);

        let biweekly = select_for_tier(&repo, "threat_intel", Tier::Biweekly, now).await.unwrap();
        assert_eq!(biweekly.len(), 2);

        let other = select_for_tier(&repo, "vendors", Tier::Monthly, now).await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn ordering_is_newest_published_then_insertion() {
        let (_dir, repo) = setup().await;
        let now = Utc::now();
        let day = now - Duration::days(3);

        let first = insert(&repo, "a", day).await;
        let second = insert(&repo, "b", day).await;
        let newest = insert(&repo, "c", now - Duration::days(1)).await;
        for id in [first, second, newest] {
            repo.mark_analyzed(id, ContentCategory::IndustryNews, "s".into(), now)
                .await
                .unwrap();
        }

        let selected = select_for_tier(&repo, "threat_intel", Tier::Weekly, now).await.unwrap();
        let ids: Vec<i64> = selected.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![newest, first, second]);
    }

    #[tokio::test]
    async fn digest_groups_sections_and_carries_indicators() {
        let (dir, repo) = setup().await;
        let now = Utc::now();

        let threat = insert(&repo, "threat", now).await;
        let news = insert(&repo, "news", now).await;
        repo.mark_analyzed(threat, ContentCategory::ThreatAdvisory, "bad".into(), now)
            .await
            .unwrap();
        repo.mark_analyzed(news, ContentCategory::IndustryNews, "meh".into(), now)
            .await
            .unwrap();
        repo.replace_indicators(
            threat,
            vec![Indicator {
                kind: IndicatorKind::Cve,
                value: "CVE-2024-12345".into(),
                context: String::new(),
            }],
        )
        .await
        .unwrap();
        repo.add_tags(news, vec!["Policy".into()]).await.unwrap();

        let digest = build_digest(&repo, "threat_intel", "Threat Intelligence", Tier::Daily, now)
            .await
            .unwrap();
        assert_eq!(digest.article_count, 2);
        let headings: Vec<&str> = digest.sections.iter().map(|s| s.heading).collect();
        assert_eq!(headings, vec!["Threat Advisories", "Industry News"]);
        assert_eq!(digest.sections[0].articles[0].indicators[0].value, "CVE-2024-12345");
        assert_eq!(digest.sections[1].articles[0].tags, vec!["Policy".to_string()]);

        let (path, count) = write_digest(&repo, dir.path(), "threat_intel", "Threat Intelligence", Tier::Daily)
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert!(path.ends_with(format!("{}_tier0.json", Utc::now().format("%Y-%m-%d"))));
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["sections"][0]["category"], "threat_advisory");
    }
}
