//! Normalization of raw connector records into stored articles.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use tracing::debug;
use url::Url;

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{IngestOutcome, NewArticle, RawRecord};

const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "ref_src"];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%B %d, %Y",
    "%b %d, %Y",
    "%b. %d, %Y",
    "%A, %B %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%m/%d/%Y",
    "%Y/%m/%d",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const UPDATE_TYPES: &[(&str, &[&str])] = &[
    (
        "Feature Update",
        &[
            "new feature",
            "introducing",
            "now available",
            "new capability",
            "announcing",
            "launched",
            "rolling out",
        ],
    ),
    (
        "Bug Fix",
        &[
            "bug fix",
            "fixed issue",
            "resolved issue",
            "fixes a bug",
            "addresses issue",
        ],
    ),
    (
        "Security Patch",
        &[
            "security update",
            "security vulnerability",
            "cve-",
            "security patch",
            "security fix",
        ],
    ),
    (
        "Performance Improvement",
        &[
            "performance improvement",
            "performance enhancement",
            "faster performance",
            "improved performance",
            "speed improvement",
        ],
    ),
    (
        "Deprecation",
        &[
            "deprecat",
            "end of support",
            "retiring",
            "sunset",
            "no longer supported",
        ],
    ),
    (
        "Known Issue",
        &[
            "known issue",
            "known limitation",
            "investigating issue",
            "aware of issue",
        ],
    ),
];

pub const GENERAL_UPDATE: &str = "General Update";

/// Canonical form used for the `(tracker, url)` identity: parsed, host
/// lowercased, tracking parameters dropped. Fragments are kept because
/// single-page sources address entries by fragment.
pub fn canonical_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    let kept: Vec<&(String, String)> = pairs
        .iter()
        .filter(|(k, _)| !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_str()))
        .collect();
    if kept.len() != pairs.len() {
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut()
                .clear()
                .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
    }
    Some(url.to_string())
}

pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

/// Parse a source-supplied publication time. Accepts the formats seen across
/// feeds, vendor pages and APIs; returns `None` when nothing fits.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    // "March 2025" style headings date to the last day of that month.
    if let Ok(first) = NaiveDate::parse_from_str(&format!("1 {raw}"), "%d %B %Y") {
        return last_day_of_month(first.year(), first.month())
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc());
    }
    None
}

/// Keyword-derived update types for vendor and product sources.
pub fn update_type_tags(title: &str, content: &str) -> Vec<String> {
    let text = format!("{title}\n{content}").to_lowercase();
    let tags: Vec<String> = UPDATE_TYPES
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(name, _)| name.to_string())
        .collect();
    if tags.is_empty() {
        vec![GENERAL_UPDATE.to_string()]
    } else {
        tags
    }
}

/// Turn a raw record into an article ready for insertion.
pub fn normalize(
    tracker: &str,
    source_name: &str,
    record: RawRecord,
    scraped_at: DateTime<Utc>,
) -> Result<NewArticle> {
    let url = canonical_url(&record.url)
        .ok_or_else(|| AppError::parse(source_name, format!("invalid url '{}'", record.url)))?;

    let published_at = match record.published_at.as_deref() {
        Some(raw) => parse_published(raw).unwrap_or_else(|| {
            debug!(source = %source_name, raw, "unparseable publish date, using scrape time");
            scraped_at
        }),
        None => scraped_at,
    };

    let title = record.title.trim();
    Ok(NewArticle {
        tracker: tracker.to_string(),
        source: source_name.to_string(),
        title: if title.is_empty() {
            url.clone()
        } else {
            title.to_string()
        },
        url,
        author: record.author.filter(|a| !a.trim().is_empty()),
        published_at,
        content: record.content,
        vendor: record.vendor,
        product: record.product,
        scraped_at,
    })
}

/// Store one record unless its `(tracker, url)` already exists. Feed tags
/// are attached to newly inserted articles only.
pub async fn ingest(
    repo: &Repository,
    tracker: &str,
    source_name: &str,
    record: RawRecord,
) -> Result<IngestOutcome> {
    let tags = record.tags.clone();
    let article = normalize(tracker, source_name, record, Utc::now())?;
    let outcome = repo.insert_article(article).await?;
    if let IngestOutcome::Inserted(id) = outcome {
        repo.add_tags(id, tags).await?;
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn record(url: &str) -> RawRecord {
        RawRecord {
            title: "Advisory".into(),
            url: url.into(),
            content: "body".into(),
            ..Default::default()
        }
    }

    #[test]
    fn canonical_url_drops_tracking_but_keeps_fragment() {
        assert_eq!(
            canonical_url("https://Vendor.Test/notes?utm_source=rss&id=7#2025-03-01").as_deref(),
            Some("https://vendor.test/notes?id=7#2025-03-01")
        );
        assert_eq!(
            canonical_url("https://vendor.test/a?utm_medium=x").as_deref(),
            Some("https://vendor.test/a")
        );
        assert_eq!(canonical_url("not a url"), None);
        assert_eq!(canonical_url("ftp://vendor.test/file"), None);
    }

    #[test]
    fn published_formats() {
        let day = |y, m, d| Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap();
        assert_eq!(parse_published("2025-03-04"), Some(day(2025, 3, 4)));
        assert_eq!(parse_published("March 4, 2025"), Some(day(2025, 3, 4)));
        assert_eq!(parse_published("Mar 4, 2025"), Some(day(2025, 3, 4)));
        assert_eq!(parse_published("4 March 2025"), Some(day(2025, 3, 4)));
        assert_eq!(parse_published("03/04/2025"), Some(day(2025, 3, 4)));
        assert_eq!(parse_published("February 2024"), Some(day(2024, 2, 29)));
        assert_eq!(
            parse_published("Tue, 04 Mar 2025 10:30:00 GMT"),
            Some(Utc.with_ymd_and_hms(2025, 3, 4, 10, 30, 0).unwrap())
        );
        assert_eq!(
            parse_published("2025-03-04T10:30:00+02:00"),
            Some(Utc.with_ymd_and_hms(2025, 3, 4, 8, 30, 0).unwrap())
        );
        assert_eq!(parse_published("last Tuesday"), None);
    }

    #[test]
    fn unparseable_date_falls_back_to_scrape_time() {
        let scraped = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut raw = record("https://vendor.test/a");
        raw.published_at = Some("sometime soon".into());
        let article = normalize("t", "src", raw, scraped).unwrap();
        assert_eq!(article.published_at, scraped);
        assert_eq!(article.scraped_at, scraped);
    }

    #[test]
    fn invalid_url_is_a_parse_error() {
        let err = normalize("t", "src", record("/relative/only"), Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::ScrapeParse { .. }));
    }

    #[test]
    fn update_types_default_to_general() {
        assert_eq!(
            update_type_tags("Release notes", "Minor wording changes."),
            vec![GENERAL_UPDATE.to_string()]
        );
        let tags = update_type_tags(
            "Agent 4.18",
            "Fixes a bug in scanning. This security update addresses CVE-2025-1.",
        );
        assert_eq!(tags, vec!["Bug Fix".to_string(), "Security Patch".to_string()]);
    }

    #[tokio::test]
    async fn ingesting_twice_keeps_one_article() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest.db");
        let repo = Repository::new(path.to_str().unwrap()).await.unwrap();

        let mut raw = record("https://vendor.test/post?utm_campaign=spring");
        raw.tags = vec!["ransomware".into()];
        let first = ingest(&repo, "threat_intel", "Vendor", raw.clone()).await.unwrap();
        let second = ingest(&repo, "threat_intel", "Vendor", raw).await.unwrap();

        let IngestOutcome::Inserted(id) = first else {
            panic!("first ingest should insert");
        };
        assert_eq!(second, IngestOutcome::Skipped);
        assert_eq!(repo.tracker_stats("threat_intel").await.unwrap().total, 1);
        assert_eq!(repo.tags_for(id).await.unwrap(), vec!["ransomware".to_string()]);
    }
}
