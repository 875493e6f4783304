use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{Article, ContentCategory, IngestOutcome, Indicator, NewArticle};

use super::schema::SCHEMA;

const ARTICLE_COLUMNS: &str = "id, tracker_name, source, title, url, author, published_date, \
     content, summary, content_type, vendor, product, scraped_date, analyzed_date";

/// Fixed-width UTC form so stored timestamps compare correctly as text.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub total: i64,
    pub pending: i64,
    pub analyzed: i64,
}

/// One indicator search result with enough of its article to locate it.
#[derive(Debug, Clone)]
pub struct IndicatorHit {
    pub indicator: Indicator,
    pub article_id: i64,
    pub tracker: String,
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
}

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Tracker operations

    pub async fn register_tracker(&self, name: &str, display_name: &str) -> Result<()> {
        let name = name.to_string();
        let display_name = display_name.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO trackers (name, display_name) VALUES (?1, ?2)
                       ON CONFLICT(name) DO UPDATE SET display_name = excluded.display_name"#,
                    params![name, display_name],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn tracker_stats(&self, tracker: &str) -> Result<TrackerStats> {
        let tracker = tracker.to_string();
        let stats = self
            .conn
            .call(move |conn| {
                let stats = conn.query_row(
                    r#"SELECT COUNT(*),
                              COALESCE(SUM(CASE WHEN analyzed_date IS NULL THEN 1 ELSE 0 END), 0),
                              COALESCE(SUM(CASE WHEN analyzed_date IS NOT NULL THEN 1 ELSE 0 END), 0)
                       FROM articles WHERE tracker_name = ?1"#,
                    params![tracker],
                    |row| {
                        Ok(TrackerStats {
                            total: row.get(0)?,
                            pending: row.get(1)?,
                            analyzed: row.get(2)?,
                        })
                    },
                )?;
                Ok(stats)
            })
            .await?;
        Ok(stats)
    }

    // Article operations

    /// Insert unless `(tracker, url)` is already stored. An existing row is
    /// never touched.
    pub async fn insert_article(&self, article: NewArticle) -> Result<IngestOutcome> {
        let outcome = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"INSERT INTO articles (tracker_name, source, title, url, author, published_date,
                                            content, vendor, product, scraped_date)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                       ON CONFLICT(tracker_name, url) DO NOTHING"#,
                    params![
                        article.tracker,
                        article.source,
                        article.title,
                        article.url,
                        article.author,
                        format_timestamp(&article.published_at),
                        article.content,
                        article.vendor,
                        article.product,
                        format_timestamp(&article.scraped_at),
                    ],
                )?;
                if changed == 0 {
                    Ok(IngestOutcome::Skipped)
                } else {
                    Ok(IngestOutcome::Inserted(conn.last_insert_rowid()))
                }
            })
            .await?;
        Ok(outcome)
    }

    pub async fn get_article(&self, id: i64) -> Result<Option<Article>> {
        let article = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?1"
                ))?;
                let article = stmt.query_row(params![id], article_from_row).optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    /// Articles not yet analyzed, oldest scrape first.
    pub async fn pending_articles(&self, tracker: &str, limit: Option<usize>) -> Result<Vec<Article>> {
        let tracker = tracker.to_string();
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT {ARTICLE_COLUMNS} FROM articles
                       WHERE tracker_name = ?1 AND analyzed_date IS NULL
                       ORDER BY scraped_date ASC, id ASC
                       LIMIT ?2"#
                ))?;
                let articles = stmt
                    .query_map(params![tracker, limit], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    /// Analyzed articles whose analysis time is at or after `since`, newest
    /// publication first with insertion order breaking ties.
    pub async fn analyzed_since(&self, tracker: &str, since: DateTime<Utc>) -> Result<Vec<Article>> {
        let tracker = tracker.to_string();
        let since = format_timestamp(&since);
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT {ARTICLE_COLUMNS} FROM articles
                       WHERE tracker_name = ?1
                         AND analyzed_date IS NOT NULL
                         AND analyzed_date >= ?2
                       ORDER BY published_date DESC, id ASC"#
                ))?;
                let articles = stmt
                    .query_map(params![tracker, since], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    /// Record the analysis result. Returns `false` if the article was
    /// already analyzed, in which case nothing changes.
    pub async fn mark_analyzed(
        &self,
        id: i64,
        category: ContentCategory,
        summary: String,
        analyzed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let analyzed_at = format_timestamp(&analyzed_at);
        let updated = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"UPDATE articles SET content_type = ?1, summary = ?2, analyzed_date = ?3
                       WHERE id = ?4 AND analyzed_date IS NULL"#,
                    params![category.as_str(), summary, analyzed_at, id],
                )?;
                Ok(changed == 1)
            })
            .await?;
        Ok(updated)
    }

    // Indicator operations

    /// Replace the article's indicator set wholesale.
    pub async fn replace_indicators(&self, article_id: i64, indicators: Vec<Indicator>) -> Result<usize> {
        let count = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM indicators WHERE article_id = ?1", params![article_id])?;
                let mut inserted = 0;
                {
                    let mut stmt = tx.prepare(
                        r#"INSERT OR IGNORE INTO indicators (article_id, kind, value, context)
                           VALUES (?1, ?2, ?3, ?4)"#,
                    )?;
                    for indicator in &indicators {
                        inserted += stmt.execute(params![
                            article_id,
                            indicator.kind.as_str(),
                            indicator.value,
                            indicator.context,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;
        Ok(count)
    }

    pub async fn indicators_for(&self, article_id: i64) -> Result<Vec<Indicator>> {
        let indicators = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT kind, value, context FROM indicators WHERE article_id = ?1 ORDER BY kind, value",
                )?;
                let rows = stmt
                    .query_map(params![article_id], |row| {
                        Ok((row.get::<_, String>(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        Ok(indicators
            .into_iter()
            .filter_map(|(kind, value, context)| {
                Some(Indicator {
                    kind: kind.parse().ok()?,
                    value,
                    context,
                })
            })
            .collect())
    }

    /// Substring search over indicator values, newest articles first.
    pub async fn search_by_indicator(&self, needle: &str) -> Result<Vec<IndicatorHit>> {
        let pattern = format!("%{}%", needle.trim());
        let hits = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT i.kind, i.value, i.context, a.id, a.tracker_name, a.title, a.url, a.published_date
                       FROM indicators i
                       JOIN articles a ON a.id = i.article_id
                       WHERE i.value LIKE ?1
                       ORDER BY a.published_date DESC, a.id ASC"#,
                )?;
                let rows = stmt
                    .query_map(params![pattern], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, String>(6)?,
                            row.get::<_, Option<String>>(7)?,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        Ok(hits
            .into_iter()
            .filter_map(
                |(kind, value, context, article_id, tracker, title, url, published)| {
                    Some(IndicatorHit {
                        indicator: Indicator {
                            kind: kind.parse().ok()?,
                            value,
                            context,
                        },
                        article_id,
                        tracker,
                        title,
                        url,
                        published_at: published.and_then(|s| parse_datetime(&s)),
                    })
                },
            )
            .collect())
    }

    // Tag operations

    pub async fn add_tags(&self, article_id: i64, tags: Vec<String>) -> Result<()> {
        if tags.is_empty() {
            return Ok(());
        }
        self.conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("INSERT OR IGNORE INTO tags (article_id, tag) VALUES (?1, ?2)")?;
                for tag in &tags {
                    stmt.execute(params![article_id, tag])?;
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn tags_for(&self, article_id: i64) -> Result<Vec<String>> {
        let tags = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT tag FROM tags WHERE article_id = ?1 ORDER BY tag")?;
                let tags = stmt
                    .query_map(params![article_id], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                Ok(tags)
            })
            .await?;
        Ok(tags)
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        tracker: row.get(1)?,
        source: row.get(2)?,
        title: row.get(3)?,
        url: row.get(4)?,
        author: row.get(5)?,
        published_at: row
            .get::<_, Option<String>>(6)?
            .and_then(|s| parse_datetime(&s)),
        content: row.get(7)?,
        summary: row.get(8)?,
        category: row
            .get::<_, Option<String>>(9)?
            .and_then(|s| s.parse().ok()),
        vendor: row.get(10)?,
        product: row.get(11)?,
        scraped_at: row
            .get::<_, String>(12)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        analyzed_at: row
            .get::<_, Option<String>>(13)?
            .and_then(|s| parse_datetime(&s)),
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::models::{ArticleState, IndicatorKind};

    async fn repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secintel.db");
        let repo = Repository::new(path.to_str().unwrap()).await.unwrap();
        (dir, repo)
    }

    fn new_article(url: &str, published_at: DateTime<Utc>) -> NewArticle {
        NewArticle {
            tracker: "threat_intel".into(),
            source: "Vendor Blog".into(),
            title: format!("Post {url}"),
            url: url.into(),
            author: None,
            published_at,
            content: "original body".into(),
            vendor: None,
            product: None,
            scraped_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_url_is_skipped_and_untouched() {
        let (_dir, repo) = repo().await;
        let now = Utc::now();
        let first = repo.insert_article(new_article("https://a.test/1", now)).await.unwrap();
        let IngestOutcome::Inserted(id) = first else {
            panic!("first insert should succeed");
        };

        let mut again = new_article("https://a.test/1", now);
        again.content = "rewritten body".into();
        assert_eq!(repo.insert_article(again).await.unwrap(), IngestOutcome::Skipped);

        let stored = repo.get_article(id).await.unwrap().unwrap();
        assert_eq!(stored.content, "original body");
        assert_eq!(stored.state(), ArticleState::Pending);
        assert_eq!(repo.tracker_stats("threat_intel").await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn same_url_in_another_tracker_is_a_new_article() {
        let (_dir, repo) = repo().await;
        let now = Utc::now();
        repo.insert_article(new_article("https://a.test/1", now)).await.unwrap();
        let mut other = new_article("https://a.test/1", now);
        other.tracker = "llm_news".into();
        assert!(matches!(
            repo.insert_article(other).await.unwrap(),
            IngestOutcome::Inserted(_)
        ));
    }

    #[tokio::test]
    async fn analysis_is_committed_once() {
        let (_dir, repo) = repo().await;
        let IngestOutcome::Inserted(id) = repo
            .insert_article(new_article("https://a.test/1", Utc::now()))
            .await
            .unwrap()
        else {
            panic!("insert failed");
        };

        let done = repo
            .mark_analyzed(id, ContentCategory::ThreatAdvisory, "first".into(), Utc::now())
            .await
            .unwrap();
        assert!(done);
        let again = repo
            .mark_analyzed(id, ContentCategory::IndustryNews, "second".into(), Utc::now())
            .await
            .unwrap();
        assert!(!again);

        let stored = repo.get_article(id).await.unwrap().unwrap();
        assert_eq!(stored.category, Some(ContentCategory::ThreatAdvisory));
        assert_eq!(stored.summary.as_deref(), Some("first"));
        assert_eq!(stored.state(), ArticleState::Analyzed);
        assert!(repo.pending_articles("threat_intel", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn indicators_are_replaced_not_merged() {
        let (_dir, repo) = repo().await;
        let IngestOutcome::Inserted(id) = repo
            .insert_article(new_article("https://a.test/1", Utc::now()))
            .await
            .unwrap()
        else {
            panic!("insert failed");
        };
        let ioc = |kind, value: &str| Indicator {
            kind,
            value: value.into(),
            context: String::new(),
        };

        repo.replace_indicators(
            id,
            vec![
                ioc(IndicatorKind::Ip, "45.77.12.9"),
                ioc(IndicatorKind::Cve, "CVE-2024-1234"),
            ],
        )
        .await
        .unwrap();
        repo.replace_indicators(id, vec![ioc(IndicatorKind::Cve, "CVE-2024-1234")])
            .await
            .unwrap();

        let stored = repo.indicators_for(id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].kind, IndicatorKind::Cve);

        let hits = repo.search_by_indicator("2024-12").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].article_id, id);
    }

    #[tokio::test]
    async fn analyzed_since_orders_by_publication_then_id() {
        let (_dir, repo) = repo().await;
        let now = Utc::now();
        let same_day = now - Duration::days(1);
        let mut ids = Vec::new();
        for (url, published) in [
            ("https://a.test/old", now - Duration::days(3)),
            ("https://a.test/tie-a", same_day),
            ("https://a.test/tie-b", same_day),
        ] {
            if let IngestOutcome::Inserted(id) =
                repo.insert_article(new_article(url, published)).await.unwrap()
            {
                repo.mark_analyzed(id, ContentCategory::IndustryNews, "s".into(), now)
                    .await
                    .unwrap();
                ids.push(id);
            }
        }
        repo.insert_article(new_article("https://a.test/pending", now))
            .await
            .unwrap();

        let selected = repo
            .analyzed_since("threat_intel", now - Duration::days(7))
            .await
            .unwrap();
        let order: Vec<i64> = selected.iter().map(|a| a.id).collect();
        assert_eq!(order, vec![ids[1], ids[2], ids[0]]);

        let stats = repo.tracker_stats("threat_intel").await.unwrap();
        assert_eq!(
            stats,
            TrackerStats {
                total: 4,
                pending: 1,
                analyzed: 3
            }
        );
    }

    #[tokio::test]
    async fn tags_are_unique_per_article() {
        let (_dir, repo) = repo().await;
        repo.register_tracker("threat_intel", "Threat Intelligence")
            .await
            .unwrap();
        let IngestOutcome::Inserted(id) = repo
            .insert_article(new_article("https://a.test/1", Utc::now()))
            .await
            .unwrap()
        else {
            panic!("insert failed");
        };
        repo.add_tags(id, vec!["Bug Fix".into(), "Bug Fix".into(), "Deprecation".into()])
            .await
            .unwrap();
        assert_eq!(
            repo.tags_for(id).await.unwrap(),
            vec!["Bug Fix".to_string(), "Deprecation".to_string()]
        );
    }
}
