use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ContentCategory;

/// One record as yielded by a connector, before identity or timestamps are assigned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub title: String,
    pub url: String,
    pub author: Option<String>,
    /// Source-supplied publication time, in whatever format the source uses.
    pub published_at: Option<String>,
    pub content: String,
    pub raw_markup: Option<String>,
    pub vendor: Option<String>,
    pub product: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewArticle {
    pub tracker: String,
    pub source: String,
    pub title: String,
    pub url: String,
    pub author: Option<String>,
    pub published_at: DateTime<Utc>,
    pub content: String,
    pub vendor: Option<String>,
    pub product: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub tracker: String,
    pub source: String,
    pub title: String,
    pub url: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub content: String,
    pub summary: Option<String>,
    pub category: Option<ContentCategory>,
    pub vendor: Option<String>,
    pub product: Option<String>,
    pub scraped_at: DateTime<Utc>,
    pub analyzed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticleState {
    Pending,
    Analyzed,
}

impl Article {
    pub fn state(&self) -> ArticleState {
        match (&self.category, &self.summary, &self.analyzed_at) {
            (Some(_), Some(_), Some(_)) => ArticleState::Analyzed,
            _ => ArticleState::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted(i64),
    Skipped,
}
