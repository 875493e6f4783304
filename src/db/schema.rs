pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- trackers table
CREATE TABLE IF NOT EXISTS trackers (
    name TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

-- articles table
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tracker_name TEXT NOT NULL,
    source TEXT NOT NULL,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    author TEXT,
    published_date TEXT,
    content TEXT NOT NULL,
    summary TEXT,
    content_type TEXT,
    vendor TEXT,
    product TEXT,
    scraped_date TEXT NOT NULL,
    analyzed_date TEXT,
    UNIQUE(tracker_name, url)
);

CREATE INDEX IF NOT EXISTS idx_articles_tracker ON articles(tracker_name);
CREATE INDEX IF NOT EXISTS idx_articles_published ON articles(published_date DESC);
CREATE INDEX IF NOT EXISTS idx_articles_analyzed ON articles(tracker_name, analyzed_date);

-- indicators table
CREATE TABLE IF NOT EXISTS indicators (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    value TEXT NOT NULL,
    context TEXT NOT NULL DEFAULT '',
    UNIQUE(article_id, kind, value)
);

CREATE INDEX IF NOT EXISTS idx_indicators_value ON indicators(value);
CREATE INDEX IF NOT EXISTS idx_indicators_article ON indicators(article_id);

-- tags table
CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    UNIQUE(article_id, tag)
);

CREATE INDEX IF NOT EXISTS idx_tags_article ON tags(article_id);
"#;
