use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{}", format_validation(.tracker, .source_name, .field, .message, .hint))]
    ConfigValidation {
        tracker: String,
        source_name: String,
        field: String,
        message: String,
        hint: Option<String>,
    },

    #[error("Source fetch failed for {source_name}: {message}")]
    SourceFetch { source_name: String, message: String },

    #[error("Could not parse {source_name}: {message}")]
    ScrapeParse { source_name: String, message: String },

    #[error("AI provider error: {0}")]
    Ai(String),

    #[error("Unusable classification: {0}")]
    Classification(String),

    #[error("Summarization failed: {0}")]
    Summarization(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

fn format_validation(
    tracker: &str,
    source_name: &str,
    field: &str,
    message: &str,
    hint: &Option<String>,
) -> String {
    let mut out = format!("[{tracker}] {source_name}: {message} (field '{field}')");
    if let Some(hint) = hint {
        out.push_str(&format!("\n    Hint: {hint}"));
    }
    out
}

impl AppError {
    pub fn fetch(source: &str, message: impl ToString) -> Self {
        AppError::SourceFetch {
            source_name: source.to_string(),
            message: message.to_string(),
        }
    }

    pub fn parse(source: &str, message: impl ToString) -> Self {
        AppError::ScrapeParse {
            source_name: source.to_string(),
            message: message.to_string(),
        }
    }

    /// Faults that must stop the whole run rather than a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::Sqlite(_)
                | AppError::Config(_)
                | AppError::ConfigValidation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_mentions_field_and_hint() {
        let err = AppError::ConfigValidation {
            tracker: "threat_intel".into(),
            source_name: "Feed A".into(),
            field: "feedurl".into(),
            message: "Unknown field: 'feedurl'".into(),
            hint: Some("Did you mean 'feed_url'?".into()),
        };
        let text = err.to_string();
        assert!(text.contains("feedurl"));
        assert!(text.contains("Did you mean 'feed_url'?"));
    }

    #[test]
    fn store_faults_are_fatal_fetch_faults_are_not() {
        assert!(AppError::Sqlite(rusqlite::Error::InvalidQuery).is_fatal());
        assert!(!AppError::fetch("Feed A", "timeout").is_fatal());
        assert!(!AppError::Summarization("empty".into()).is_fatal());
    }
}
