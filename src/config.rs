use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::sources::validate::{load_sources, validation_issues};
use crate::sources::SourceConfig;

const APP_DIR: &str = "secintel";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_report_dir")]
    pub report_dir: String,

    #[serde(default)]
    pub ai: AiConfig,

    #[serde(default)]
    pub headless: HeadlessConfig,

    #[serde(default)]
    pub trackers: BTreeMap<String, TrackerConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    /// OpenAI-compatible endpoint, usually a local inference server.
    #[default]
    Local,
    Claude,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub provider: AiProvider,

    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub local: LocalAiConfig,

    #[serde(default)]
    pub claude: ClaudeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalAiConfig {
    #[serde(default = "default_local_url")]
    pub base_url: String,
    #[serde(default = "default_local_key")]
    pub api_key: String,
    #[serde(default = "default_local_model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_claude_model")]
    pub model: String,
}

/// Browserless-compatible render service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadlessConfig {
    #[serde(default = "default_headless_endpoint")]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_engines")]
    pub engines: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Raw definitions; typed by [`Config::sources_for`] after validation.
    #[serde(default)]
    pub sources: Vec<toml::Table>,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR);
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("secintel.db").to_string_lossy().to_string()
}

fn default_report_dir() -> String {
    "reports".to_string()
}

fn default_ai_timeout() -> u64 {
    120
}

fn default_local_url() -> String {
    "http://localhost:1234/v1".to_string()
}

fn default_local_key() -> String {
    "lm-studio".to_string()
}

fn default_local_model() -> String {
    "local-model".to_string()
}

fn default_claude_model() -> String {
    "claude-3-5-haiku-20241022".to_string()
}

fn default_headless_endpoint() -> String {
    "http://localhost:3000".to_string()
}

fn default_engines() -> Vec<String> {
    vec!["chromium".to_string(), "firefox".to_string()]
}

fn default_enabled() -> bool {
    true
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: AiProvider::default(),
            timeout_secs: default_ai_timeout(),
            local: LocalAiConfig::default(),
            claude: ClaudeConfig::default(),
        }
    }
}

impl Default for LocalAiConfig {
    fn default() -> Self {
        Self {
            base_url: default_local_url(),
            api_key: default_local_key(),
            model: default_local_model(),
        }
    }
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_claude_model(),
        }
    }
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            endpoint: default_headless_endpoint(),
            token: None,
            engines: default_engines(),
        }
    }
}

fn sample_tracker() -> TrackerConfig {
    let mut feed = toml::Table::new();
    feed.insert("name".into(), "CISA Advisories".into());
    feed.insert("type".into(), "rss".into());
    feed.insert(
        "feed_url".into(),
        "https://www.cisa.gov/cybersecurity-advisories/all.xml".into(),
    );
    feed.insert("max_articles".into(), toml::Value::Integer(25));

    TrackerConfig {
        display_name: Some("Threat Intelligence".to_string()),
        enabled: true,
        sources: vec![feed],
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut trackers = BTreeMap::new();
        trackers.insert("threat_intel".to_string(), sample_tracker());
        Self {
            db_path: default_db_path(),
            report_dir: default_report_dir(),
            ai: AiConfig::default(),
            headless: HeadlessConfig::default(),
            trackers,
        }
    }
}

impl Config {
    /// Read the file at `path` (or the default location), writing a default
    /// one first if none exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save(&config_path)?;
            config
        };
        config.apply_env();
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Secrets may come from the environment instead of the file.
    fn apply_env(&mut self) {
        if self.ai.claude.api_key.is_none() {
            self.ai.claude.api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        }
        if self.headless.token.is_none() {
            self.headless.token = std::env::var("BROWSERLESS_TOKEN").ok();
        }
    }

    pub fn tracker(&self, name: &str) -> Result<&TrackerConfig> {
        self.trackers.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.trackers.keys().map(String::as_str).collect();
            AppError::Config(format!(
                "unknown tracker '{name}' (configured: {})",
                known.join(", ")
            ))
        })
    }

    /// The named tracker, or every enabled tracker when `only` is `None`.
    pub fn selected_trackers(&self, only: Option<&str>) -> Result<Vec<String>> {
        match only {
            Some(name) => self.tracker(name).map(|_| vec![name.to_string()]),
            None => Ok(self
                .trackers
                .iter()
                .filter(|(_, t)| t.enabled)
                .map(|(name, _)| name.clone())
                .collect()),
        }
    }

    /// Validated, typed sources of a tracker. The first problem is fatal.
    pub fn sources_for(&self, tracker: &str) -> Result<Vec<SourceConfig>> {
        load_sources(tracker, &self.tracker(tracker)?.sources)
    }

    /// Every validation problem across all trackers.
    pub fn validate(&self) -> Vec<AppError> {
        self.trackers
            .iter()
            .flat_map(|(name, tracker)| validation_issues(name, &tracker.sources))
            .collect()
    }
}

impl TrackerConfig {
    pub fn display_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.display_name.as_deref().unwrap_or(name)
    }
}
