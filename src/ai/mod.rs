//! Generative model backends and the classification router.
//!
//! Exactly one backend is built per run from configuration and handed to the
//! router; nothing here holds global provider state.

mod claude;
mod openai;
pub mod router;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::{AiConfig, AiProvider};
use crate::error::{AppError, Result};

use claude::ClaudeClient;
use openai::OpenAiCompatibleClient;
pub use router::{canned_summary, classify, summarize};

/// A system instruction plus one user turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatPrompt {
    pub system: String,
    pub user: String,
}

impl ChatPrompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

const CLASSIFIER_SYSTEM: &str =
    "You are a precise content classifier. Respond with only the category name, nothing else.";

fn classification_prompt(title: &str, content_prefix: &str) -> String {
    format!(
        r#"You are a cybersecurity content classifier. Classify the following article into ONE of these categories:

1. threat_advisory - CVEs, vulnerabilities, security patches, malware analysis, threat actor reports, breach and incident reports, active exploitation, indicators of compromise, security advisories.

2. product_update - vendor changelogs, feature announcements, release notes, beta or preview features, version updates, roadmaps.

3. industry_news - general security news, opinion, policy and regulation, industry trends, explainers and how-to guides, company announcements, market research.

Title: {title}

Content (first characters):
{content_prefix}

Respond with ONLY ONE WORD - the category name (threat_advisory, product_update, or industry_news).
Do not include any explanation or additional text."#
    )
}

#[async_trait]
pub trait AiBackend: Send + Sync {
    fn provider(&self) -> &'static str;

    fn model_name(&self) -> &str;

    async fn chat_completion(
        &self,
        prompt: &ChatPrompt,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String>;

    /// Raw model reply to the classification prompt. Validation is the
    /// router's job.
    async fn classify_content(&self, title: &str, content_prefix: &str) -> Result<String> {
        let prompt = ChatPrompt::new(CLASSIFIER_SYSTEM, classification_prompt(title, content_prefix));
        self.chat_completion(&prompt, 50, 0.0).await
    }

    async fn test_connection(&self) -> Result<String> {
        let prompt = ChatPrompt::new(
            "You are a connectivity check.",
            "Hello! Please respond with 'OK' if you can hear me.",
        );
        let reply = self.chat_completion(&prompt, 50, 0.0).await?;
        if reply.trim().is_empty() {
            return Err(AppError::Ai(format!("{} returned an empty reply", self.provider())));
        }
        Ok(reply)
    }
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .build()?)
}

pub fn build_backend(config: &AiConfig) -> Result<Box<dyn AiBackend>> {
    match config.provider {
        AiProvider::Local => Ok(Box::new(OpenAiCompatibleClient::new(
            &config.local,
            config.timeout_secs,
        )?)),
        AiProvider::Claude => {
            let api_key = config.claude.api_key.clone().ok_or_else(|| {
                AppError::Config(
                    "ai.provider is 'claude' but no ai.claude.api_key or ANTHROPIC_API_KEY is set"
                        .to_string(),
                )
            })?;
            Ok(Box::new(ClaudeClient::new(
                api_key,
                config.claude.model.clone(),
                config.timeout_secs,
            )?))
        }
    }
}
