//! Category gate in front of summarization.
//!
//! The model's classification reply is accepted only when it is exactly one
//! of the three category tokens; anything else resolves to
//! [`ContentCategory::IndustryNews`], whose template carries the strictest
//! limits on what the summary may claim.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::models::{ContentCategory, Indicator};

use super::{AiBackend, ChatPrompt};

pub const CLASSIFY_PREFIX_CHARS: usize = 2000;
pub const SUMMARY_CONTENT_CHARS: usize = 12_000;
/// Below this the article is not sent to the model at all.
pub const MIN_CONTENT_CHARS: usize = 200;
const MAX_LISTED_INDICATORS: usize = 50;

const PROMOTIONAL_MARKERS: &[&str] = &[
    "essential checklist for modern ai-driven cloud defense",
    "discover how agentic ai transforms",
    "subscribe to our newsletter",
    "sign up for free",
];

const NO_FABRICATION: &str = "ACCURACY IS PARAMOUNT: never invent IOCs (IP addresses, domains, URLs, \
file hashes, email addresses), CVE numbers, CVSS scores, threat actor names or technical details \
that are not present in the source. If something is not in the article, say it is not provided.";

static SUMMARY_ARTIFACTS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^\s*\**(technical\s+)?(threat intelligence\s+)?summary\s*[-–—:][^\n]*\n+",
        r"(?i)^\s*(here is|below is)\s+(the\s+|a\s+)?[^\n]{0,60}summary[:\s]*\n*",
        r"(?i)^\s*\*?source:[^\n]*\n+",
        r"^\s*[-–—]{3,}\s*",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("artifact pattern"))
    .collect()
});

static CVE_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bCVE-\d{4}-\d{4,7}\b").expect("cve pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: ContentCategory,
    /// The model reply was unusable and the conservative default was applied.
    pub fallback: bool,
}

fn prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

fn short_title(title: &str) -> &str {
    prefix(title, 50)
}

/// Always one of the three categories; never an error.
pub async fn classify(backend: &dyn AiBackend, title: &str, content: &str) -> Classification {
    let reply = backend
        .classify_content(title, prefix(content, CLASSIFY_PREFIX_CHARS))
        .await;

    let outcome = match reply {
        Ok(raw) => ContentCategory::from_model_output(&raw)
            .ok_or_else(|| AppError::Classification(format!("unrecognised reply '{}'", raw.trim()))),
        Err(e) => Err(AppError::Classification(e.to_string())),
    };

    match outcome {
        Ok(category) => {
            info!(title = %short_title(title), category = %category, "Classified article");
            Classification {
                category,
                fallback: false,
            }
        }
        Err(e) => {
            warn!(title = %short_title(title), error = %e, "Defaulting to industry_news");
            Classification {
                category: ContentCategory::IndustryNews,
                fallback: true,
            }
        }
    }
}

/// Fixed summary for content that should not reach the model.
pub fn canned_summary(content: &str) -> Option<String> {
    let length = content.trim().chars().count();
    if length < MIN_CONTENT_CHARS {
        return Some(format!(
            "*Content unavailable or insufficient for analysis (only {length} characters scraped). \
             This may be due to a temporary scraping issue or paywall.*"
        ));
    }
    let lowered = content.to_lowercase();
    if PROMOTIONAL_MARKERS.iter().any(|m| lowered.contains(m)) {
        return Some(
            "*Article content appears to be promotional material or was not properly scraped. \
             Visit the article URL for full content.*"
                .to_string(),
        );
    }
    None
}

fn indicator_listing(indicators: &[Indicator]) -> String {
    if indicators.is_empty() {
        return "Extracted indicators: none.".to_string();
    }
    let mut out = String::from("Extracted indicators (verbatim from the article):\n");
    for indicator in indicators.iter().take(MAX_LISTED_INDICATORS) {
        out.push_str(&format!("- {}: {}\n", indicator.kind, indicator.value));
    }
    if indicators.len() > MAX_LISTED_INDICATORS {
        out.push_str(&format!(
            "- … and {} more\n",
            indicators.len() - MAX_LISTED_INDICATORS
        ));
    }
    out
}

struct Template {
    prompt: ChatPrompt,
    max_tokens: u32,
}

fn template(
    category: ContentCategory,
    title: &str,
    content: &str,
    indicators: &[Indicator],
) -> Template {
    match category {
        ContentCategory::ThreatAdvisory => Template {
            prompt: ChatPrompt::new(
                format!(
                    "You are a cybersecurity threat intelligence analyst. Provide accurate, \
                     concise, technical summaries of threat intelligence.\n\n{NO_FABRICATION}"
                ),
                format!(
                    "Summarize the following threat intelligence article.\n\n\
                     Title: {title}\n\nContent:\n{content}\n\n{listing}\n\n\
                     Cover, where the article provides them:\n\
                     1. The threat, malware, vulnerability or campaign\n\
                     2. Threat actor attribution\n\
                     3. Tactics, techniques and MITRE ATT&CK mappings\n\
                     4. The most significant indicators of compromise\n\
                     5. Targeted sectors or regions\n\
                     6. Impact, severity and recommended mitigations\n\n\
                     Keep it to 250-350 words. Only mention indicators listed above or stated in \
                     the article. If no actor is named, write \"Threat actor not attributed\".",
                    listing = indicator_listing(indicators),
                ),
            ),
            max_tokens: 2000,
        },
        ContentCategory::ProductUpdate => Template {
            prompt: ChatPrompt::new(
                "You are a cybersecurity product analyst. Provide clear, informative summaries \
                 of security product updates.",
                format!(
                    "Summarize the following product update or announcement.\n\n\
                     Title: {title}\n\nContent:\n{content}\n\n\
                     Describe what changed: the product or feature updated, the main changes, \
                     availability, and why it matters operationally. Keep it to 150-250 words.\n\n\
                     IMPORTANT: Do NOT fabricate IOCs, threat actors, or attack details. This is \
                     a product update, not a threat advisory."
                ),
            ),
            max_tokens: 1500,
        },
        ContentCategory::IndustryNews => Template {
            prompt: ChatPrompt::new(
                "You are a cybersecurity industry analyst. Provide brief, factual summaries of \
                 cybersecurity news.",
                format!(
                    "Summarize the following cybersecurity news article in 2-3 sentences \
                     (at most 100 words): the main topic, why it is relevant, and the key \
                     takeaway.\n\nTitle: {title}\n\nContent:\n{content}\n\n\
                     IMPORTANT: Do NOT fabricate IOCs, CVEs, threat actors, or specific attack \
                     details. Stick to the facts presented in the article."
                ),
            ),
            max_tokens: 500,
        },
    }
}

/// Strip headers and preambles models tend to echo from the prompt.
pub fn clean_artifacts(summary: &str) -> String {
    let mut cleaned = summary.to_string();
    for pattern in SUMMARY_ARTIFACTS.iter() {
        cleaned = pattern.replace(&cleaned, "").into_owned();
    }
    cleaned.trim().to_string()
}

/// CVE identifiers in the summary that never appear in the source text.
pub fn unsupported_cves(summary: &str, source: &str) -> Vec<String> {
    let known: BTreeSet<String> = CVE_MENTION
        .find_iter(source)
        .map(|m| m.as_str().to_uppercase())
        .collect();
    let unsupported: BTreeSet<String> = CVE_MENTION
        .find_iter(summary)
        .map(|m| m.as_str().to_uppercase())
        .filter(|cve| !known.contains(cve))
        .collect();
    unsupported.into_iter().collect()
}

pub async fn summarize(
    backend: &dyn AiBackend,
    title: &str,
    content: &str,
    category: ContentCategory,
    indicators: &[Indicator],
) -> Result<String> {
    let body = prefix(content, SUMMARY_CONTENT_CHARS);
    let Template { prompt, max_tokens } = template(category, title, body, indicators);

    let raw = backend
        .chat_completion(&prompt, max_tokens, 0.0)
        .await
        .map_err(|e| AppError::Summarization(e.to_string()))?;

    let mut summary = clean_artifacts(&raw);
    if summary.is_empty() {
        return Err(AppError::Summarization("model returned an empty summary".to_string()));
    }

    if category == ContentCategory::ThreatAdvisory {
        let unsupported = unsupported_cves(&summary, content);
        if !unsupported.is_empty() {
            warn!(title = %short_title(title), cves = ?unsupported, "Summary cites CVEs absent from the article");
            summary.push_str(&format!(
                "\n\n**CVE check**: not found in the source article: {}. Verify against NVD or MITRE.",
                unsupported.join(", ")
            ));
        }
    }

    Ok(summary)
}
