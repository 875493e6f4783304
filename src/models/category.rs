use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    ThreatAdvisory,
    ProductUpdate,
    IndustryNews,
}

impl ContentCategory {
    pub const ALL: [ContentCategory; 3] = [
        ContentCategory::ThreatAdvisory,
        ContentCategory::ProductUpdate,
        ContentCategory::IndustryNews,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentCategory::ThreatAdvisory => "threat_advisory",
            ContentCategory::ProductUpdate => "product_update",
            ContentCategory::IndustryNews => "industry_news",
        }
    }

    pub fn heading(&self) -> &'static str {
        match self {
            ContentCategory::ThreatAdvisory => "Threat Advisories",
            ContentCategory::ProductUpdate => "Product Updates",
            ContentCategory::IndustryNews => "Industry News",
        }
    }

    /// Strict parse of a model reply. Surrounding whitespace, quotes and a
    /// trailing full stop are tolerated; anything else is rejected.
    pub fn from_model_output(raw: &str) -> Option<Self> {
        let mut token = raw.trim();
        loop {
            let stripped = token
                .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*'))
                .trim_end_matches(['.', '!'])
                .trim();
            if stripped == token {
                break;
            }
            token = stripped;
        }
        if token.is_empty() || token.contains(char::is_whitespace) {
            return None;
        }
        token.to_ascii_lowercase().parse().ok()
    }
}

impl FromStr for ContentCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "threat_advisory" => Ok(ContentCategory::ThreatAdvisory),
            "product_update" => Ok(ContentCategory::ProductUpdate),
            "industry_news" => Ok(ContentCategory::IndustryNews),
            other => Err(format!("unknown content category '{other}'")),
        }
    }
}

impl fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
