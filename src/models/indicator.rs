use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndicatorKind {
    Ip,
    Domain,
    Url,
    HashMd5,
    HashSha1,
    HashSha256,
    Email,
    Cve,
    AttackId,
    RegistryKey,
    FilePath,
    CryptoAddress,
    RuleName,
}

impl IndicatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorKind::Ip => "ip",
            IndicatorKind::Domain => "domain",
            IndicatorKind::Url => "url",
            IndicatorKind::HashMd5 => "hash-md5",
            IndicatorKind::HashSha1 => "hash-sha1",
            IndicatorKind::HashSha256 => "hash-sha256",
            IndicatorKind::Email => "email",
            IndicatorKind::Cve => "cve",
            IndicatorKind::AttackId => "attack-id",
            IndicatorKind::RegistryKey => "registry-key",
            IndicatorKind::FilePath => "file-path",
            IndicatorKind::CryptoAddress => "crypto-address",
            IndicatorKind::RuleName => "rule-name",
        }
    }
}

impl FromStr for IndicatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "ip" => IndicatorKind::Ip,
            "domain" => IndicatorKind::Domain,
            "url" => IndicatorKind::Url,
            "hash-md5" => IndicatorKind::HashMd5,
            "hash-sha1" => IndicatorKind::HashSha1,
            "hash-sha256" => IndicatorKind::HashSha256,
            "email" => IndicatorKind::Email,
            "cve" => IndicatorKind::Cve,
            "attack-id" => IndicatorKind::AttackId,
            "registry-key" => IndicatorKind::RegistryKey,
            "file-path" => IndicatorKind::FilePath,
            "crypto-address" => IndicatorKind::CryptoAddress,
            "rule-name" => IndicatorKind::RuleName,
            other => return Err(format!("unknown indicator kind '{other}'")),
        };
        Ok(kind)
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An extracted indicator. Ordering is by kind, then value, so a
/// `BTreeSet<Indicator>` iterates deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Indicator {
    pub kind: IndicatorKind,
    pub value: String,
    pub context: String,
}
