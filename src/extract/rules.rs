//! Ordered pattern table for indicator extraction.
//!
//! Rules run top to bottom and each match claims its span of the text. A later
//! rule cannot match inside a span claimed earlier unless the earlier kind is
//! listed in its `nests_in`. This is what keeps a 64-character hex run from
//! also surfacing as a crypto address, or a URL path from surfacing as a file
//! path. Hashes, CVE ids and IPs are still reported from inside a URL; a
//! domain only from the URL's host.
//!
//! When a pattern has capture groups, the first group that participated in
//! the match is the indicator value; otherwise the whole match is.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::IndicatorKind;

pub struct PatternRule {
    pub kind: IndicatorKind,
    pub regex: Regex,
    /// Kinds whose claimed spans this rule may still match inside.
    pub nests_in: &'static [IndicatorKind],
    /// Reject matches glued to a longer dotted-number run (version strings).
    pub dotted_guard: bool,
    /// Inside a URL, only match within its host.
    pub url_host_only: bool,
    pub normalize: fn(&str) -> String,
}

fn keep(value: &str) -> String {
    value.to_string()
}

fn lower(value: &str) -> String {
    value.to_ascii_lowercase()
}

fn upper(value: &str) -> String {
    value.to_ascii_uppercase()
}

fn rule(kind: IndicatorKind, pattern: &str) -> PatternRule {
    PatternRule {
        kind,
        regex: Regex::new(pattern).expect("indicator pattern must compile"),
        nests_in: &[],
        dotted_guard: false,
        url_host_only: false,
        normalize: keep,
    }
}

const IN_URL: &[IndicatorKind] = &[IndicatorKind::Url];

pub static RULES: LazyLock<Vec<PatternRule>> = LazyLock::new(|| {
    vec![
        PatternRule {
            normalize: keep,
            ..rule(IndicatorKind::Url, r#"(?i)\bhttps?://[^\s<>"'`\]\[{}|\\^]+"#)
        },
        PatternRule {
            normalize: lower,
            ..rule(
                IndicatorKind::Email,
                r"(?i)\b[a-z0-9._%+-]+@(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,24}\b",
            )
        },
        rule(
            IndicatorKind::RegistryKey,
            r"\b(?:HKEY_[A-Z_]+|HKLM|HKCU|HKCR|HKU)(?:\\[A-Za-z0-9_.{}\-]+)+",
        ),
        rule(
            IndicatorKind::FilePath,
            r#"(?m)(\b[A-Za-z]:\\(?:[^\\/:*?"<>|\s;,]+\\)*[^\\/:*?"<>|\s;,]+)|(?:^|[\s"'(=])(/(?:etc|tmp|var|usr|home|opt|bin|sbin|dev|proc|root|lib|Library|Users|Applications|System|private)(?:/[A-Za-z0-9._\-]+)+)"#,
        ),
        PatternRule {
            nests_in: IN_URL,
            normalize: lower,
            ..rule(IndicatorKind::HashSha256, r"\b[a-fA-F0-9]{64}\b")
        },
        PatternRule {
            nests_in: IN_URL,
            normalize: lower,
            ..rule(IndicatorKind::HashSha1, r"\b[a-fA-F0-9]{40}\b")
        },
        PatternRule {
            nests_in: IN_URL,
            normalize: lower,
            ..rule(IndicatorKind::HashMd5, r"\b[a-fA-F0-9]{32}\b")
        },
        rule(
            IndicatorKind::CryptoAddress,
            r"\b(?:0x[a-fA-F0-9]{40}|bc1[a-z0-9]{39,59}|[13][a-km-zA-HJ-NP-Z1-9]{25,34})\b",
        ),
        PatternRule {
            nests_in: IN_URL,
            normalize: upper,
            ..rule(IndicatorKind::Cve, r"(?i)\bCVE-\d{4}-\d{4,7}\b")
        },
        PatternRule {
            nests_in: IN_URL,
            ..rule(IndicatorKind::AttackId, r"\b(?:TA\d{4}|T1\d{3}(?:\.\d{3})?)\b")
        },
        rule(
            IndicatorKind::RuleName,
            r"\brule\s+([A-Za-z_][A-Za-z0-9_]{2,})\s*(?::[^{\n]*)?\{",
        ),
        PatternRule {
            nests_in: IN_URL,
            dotted_guard: true,
            ..rule(
                IndicatorKind::Ip,
                r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b",
            )
        },
        PatternRule {
            nests_in: IN_URL,
            url_host_only: true,
            normalize: lower,
            ..rule(
                IndicatorKind::Domain,
                r"(?i)\b(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,24}\b",
            )
        },
    ]
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_rules_precede_crypto_addresses() {
        let position = |kind| RULES.iter().position(|r| r.kind == kind).unwrap();
        assert!(position(IndicatorKind::HashMd5) < position(IndicatorKind::CryptoAddress));
        assert!(position(IndicatorKind::HashSha256) < position(IndicatorKind::HashMd5));
        assert!(position(IndicatorKind::Url) < position(IndicatorKind::FilePath));
        assert!(position(IndicatorKind::Ip) < position(IndicatorKind::Domain));
    }

    #[test]
    fn url_contents_stay_reachable() {
        use IndicatorKind::*;
        for kind in [HashMd5, HashSha1, HashSha256, Cve, AttackId, Ip, Domain] {
            let rule = RULES.iter().find(|r| r.kind == kind).unwrap();
            assert!(rule.nests_in.contains(&Url), "{kind} cannot nest in a url");
        }
        let host_only: Vec<_> = RULES.iter().filter(|r| r.url_host_only).map(|r| r.kind).collect();
        assert_eq!(host_only, vec![Domain]);
    }

    #[test]
    fn every_kind_has_a_rule() {
        use IndicatorKind::*;
        for kind in [
            Ip, Domain, Url, HashMd5, HashSha1, HashSha256, Email, Cve, AttackId, RegistryKey,
            FilePath, CryptoAddress, RuleName,
        ] {
            assert!(RULES.iter().any(|r| r.kind == kind), "missing rule for {kind}");
        }
    }
}
