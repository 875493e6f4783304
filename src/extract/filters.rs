//! False-positive suppression.
//!
//! Each rule names the indicator kinds it applies to and a predicate that
//! returns `true` when a value must be dropped. Rules are checked in order and
//! the first hit wins, so the name reported by [`rejected_by`] is stable.

use std::net::Ipv4Addr;

use url::Url;

use crate::models::IndicatorKind;

pub struct FalsePositiveRule {
    pub name: &'static str,
    pub applies_to: &'static [IndicatorKind],
    pub excludes: fn(&str) -> bool,
}

const HASHES: &[IndicatorKind] = &[
    IndicatorKind::HashMd5,
    IndicatorKind::HashSha1,
    IndicatorKind::HashSha256,
];

pub static FALSE_POSITIVE_RULES: &[FalsePositiveRule] = &[
    FalsePositiveRule {
        name: "non-routable-ip",
        applies_to: &[IndicatorKind::Ip],
        excludes: is_non_routable_ip,
    },
    FalsePositiveRule {
        name: "documentation-ip",
        applies_to: &[IndicatorKind::Ip],
        excludes: is_documentation_ip,
    },
    FalsePositiveRule {
        name: "placeholder-domain",
        applies_to: &[IndicatorKind::Domain],
        excludes: is_placeholder_domain,
    },
    FalsePositiveRule {
        name: "placeholder-email",
        applies_to: &[IndicatorKind::Email],
        excludes: is_placeholder_email,
    },
    FalsePositiveRule {
        name: "placeholder-url",
        applies_to: &[IndicatorKind::Url],
        excludes: is_placeholder_url,
    },
    FalsePositiveRule {
        name: "reference-domain",
        applies_to: &[IndicatorKind::Domain],
        excludes: is_reference_domain,
    },
    FalsePositiveRule {
        name: "reference-url",
        applies_to: &[IndicatorKind::Url],
        excludes: is_reference_url,
    },
    FalsePositiveRule {
        name: "filename-domain",
        applies_to: &[IndicatorKind::Domain],
        excludes: looks_like_filename,
    },
    FalsePositiveRule {
        name: "malformed-domain",
        applies_to: &[IndicatorKind::Domain],
        excludes: is_malformed_domain,
    },
    FalsePositiveRule {
        name: "sample-hash",
        applies_to: HASHES,
        excludes: is_sample_hash,
    },
    FalsePositiveRule {
        name: "markup-path",
        applies_to: &[IndicatorKind::FilePath],
        excludes: is_markup_path,
    },
    FalsePositiveRule {
        name: "implausible-cve",
        applies_to: &[IndicatorKind::Cve],
        excludes: is_implausible_cve,
    },
];

/// Name of the first rule that drops `value`, if any.
pub fn rejected_by(kind: IndicatorKind, value: &str) -> Option<&'static str> {
    FALSE_POSITIVE_RULES
        .iter()
        .filter(|rule| rule.applies_to.contains(&kind))
        .find(|rule| (rule.excludes)(value))
        .map(|rule| rule.name)
}

const PLACEHOLDER_DOMAINS: &[&str] = &[
    "example.com",
    "example.org",
    "example.net",
    "test.com",
    "domain.com",
    "website.com",
    "site.com",
    "foo.com",
    "bar.com",
    "yourdomain.com",
    "localhost",
];

const RESERVED_TLDS: &[&str] = &["example", "test", "invalid", "localhost", "local"];

const REFERENCE_DOMAINS: &[&str] = &[
    "google.com",
    "microsoft.com",
    "apple.com",
    "facebook.com",
    "twitter.com",
    "github.com",
    "amazon.com",
    "linkedin.com",
    "instagram.com",
    "krebsonsecurity.com",
    "bleepingcomputer.com",
    "thehackernews.com",
    "infosecurity-magazine.com",
    "darkreading.com",
    "securityweek.com",
    "threatpost.com",
    "volexity.com",
    "mandiant.com",
    "crowdstrike.com",
    "fireeye.com",
    "trendmicro.com",
    "symantec.com",
    "kaspersky.com",
    "sophos.com",
    "paloaltonetworks.com",
    "youtube.com",
    "wikipedia.org",
    "reddit.com",
    "medium.com",
    "substack.com",
    "wordpress.com",
    "cloudflare.com",
    "amazonaws.com",
    "azure.com",
    "googleusercontent.com",
    "github.io",
    "netlify.app",
    "dropbox.com",
    "onedrive.com",
    "cloudfront.net",
    "akamaihd.net",
    "fastly.net",
    "cisa.gov",
    "fbi.gov",
    "ic3.gov",
    "us-cert.gov",
    "virustotal.com",
    "abuse.ch",
    "alienvault.com",
    "arstechnica.com",
    "wired.com",
    "techcrunch.com",
    "zdnet.com",
    "cnet.com",
    "theverge.com",
    "howtogeek.com",
    "askwoody.com",
    "bbc.co.uk",
    "bbc.com",
    "washingtonpost.com",
    "nytimes.com",
    "wsj.com",
    "reuters.com",
    "checkpoint.com",
    "talosintelligence.com",
    "malwarebytes.com",
    "sans.edu",
    "sans.org",
    "mitre.org",
    "nist.gov",
    "justice.gov",
    "state.gov",
    "defense.gov",
    "gov.uk",
    "haveibeenpwned.com",
    "w3.org",
    "ietf.org",
    "ieee.org",
    "acm.org",
];

const FILE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "svg", "webp", "pdf", "doc", "docx", "xls", "xlsx", "ppt",
    "pptx", "zip", "rar", "7z", "tar", "gz", "bz2", "exe", "dll", "so", "dylib", "sys", "txt",
    "log", "csv", "xml", "json", "yaml", "yml", "mp4", "avi", "mov", "wmv", "mp3", "wav", "html",
    "htm", "css", "js", "php", "asp", "aspx", "md", "py", "sh", "ps1", "bat", "lnk", "iso", "msi",
];

const EMPTY_INPUT_DIGESTS: &[&str] = &[
    "d41d8cd98f00b204e9800998ecf8427e",
    "da39a3ee5e6b4b0d3255bfef95601890afd80709",
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
];

const EICAR_DIGESTS: &[&str] = &[
    "44d88612fea8a8f36de82e1278abb02f",
    "3395856ce81f2b7382dee72602f798b642f14140",
    "275a021bbfb6489e54d471899f7db9d1663fc695ec2fe2a2c4538aabf651fd0f",
];

fn matches_domain_list(host: &str, list: &[&str]) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    list.iter().any(|d| {
        host == *d
            || host
                .strip_suffix(d)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

fn url_host(value: &str) -> Option<String> {
    Url::parse(value)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

fn is_non_routable_ip(value: &str) -> bool {
    let Ok(ip) = value.parse::<Ipv4Addr>() else {
        return true;
    };
    let [a, b, ..] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        || a == 0
        || a >= 240
        || (a == 100 && (64..128).contains(&b))
        || (a == 198 && (b == 18 || b == 19))
}

fn is_documentation_ip(value: &str) -> bool {
    value
        .parse::<Ipv4Addr>()
        .is_ok_and(|ip| ip.is_documentation())
}

fn is_placeholder_domain(value: &str) -> bool {
    let host = value.trim_end_matches('.').to_ascii_lowercase();
    let tld = host.rsplit('.').next().unwrap_or_default();
    RESERVED_TLDS.contains(&tld) || matches_domain_list(&host, PLACEHOLDER_DOMAINS)
}

fn is_placeholder_email(value: &str) -> bool {
    value
        .rsplit_once('@')
        .is_some_and(|(_, host)| is_placeholder_domain(host))
}

fn is_placeholder_url(value: &str) -> bool {
    match url_host(value) {
        Some(host) => {
            is_placeholder_domain(&host)
                || (host.parse::<Ipv4Addr>().is_ok()
                    && (is_non_routable_ip(&host) || is_documentation_ip(&host)))
        }
        None => true,
    }
}

fn is_reference_domain(value: &str) -> bool {
    matches_domain_list(value, REFERENCE_DOMAINS)
}

fn is_reference_url(value: &str) -> bool {
    url_host(value).is_some_and(|host| matches_domain_list(&host, REFERENCE_DOMAINS))
}

fn looks_like_filename(value: &str) -> bool {
    value
        .rsplit_once('.')
        .is_some_and(|(_, ext)| FILE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn is_malformed_domain(value: &str) -> bool {
    if value.len() < 5 || value.contains("-rated") || value.contains("rated-") {
        return true;
    }
    let mut labels = value.split('.');
    let numeric = |label: Option<&str>| {
        label.is_some_and(|l| !l.is_empty() && l.chars().all(|c| c.is_ascii_digit() || c == '-'))
    };
    numeric(labels.next()) && numeric(labels.next())
}

fn is_sample_hash(value: &str) -> bool {
    let value = value.to_ascii_lowercase();
    if EMPTY_INPUT_DIGESTS.contains(&value.as_str()) || EICAR_DIGESTS.contains(&value.as_str()) {
        return true;
    }
    if value.contains("deadbeef") || value.contains("0123456789abcdef") {
        return true;
    }
    let mut counts = [0usize; 16];
    for c in value.chars() {
        if let Some(d) = c.to_digit(16) {
            counts[d as usize] += 1;
        }
    }
    counts.iter().any(|&n| n * 2 > value.len())
}

fn is_markup_path(value: &str) -> bool {
    value.chars().count() < 10
        || value.contains('<')
        || value.contains('>')
        || value.contains("href=")
        || value.contains("src=")
}

/// A well-formed id numbered before the program started in 1999.
fn is_implausible_cve(value: &str) -> bool {
    let Some((prefix, rest)) = value.split_at_checked(4) else {
        return false;
    };
    let Some((year, sequence)) = rest.split_once('-') else {
        return false;
    };
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !prefix.eq_ignore_ascii_case("CVE-")
        || year.len() != 4
        || !digits(year)
        || sequence.len() < 4
        || !digits(sequence)
    {
        return false;
    }
    year.parse::<u32>().is_ok_and(|year| year < 1999)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_false_positive(kind: IndicatorKind, value: &str) -> bool {
        rejected_by(kind, value).is_some()
    }

    #[test]
    fn private_and_reserved_ips_are_dropped() {
        for ip in [
            "192.168.1.1",
            "10.0.0.1",
            "172.16.4.2",
            "127.0.0.1",
            "0.0.0.0",
            "255.255.255.255",
            "169.254.10.1",
            "224.0.0.251",
            "100.64.0.1",
        ] {
            assert!(is_false_positive(IndicatorKind::Ip, ip), "{ip} should be filtered");
        }
    }

    #[test]
    fn public_ips_survive() {
        assert!(!is_false_positive(IndicatorKind::Ip, "8.8.8.8"));
        assert!(!is_false_positive(IndicatorKind::Ip, "45.77.12.9"));
    }

    #[test]
    fn documentation_ranges_have_their_own_rule() {
        assert_eq!(
            rejected_by(IndicatorKind::Ip, "203.0.113.7"),
            Some("documentation-ip")
        );
        assert_eq!(
            rejected_by(IndicatorKind::Ip, "192.168.0.5"),
            Some("non-routable-ip")
        );
    }

    #[test]
    fn placeholder_and_reference_domains() {
        assert!(is_false_positive(IndicatorKind::Domain, "example.com"));
        assert!(is_false_positive(IndicatorKind::Domain, "mail.example.org"));
        assert!(is_false_positive(IndicatorKind::Domain, "c2.lab.test"));
        assert!(is_false_positive(IndicatorKind::Domain, "www.bleepingcomputer.com"));
        assert!(is_false_positive(IndicatorKind::Email, "admin@example.com"));
        assert!(is_false_positive(
            IndicatorKind::Url,
            "https://nvd.nist.gov/vuln/detail/CVE-2024-1"
        ));
        assert!(!is_false_positive(IndicatorKind::Domain, "evil-updates.net"));
        assert!(!is_false_positive(IndicatorKind::Domain, "notgoogle.com"));
    }

    #[test]
    fn filenames_and_scores_are_not_domains() {
        assert_eq!(
            rejected_by(IndicatorKind::Domain, "invoice.pdf"),
            Some("filename-domain")
        );
        assert!(is_false_positive(IndicatorKind::Domain, "9.8-rated.com"));
        assert!(is_false_positive(IndicatorKind::Domain, "a.io"));
    }

    #[test]
    fn sample_hashes() {
        assert!(is_false_positive(
            IndicatorKind::HashMd5,
            "d41d8cd98f00b204e9800998ecf8427e"
        ));
        assert!(is_false_positive(
            IndicatorKind::HashMd5,
            "44d88612fea8a8f36de82e1278abb02f"
        ));
        assert!(is_false_positive(IndicatorKind::HashSha1, &"0".repeat(40)));
        assert!(is_false_positive(
            IndicatorKind::HashSha256,
            &"deadbeef".repeat(8)
        ));
        assert!(!is_false_positive(
            IndicatorKind::HashMd5,
            "5f4dcc3b5aa765d61d8327deb882cf99"
        ));
    }

    #[test]
    fn rules_only_apply_to_their_kinds() {
        assert!(!is_false_positive(IndicatorKind::Cve, "192.168.1.1"));
        assert!(is_false_positive(IndicatorKind::Cve, "CVE-1988-0001"));
        assert!(!is_false_positive(IndicatorKind::Cve, "CVE-2024-12345"));
    }

    #[test]
    fn cve_year_check_needs_a_cve_shape() {
        assert_eq!(
            rejected_by(IndicatorKind::Cve, "CVE-1998-0001"),
            Some("implausible-cve")
        );
        assert!(is_false_positive(IndicatorKind::Cve, "cve-1990-12345"));
        assert!(!is_false_positive(IndicatorKind::Cve, "CVE-1999-0001"));
        for odd in ["CVE-99-0001", "CVE-19x8-0001", "CVE-1988-01", "CVE-1988", "1988-0001", ""] {
            assert!(!is_false_positive(IndicatorKind::Cve, odd), "{odd}");
        }
    }
}
