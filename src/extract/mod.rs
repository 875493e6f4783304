//! Indicator extraction.
//!
//! [`extract`] is a pure function of its input: the same text always yields the
//! same set. Matching runs in two stages, the ordered pattern table in
//! [`rules`] and then the false-positive table in [`filters`].

mod filters;
mod rules;

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

use crate::models::{Indicator, IndicatorKind};

use filters::rejected_by;

const CONTEXT_CHARS: usize = 50;

static HXXP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bhxxp(s?)://").expect("valid regex"));

/// Undo common defanging so `evil[.]com` and `hxxp://` are matched.
fn refang(text: &str) -> String {
    let text = HXXP.replace_all(text, "http${1}://");
    text.replace("[.]", ".")
        .replace("(.)", ".")
        .replace("{.}", ".")
        .replace("[dot]", ".")
        .replace("[@]", "@")
        .replace("[at]", "@")
        .replace("[:]", ":")
}

fn context_window(text: &str, span: &Range<usize>) -> String {
    let start = text[..span.start]
        .char_indices()
        .rev()
        .nth(CONTEXT_CHARS - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let end = text[span.end..]
        .char_indices()
        .nth(CONTEXT_CHARS)
        .map(|(i, _)| span.end + i)
        .unwrap_or(text.len());
    let raw = format!(
        "{}[{}]{}",
        &text[start..span.start],
        &text[span.clone()],
        &text[span.end..end]
    );
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn glued_to_dotted_run(text: &str, span: &Range<usize>) -> bool {
    let before = text[..span.start].ends_with('.');
    let mut after = text[span.end..].chars();
    let after = after.next() == Some('.') && after.next().is_some_and(|c| c.is_ascii_digit());
    before || after
}

fn trim_url(text: &str, span: Range<usize>) -> Range<usize> {
    let trimmed = text[span.clone()].trim_end_matches(['.', ',', ';', ':', '!', '?', ')', '\'']);
    span.start..span.start + trimmed.len()
}

/// Byte range of the host inside a claimed URL span.
fn url_host_span(text: &str, url: &Range<usize>) -> Range<usize> {
    let raw = &text[url.clone()];
    let start = raw.find("://").map_or(0, |i| i + 3);
    let authority_end = raw[start..]
        .find(['/', '?', '#'])
        .map_or(raw.len(), |i| start + i);
    let host_start = raw[start..authority_end]
        .rfind('@')
        .map_or(start, |i| start + i + 1);
    let host_end = raw[host_start..authority_end]
        .find(':')
        .map_or(authority_end, |i| host_start + i);
    url.start + host_start..url.start + host_end
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

/// Whether `span` may be matched by `rule` although it overlaps `taken`.
fn may_nest(
    rule: &rules::PatternRule,
    text: &str,
    taken: &Range<usize>,
    kind: IndicatorKind,
    span: &Range<usize>,
) -> bool {
    if !rule.nests_in.contains(&kind) {
        return false;
    }
    if rule.url_host_only && kind == IndicatorKind::Url {
        let host = url_host_span(text, taken);
        return host.start <= span.start && span.end <= host.end;
    }
    true
}

/// Lossily decoded binary content keeps its NUL bytes.
fn looks_binary(text: &str) -> bool {
    text.contains('\0')
}

/// Extract every indicator in `text` that survives false-positive filtering.
/// Each indicator keeps the context of its first occurrence.
///
/// A match dropped as a false positive still claims its span, so the pieces
/// of a placeholder email or a sample hash are not reported on their own.
/// Empty or binary input yields an empty set.
pub fn extract(text: &str) -> BTreeSet<Indicator> {
    if text.trim().is_empty() || looks_binary(text) {
        return BTreeSet::new();
    }
    let text = refang(text);
    let mut claimed: Vec<(Range<usize>, IndicatorKind)> = Vec::new();
    let mut found: BTreeMap<(IndicatorKind, String), String> = BTreeMap::new();

    for rule in rules::RULES.iter() {
        let mut claims = Vec::new();
        for caps in rule.regex.captures_iter(&text) {
            let Some(m) = caps.iter().skip(1).flatten().next().or_else(|| caps.get(0)) else {
                continue;
            };
            let mut span = m.range();
            if rule.kind == IndicatorKind::Url {
                span = trim_url(&text, span);
            }
            if span.is_empty() {
                continue;
            }
            let blocked = claimed.iter().any(|(taken, kind)| {
                overlaps(taken, &span) && !may_nest(rule, &text, taken, *kind, &span)
            });
            if blocked || (rule.dotted_guard && glued_to_dotted_run(&text, &span)) {
                continue;
            }
            claims.push((span.clone(), rule.kind));

            let value = (rule.normalize)(&text[span.clone()]);
            if let Some(filter) = rejected_by(rule.kind, &value) {
                trace!(kind = %rule.kind, value = %value, filter, "dropped false positive");
                continue;
            }
            found
                .entry((rule.kind, value))
                .or_insert_with(|| context_window(&text, &span));
        }
        claimed.extend(claims);
    }

    found
        .into_iter()
        .map(|((kind, value), context)| Indicator {
            kind,
            value,
            context,
        })
        .collect()
}
