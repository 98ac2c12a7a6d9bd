//! Acceptance criteria and rich-text helpers
//!
//! Backend text fields arrive as HTML fragments. Criteria are numbered from 1
//! in the order they appear in the source list.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static LIST_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<li\b[^>]*>(.*?)</li\s*>").expect("valid regex"));

static LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(?:div|p|h[1-6]|tr)\s*>").expect("valid regex")
});

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

static ENUMERATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:ac\s*-?\s*\d+\s*[:.)\-]?|\d+\s*[.):\-]|[-*\u{2022}])\s*")
        .expect("valid regex")
});

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

/// Parses acceptance criteria from an HTML fragment
///
/// List items win when present. Otherwise every non-empty line is a
/// criterion, with leading enumeration such as `1.` or `AC2:` removed.
pub fn parse_acceptance_criteria(html: &str) -> BTreeMap<u32, String> {
    let mut texts: Vec<String> = LIST_ITEM
        .captures_iter(html)
        .map(|cap| normalize_whitespace(&strip_tags(&cap[1])))
        .filter(|t| !t.is_empty())
        .collect();

    if texts.is_empty() {
        let broken = LINE_BREAK.replace_all(html, "\n");
        texts = strip_tags(&broken)
            .lines()
            .map(|line| {
                let line = normalize_whitespace(line);
                ENUMERATION.replace(&line, "").trim().to_string()
            })
            .filter(|t| !t.is_empty())
            .collect();
    }

    texts
        .into_iter()
        .enumerate()
        .map(|(idx, text)| (idx as u32 + 1, text))
        .collect()
}

/// Converts an HTML fragment to single-line plain text
pub fn html_to_text(html: &str) -> String {
    let broken = LINE_BREAK.replace_all(html, " ");
    normalize_whitespace(&strip_tags(&broken))
}

/// Parses a criterion reference such as `2`, `"2"`, `"AC2"` or `"AC-2"`
///
/// Only positive numbers are valid references.
pub fn parse_criterion_reference(value: &Value) -> Option<u32> {
    let number = match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => DIGITS.find(s).and_then(|m| m.as_str().parse::<u32>().ok()),
        _ => None,
    };
    number.filter(|n| *n > 0)
}

fn strip_tags(html: &str) -> String {
    decode_entities(&TAG.replace_all(html, ""))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        // Last, so "&amp;lt;" decodes to "&lt;" rather than "<"
        .replace("&amp;", "&")
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
