// src/ingest/normalize.rs
//! Canonical forms used for display cleanup and for duplicate matching.

use once_cell::sync::OnceCell;
use regex::Regex;

/// Legal-form suffixes dropped from the end of a company name.
const BUSINESS_SUFFIXES: &[&str] = &[
    "llc",
    "l l c",
    "inc",
    "incorporated",
    "corp",
    "corporation",
    "co",
    "company",
    "ltd",
    "limited",
    "lp",
    "llp",
    "pllc",
    "pc",
];

/// Street-type and direction abbreviations (USPS style).
const ADDRESS_ABBREVIATIONS: &[(&str, &str)] = &[
    ("street", "st"),
    ("avenue", "ave"),
    ("road", "rd"),
    ("drive", "dr"),
    ("boulevard", "blvd"),
    ("lane", "ln"),
    ("court", "ct"),
    ("place", "pl"),
    ("parkway", "pkwy"),
    ("highway", "hwy"),
    ("terrace", "ter"),
    ("suite", "ste"),
    ("apartment", "apt"),
    ("north", "n"),
    ("south", "s"),
    ("east", "e"),
    ("west", "w"),
];

fn re_tags() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("static tag regex"))
}

fn re_ws() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static whitespace regex"))
}

/// Clean a provider-supplied display string: decode entities, strip tags,
/// straighten quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    out = re_tags().replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    out = re_ws().replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 5) Length cap: 300 chars
    if out.chars().count() > 300 {
        out = out.chars().take(300).collect();
    }

    out
}

/// Cleans an optional display field; blank input becomes `None`.
pub fn clean_optional(s: Option<&str>) -> Option<String> {
    s.map(normalize_text).filter(|v| !v.is_empty())
}

/// Canonical phone form (E.164-like, US-centric).
///
/// - 10 digits → `+1XXXXXXXXXX`
/// - 11 digits starting with `1` → `+1XXXXXXXXXX`
/// - any other 7..=15 digits → `+<digits>`
/// - anything shorter/longer → `None`
pub fn normalize_phone(phone: &str) -> Option<String> {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        10 => Some(format!("+1{digits}")),
        11 if digits.starts_with('1') => Some(format!("+{digits}")),
        7..=15 => Some(format!("+{digits}")),
        _ => None,
    }
}

/// Match key for company names: lowercase, no apostrophes or punctuation,
/// no legal-form suffixes, no leading "the".
pub fn normalize_company_name(name: &str) -> String {
    let decoded = html_escape::decode_html_entities(name).to_lowercase();
    let cleaned: String = decoded
        .chars()
        .filter(|c| !matches!(c, '\'' | '\u{2019}' | '`'))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut words: Vec<&str> = cleaned.split_whitespace().collect();
    if words.len() > 1 && words[0] == "the" {
        words.remove(0);
    }
    loop {
        let before = words.len();
        for suffix in BUSINESS_SUFFIXES {
            let parts: Vec<&str> = suffix.split(' ').collect();
            if words.len() > parts.len() && words.ends_with(&parts) {
                words.truncate(words.len() - parts.len());
                break;
            }
        }
        if words.len() == before {
            break;
        }
    }
    words.join(" ")
}

/// Match key for street addresses.
pub fn normalize_address(address: &str) -> Option<String> {
    let lowered = address.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let words: Vec<&str> = cleaned
        .split_whitespace()
        .map(|w| {
            ADDRESS_ABBREVIATIONS
                .iter()
                .find(|(long, _)| *long == w)
                .map(|(_, short)| *short)
                .unwrap_or(w)
        })
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

/// Bare host of a website: no scheme, no `www.`, no port/path/query.
pub fn extract_domain(url: &str) -> Option<String> {
    let mut s = url.trim().to_ascii_lowercase();
    for scheme in ["https://", "http://"] {
        if let Some(rest) = s.strip_prefix(scheme) {
            s = rest.to_string();
            break;
        }
    }
    if let Some(rest) = s.strip_prefix("www.") {
        s = rest.to_string();
    }
    let host = s
        .split(['/', '?', '#', ':'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('.')
        .to_string();
    if host.is_empty() || !host.contains('.') {
        None
    } else {
        Some(host)
    }
}
