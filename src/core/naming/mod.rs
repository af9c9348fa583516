//! Directory naming for images delivered under the managed base directory.
//!
//! The lab host only picks up image folders named `vendor-product`. Catalog
//! entries rarely arrive in that shape, so this module rewrites names into a
//! safe character set and proposes hyphenated alternatives when the fetched
//! folder name does not fit the convention.

mod rules;

use std::sync::LazyLock;

use regex::Regex;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("literal pattern"));
static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._+-]").expect("literal pattern"));
static REPEATED_HYPHENS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-{2,}").expect("literal pattern"));
static VALID_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._+-]+$").expect("literal pattern"));

fn has_traversal(name: &str) -> bool {
    name.contains('/') || name.contains('\\') || name.contains("..")
}

fn is_dot_only(name: &str) -> bool {
    name.chars().all(|c| c == '.')
}

/// Rewrite `raw` into a lower-case, hyphen-separated directory name.
///
/// Returns an empty string when the input is empty, carries a path
/// separator or `..`, or collapses into nothing usable.
pub fn sanitize(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || has_traversal(trimmed) {
        return String::new();
    }

    let lowered = trimmed.to_lowercase();
    let hyphenated = WHITESPACE.replace_all(&lowered, "-");
    let replaced = INVALID_CHARS.replace_all(&hyphenated, "-");
    let collapsed = REPEATED_HYPHENS.replace_all(&replaced, "-");
    let name = collapsed.trim_matches('-');

    if name.is_empty() || is_dot_only(name) || has_traversal(name) || !VALID_NAME.is_match(name) {
        return String::new();
    }
    name.to_string()
}

/// Accept `raw` unchanged if it is already a valid directory name.
pub fn validate(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || is_dot_only(trimmed)
        || has_traversal(trimmed)
        || !VALID_NAME.is_match(trimmed)
    {
        return String::new();
    }
    trimmed.to_string()
}

/// Validate first, fall back to sanitizing. `None` if neither yields a name.
pub fn normalize_choice(raw: &str) -> Option<String> {
    let valid = validate(raw);
    if !valid.is_empty() {
        return Some(valid);
    }
    let sanitized = sanitize(raw);
    (!sanitized.is_empty()).then_some(sanitized)
}

/// Fixed suggestion for known product families, if any rule matches either
/// the sanitized catalog name or the existing directory name.
pub fn apply_family_rules(base_name: &str, normalized_name: &str) -> Option<String> {
    let proposed = sanitize(normalized_name);
    let existing = sanitize(base_name);

    rules::RULES
        .iter()
        .find(|rule| rule.matches(&proposed) || rule.matches(&existing))
        .map(|rule| rule.suggestion().to_string())
}

/// Candidate directory names in priority order, plus the preferred one.
///
/// Every returned candidate is a valid name containing a hyphen. When none
/// can be formed, both the preferred choice and the list are empty.
pub fn build_choices(base_name: &str, normalized_name: &str) -> (String, Vec<String>) {
    let base = base_name.trim();
    let normalized = normalized_name.trim();

    let mut raw: Vec<String> = Vec::new();
    if let Some(suggestion) = apply_family_rules(base, normalized) {
        raw.push(suggestion);
    }
    if !base.is_empty() && !base.contains('-') {
        raw.push(format!("{base}-{base}"));
    }
    if normalized.contains('-') {
        raw.push(normalized.to_string());
    }
    if base.contains('-') {
        raw.push(base.to_string());
    }

    let mut choices: Vec<String> = Vec::new();
    for candidate in raw {
        let Some(name) = normalize_choice(&candidate) else {
            continue;
        };
        if name.contains('-') && !choices.contains(&name) {
            choices.push(name);
        }
    }

    let preferred = choices.first().cloned().unwrap_or_default();
    (preferred, choices)
}
