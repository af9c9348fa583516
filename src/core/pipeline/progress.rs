//! Scraping structured values out of free-form tool output.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1B[@-_][0-?]*[ -/]*[@-~]").expect("literal pattern"));
static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)%").expect("literal pattern"));

/// Remove terminal colour and cursor escape sequences.
pub fn strip_ansi(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Percent-complete carried by one line of transfer output, if any.
///
/// Values above 100 are treated as noise rather than clamped.
pub fn parse_progress_line(line: &str) -> Option<u8> {
    let cleaned = strip_ansi(line);
    let captures = PERCENT.captures(&cleaned)?;
    let value: u32 = captures.get(1)?.as_str().parse().ok()?;
    u8::try_from(value).ok().filter(|pct| *pct <= 100)
}

/// Directory the catalog fetch reported through its `Path: <dir>` line.
pub fn parse_fetch_path(output: &str) -> Option<PathBuf> {
    output.lines().find_map(|line| {
        let cleaned = strip_ansi(line);
        let value = cleaned.trim().strip_prefix("Path:")?.trim();
        let value = if value.len() > 1 {
            value.trim_end_matches('/')
        } else {
            value
        };
        (!value.is_empty()).then(|| PathBuf::from(value))
    })
}
