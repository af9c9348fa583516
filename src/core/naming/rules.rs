use std::sync::LazyLock;

use regex::Regex;

/// Product families whose catalog names never hyphenate into the
/// `vendor-product` shape the lab host expects. Order matters: the first
/// pattern that matches wins.
const FAMILY_RULES: &[(&str, &str)] = &[
    (r"ne9000|ne9k", "huaweine9k-ne9000"),
    (r"ne40e", "huaweine40e-ne40e"),
    (r"ce12800|ce12k", "huaweice12800-ce12800"),
    (r"usg6000v|usg6kv", "huaweiusg6kv-usg6000v"),
    (r"ar1000v|ar1k", "huaweiar1k-ar1000v"),
    (r"csr1000v", "csr1000vng-csr1000v"),
];

pub(crate) struct FamilyRule {
    pattern: Regex,
    suggestion: &'static str,
}

impl FamilyRule {
    pub(crate) fn matches(&self, name: &str) -> bool {
        !name.is_empty() && self.pattern.is_match(name)
    }

    pub(crate) fn suggestion(&self) -> &'static str {
        self.suggestion
    }
}

pub(crate) static RULES: LazyLock<Vec<FamilyRule>> = LazyLock::new(|| {
    FAMILY_RULES
        .iter()
        .filter_map(|(pattern, suggestion)| {
            Regex::new(&format!("(?i){pattern}"))
                .ok()
                .map(|pattern| FamilyRule {
                    pattern,
                    suggestion,
                })
        })
        .collect()
});
