//! Title classification into group keys.
//!
//! Classification is a pure function of the raw title: the same title always
//! maps to the same [`GroupKey`], and no title ever fails to classify; the
//! fallback key is `Uncategorized/MISC`.
//!
//! Categories come from an ordered rule table. Rules are tried in table
//! order and the first rule with any matching keyword wins, so keywords that
//! appear under more than one category resolve by position in the table,
//! never by map iteration order. The table ships with the config file; the
//! built-in default below applies when none is configured.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::group::GroupKey;

use super::manifest::ManifestEntry;

/// Fallback category when no rule matches
pub const DEFAULT_CATEGORY: &str = "Uncategorized";

/// Fallback subgroup when the title carries no module code
pub const DEFAULT_SUBGROUP: &str = "MISC";

/// One row of the classification table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    pub category: String,
    pub keywords: Vec<String>,
}

/// A manifest entry with its derived key and filesystem-safe name.
/// `sanitized_name` is unique within a group once admitted (collisions are
/// suffixed at admission, see `Group::admit`).
#[derive(Debug, Clone)]
pub struct ClassifiedItem {
    pub entry: ManifestEntry,
    pub group_key: GroupKey,
    pub sanitized_name: String,
}

/// Ordered keyword classifier
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<CategoryRule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::with_default_rules()
    }
}

impl Classifier {
    /// Build a classifier from an explicit, ordered rule table
    pub fn new(rules: Vec<CategoryRule>) -> Self {
        Self { rules }
    }

    /// Built-in rule table. "logic" appears under both Circuits and
    /// Programming; Circuits wins because it comes first.
    pub fn with_default_rules() -> Self {
        let rule = |category: &str, keywords: &[&str]| CategoryRule {
            category: category.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        };

        Self::new(vec![
            rule("Signals", &["signal", "dsp", "fourier", "sampling", "filter"]),
            rule("Circuits", &["circuit", "logic", "analog", "semiconductor"]),
            rule("Programming", &["logic", "python", "algorithm", "code"]),
            rule("Mathematics", &["calculus", "algebra", "probability", "matrix"]),
        ])
    }

    /// Derive the group key for a raw title. Pure and total.
    pub fn classify(&self, raw_title: &str) -> GroupKey {
        let lowered = raw_title.to_lowercase();

        let category = self
            .rules
            .iter()
            .find(|rule| {
                rule.keywords
                    .iter()
                    .any(|kw| !kw.is_empty() && lowered.contains(&kw.to_lowercase()))
            })
            .map(|rule| rule.category.clone())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

        GroupKey::new(category, extract_subgroup(raw_title))
    }

    /// Classify a parsed entry into a [`ClassifiedItem`]
    pub fn classify_entry(&self, entry: ManifestEntry) -> ClassifiedItem {
        let group_key = self.classify(&entry.raw_title);
        let sanitized_name = sanitize_title(&entry.raw_title);

        ClassifiedItem {
            entry,
            group_key,
            sanitized_name,
        }
    }
}

fn subgroup_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Module code anchored at the start of the trimmed title: one letter
    // followed by digits ("M01", "W3"). Codes buried mid-title do not count.
    PATTERN.get_or_init(|| Regex::new(r"^([A-Za-z]\d+)\b").expect("valid subgroup pattern"))
}

/// Extract the leading module code, uppercased, or the default subgroup
pub fn extract_subgroup(raw_title: &str) -> String {
    subgroup_pattern()
        .captures(raw_title.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_uppercase())
        .unwrap_or_else(|| DEFAULT_SUBGROUP.to_string())
}

/// Replace path-unsafe characters with `-` and trim. Never returns an empty
/// string.
pub fn sanitize_title(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();

    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}
