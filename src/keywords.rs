//! Keyword normalization.
//!
//! Scraped terms arrive with casing variants, stray whitespace, duplicates
//! and blanks. Normalization turns them into the run's canonical keyword
//! set:
//!
//! ```text
//! ["Cat ", "cat", "", "DOG"]  →  ["cat", "dog"]
//! ```
//!
//! - terms are lower-cased, trimmed and inner whitespace collapsed
//! - empty entries are dropped
//! - duplicates collapse onto the first occurrence (order is kept for log
//!   readability only)
//! - an empty result is an error: there is nothing to generate
//!
//! Every keyword also maps to a file slug (`remote work` → `remote-work`).
//! Artifact paths are derived from the slug, so two keywords that would
//! share a slug are collapsed as well, first one wins.
//!
//! Nothing here touches the filesystem.

use crate::config::KeywordsConfig;
use crate::types::{DEFAULT_POPULARITY, Keyword, KeywordEntry, TrendContext, TrendItem};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("no usable keywords: {0} raw terms, all empty, duplicate or blocked")]
    InvalidInput(usize),
}

const MAX_SLUG_LEN: usize = 80;

/// Turn a keyword into a filesystem-safe file stem.
///
/// - Lower-cases, keeps alphanumerics, replaces everything else with dashes
/// - Collapses consecutive dashes and strips them at both ends
/// - Truncates to `MAX_SLUG_LEN` characters, breaking at the last dash
pub fn slugify(keyword: &str) -> String {
    let mut slug = String::with_capacity(keyword.len());
    let mut prev_dash = false;
    for c in keyword.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
            prev_dash = false;
        } else if !prev_dash {
            slug.push('-');
            prev_dash = true;
        }
    }
    let trimmed = slug.trim_matches('-');

    if trimmed.chars().count() <= MAX_SLUG_LEN {
        return trimmed.to_string();
    }
    let truncated: String = trimmed.chars().take(MAX_SLUG_LEN).collect();
    match truncated.rfind('-') {
        Some(pos) if pos > 0 => truncated[..pos].to_string(),
        _ => truncated,
    }
}

/// Guess a stock category from the keyword text.
///
/// Checked in order; the first matching group wins, `general` otherwise.
pub fn categorize(keyword: &str) -> &'static str {
    const GROUPS: &[(&str, &[&str])] = &[
        (
            "technology",
            &[
                "ai", "artificial", "machine learning", "blockchain", "saas", "cloud", "vr",
                "3d", "data", "robot", "digital",
            ],
        ),
        (
            "business",
            &[
                "business", "corporate", "office", "startup", "strategy", "marketing",
                "revenue", "meeting", "remote work",
            ],
        ),
        (
            "medical",
            &[
                "medical", "health", "doctor", "nurse", "patient", "therapy", "vaccine",
                "fitness", "wellness",
            ],
        ),
        (
            "education",
            &["education", "school", "student", "teacher", "university", "learning"],
        ),
        (
            "food",
            &[
                "food", "cuisine", "cooking", "meal", "recipe", "kitchen", "coffee", "tea",
                "restaurant", "diet", "vegan", "plant based",
            ],
        ),
        (
            "nature",
            &[
                "nature", "forest", "mountain", "ocean", "sea", "beach", "sky", "wildlife",
                "green", "sustainable", "climate", "sunrise", "sunset", "storm",
            ],
        ),
        (
            "lifestyle",
            &[
                "lifestyle", "family", "people", "beauty", "fashion", "home", "interior",
                "yoga", "meditation",
            ],
        ),
    ];

    let words: Vec<&str> = keyword.split_whitespace().collect();
    let matches = |needle: &str| {
        if needle.contains(' ') {
            keyword.contains(needle)
        } else {
            // Short needles like "ai" must match a whole word, not "mountain".
            words.iter().any(|w| *w == needle || (needle.len() > 3 && w.contains(needle)))
        }
    };

    GROUPS
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| matches(n)))
        .map(|(category, _)| *category)
        .unwrap_or("general")
}

/// Ordered, duplicate-free keyword set with per-keyword trend context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordSet {
    entries: Vec<KeywordEntry>,
}

impl KeywordSet {
    pub fn from_entries(entries: Vec<KeywordEntry>) -> Self {
        let mut set = Self::default();
        for entry in entries {
            set.push(entry);
        }
        set
    }

    /// Append unless the keyword or its slug is already present.
    /// Returns whether the entry was added.
    fn push(&mut self, entry: KeywordEntry) -> bool {
        if self.clashes(&entry) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[KeywordEntry] {
        &self.entries
    }

    pub fn keywords(&self) -> impl Iterator<Item = &Keyword> {
        self.entries.iter().map(|e| &e.keyword)
    }

    pub fn contains(&self, keyword: &Keyword) -> bool {
        self.entries.iter().any(|e| &e.keyword == keyword)
    }

    pub fn context(&self, keyword: &Keyword) -> Option<&TrendContext> {
        self.entries
            .iter()
            .find(|e| &e.keyword == keyword)
            .map(|e| &e.context)
    }

    /// Find the keyword owning a file slug.
    pub fn by_slug(&self, slug: &str) -> Option<&Keyword> {
        self.keywords().find(|k| k.slug() == slug)
    }

    /// Whether `entry` would be rejected as a duplicate keyword or slug.
    fn clashes(&self, entry: &KeywordEntry) -> bool {
        let slug = entry.keyword.slug();
        slug.is_empty()
            || self
                .entries
                .iter()
                .any(|e| e.keyword == entry.keyword || e.keyword.slug() == slug)
    }

    /// Merge a freshly normalized set into the one already on disk.
    ///
    /// Existing keywords are always kept, in their original order. When the
    /// set has room for fewer than all new keywords, the ones with the
    /// highest [`ranked_popularity`] for `month` win; ties go to the one
    /// seen first. Winners are appended in first-seen order. Returns how
    /// many keywords were added.
    pub fn merge(&mut self, incoming: KeywordSet, limit: usize, month: u32) -> usize {
        let room = limit.saturating_sub(self.entries.len());
        let mut candidates: Vec<(usize, KeywordEntry)> = incoming
            .entries
            .into_iter()
            .filter(|e| !self.clashes(e))
            .enumerate()
            .collect();

        // Stable sort: equal scores keep first-seen order.
        candidates.sort_by_key(|(_, e)| std::cmp::Reverse(ranked_popularity(&e.context, month)));
        candidates.truncate(room);
        candidates.sort_by_key(|(seen, _)| *seen);

        let mut added = 0;
        for (_, entry) in candidates {
            if self.push(entry) {
                added += 1;
            }
        }
        added
    }
}

/// Seasonal demand multiplier for a category in a month (1 = January),
/// in percent.
pub fn seasonal_boost(category: &str, month: u32) -> u32 {
    match (category, month) {
        ("business", 1) => 120,
        ("business", 9) => 110,
        ("technology", 1) => 130,
        ("technology", 10) => 110,
        ("lifestyle", 1) => 140,
        ("lifestyle", 6) => 120,
        ("food", 11) => 130,
        ("food", 12) => 120,
        ("nature", 4) => 130,
        ("nature", 10) => 120,
        _ => 100,
    }
}

/// Popularity scaled by the seasonal boost of the keyword's category,
/// rounded to the nearest integer. Decides which keywords fill the daily
/// limit.
pub fn ranked_popularity(context: &TrendContext, month: u32) -> u32 {
    let boosted = u32::from(context.popularity) * seasonal_boost(&context.category, month);
    (boosted + 50) / 100
}

/// Normalize bare terms into an ordered keyword list.
pub fn normalize<S: AsRef<str>>(terms: &[S]) -> Result<Vec<Keyword>, NormalizeError> {
    let mut seen = HashSet::new();
    let keywords: Vec<Keyword> = terms
        .iter()
        .filter_map(|t| Keyword::parse(t.as_ref()))
        .filter(|k| seen.insert(k.clone()))
        .collect();

    if keywords.is_empty() {
        return Err(NormalizeError::InvalidInput(terms.len()));
    }
    Ok(keywords)
}

/// Normalize scraped trend items into a [`KeywordSet`].
///
/// Applies the same canonicalization as [`normalize`], drops keywords
/// containing a blocked term, and records the first-seen context of each
/// keyword (inferring a category when the source gave none).
pub fn normalize_trends(
    items: &[TrendItem],
    config: &KeywordsConfig,
) -> Result<KeywordSet, NormalizeError> {
    let blocked: Vec<String> = config.blocked.iter().map(|b| b.to_lowercase()).collect();
    let mut set = KeywordSet::default();

    for item in items {
        let Some(keyword) = Keyword::parse(&item.keyword) else {
            continue;
        };
        if let Some(term) = blocked.iter().find(|b| keyword.as_str().contains(b.as_str())) {
            tracing::debug!(%keyword, term, "dropping blocked keyword");
            continue;
        }
        let category = item
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_lowercase)
            .unwrap_or_else(|| categorize(keyword.as_str()).to_string());
        let context = TrendContext {
            category,
            popularity: item.popularity.unwrap_or(DEFAULT_POPULARITY).min(100),
            source: item.source.clone().unwrap_or_else(|| "unknown".to_string()),
        };
        set.push(KeywordEntry { keyword, context });
    }

    if set.is_empty() {
        return Err(NormalizeError::InvalidInput(items.len()));
    }
    Ok(set)
}
