//! Shared types used across all pipeline stages.
//!
//! These types are serialized into the run directory (`keywords.json`,
//! `trends_data.json`) and read back by later runs for the same date, so
//! their JSON shape must stay stable.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalized keyword: lower-case, trimmed, inner whitespace collapsed.
///
/// Construct through [`Keyword::parse`] (or the normalizer) so the
/// canonical form is guaranteed. Ordering is lexical and only used for
/// deterministic output; run order is kept separately by [`KeywordSet`].
///
/// [`KeywordSet`]: crate::keywords::KeywordSet
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Keyword(String);

impl Keyword {
    /// Canonicalize a raw term. Returns `None` when nothing is left.
    pub fn parse(raw: &str) -> Option<Self> {
        let canonical = raw
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ");
        if canonical.is_empty() {
            None
        } else {
            Some(Self(canonical))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File stem used for every artifact of this keyword.
    pub fn slug(&self) -> String {
        crate::keywords::slugify(&self.0)
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Keyword {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One raw term as returned by a trend source.
///
/// Only `keyword` is required; the rest is context that feeds prompt and
/// metadata templates. Field names match the scraper's snapshot format
/// (`trending_searches[]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendItem {
    pub keyword: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popularity: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl TrendItem {
    pub fn term(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            popularity: None,
            category: None,
            source: None,
        }
    }
}

/// Trend context kept for a normalized keyword (first occurrence wins).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendContext {
    pub category: String,
    pub popularity: u8,
    pub source: String,
}

/// Popularity assumed when a source does not report one.
pub const DEFAULT_POPULARITY: u8 = 75;

/// A keyword together with its trend context, as stored in `keywords.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordEntry {
    pub keyword: Keyword,
    #[serde(flatten)]
    pub context: TrendContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_lowercases_and_trims() {
        assert_eq!(Keyword::parse("  Cat ").unwrap().as_str(), "cat");
    }

    #[test]
    fn parse_collapses_inner_whitespace() {
        let k = Keyword::parse("Remote \t  Work").unwrap();
        assert_eq!(k.as_str(), "remote work");
    }

    #[test]
    fn parse_rejects_blank() {
        assert!(Keyword::parse("").is_none());
        assert!(Keyword::parse("   ").is_none());
    }

    #[test]
    fn keyword_serializes_as_plain_string() {
        let k = Keyword::parse("Sunrise").unwrap();
        assert_eq!(serde_json::to_string(&k).unwrap(), "\"sunrise\"");
    }

    #[test]
    fn trend_item_accepts_bare_keyword() {
        let item: TrendItem = serde_json::from_str(r#"{"keyword": "forest"}"#).unwrap();
        assert_eq!(item, TrendItem::term("forest"));
    }

    #[test]
    fn keyword_entry_flattens_context() {
        let entry = KeywordEntry {
            keyword: Keyword::parse("forest").unwrap(),
            context: TrendContext {
                category: "nature".into(),
                popularity: 80,
                source: "fallback".into(),
            },
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["keyword"], "forest");
        assert_eq!(json["category"], "nature");
        assert_eq!(json["popularity"], 80);
    }
}
