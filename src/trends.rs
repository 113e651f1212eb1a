//! Trend sources.
//!
//! A [`TrendSource`] answers one question: which terms are trending for a
//! date. Scraping itself lives outside this crate; what ships here is the
//! file-based source that reads a scraper snapshot, a seasonal baseline so
//! a run never starts from nothing, and a combinator that tries sources in
//! order.
//!
//! The snapshot format is the scraper's JSON:
//!
//! ```json
//! { "trending_searches": [ { "keyword": "remote work", "popularity": 95,
//!                            "category": "business", "source": "pexels_api" } ] }
//! ```
//!
//! A bare array of strings or items is accepted too.

use crate::types::TrendItem;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("trend source '{name}' unavailable: {reason}")]
    Unavailable { name: String, reason: String },
}

/// Capability: fetch raw trending terms for a date.
pub trait TrendSource: Send + Sync {
    fn name(&self) -> &str;

    fn fetch(&self, date: NaiveDate) -> Result<Vec<TrendItem>, SourceError>;
}

/// Reads a scraper snapshot from disk. The date is not used: the file is
/// whatever the scraper produced for this run.
#[derive(Debug, Clone)]
pub struct FileTrendSource {
    path: PathBuf,
}

impl FileTrendSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn unavailable(&self, reason: impl ToString) -> SourceError {
        SourceError::Unavailable {
            name: self.name().to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotFile {
    Wrapped { trending_searches: Vec<SnapshotEntry> },
    List(Vec<SnapshotEntry>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotEntry {
    Term(String),
    Item(TrendItem),
}

impl TrendSource for FileTrendSource {
    fn name(&self) -> &str {
        "file"
    }

    fn fetch(&self, _date: NaiveDate) -> Result<Vec<TrendItem>, SourceError> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| self.unavailable(format!("{}: {e}", self.path.display())))?;
        let parsed: SnapshotFile = serde_json::from_str(&content)
            .map_err(|e| self.unavailable(format!("{}: {e}", self.path.display())))?;
        let entries = match parsed {
            SnapshotFile::Wrapped { trending_searches } => trending_searches,
            SnapshotFile::List(entries) => entries,
        };
        Ok(entries
            .into_iter()
            .map(|entry| match entry {
                SnapshotEntry::Term(term) => TrendItem::term(term),
                SnapshotEntry::Item(item) => item,
            })
            .collect())
    }
}

/// Seasonal baseline: `"<season> <bucket>"` terms derived from the date.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeasonalTrendSource;

const SEASONAL_BUCKETS: [&str; 6] = [
    "business",
    "lifestyle",
    "nature",
    "technology",
    "food",
    "education",
];

/// Meteorological season (northern hemisphere) for a date.
pub fn season(date: NaiveDate) -> &'static str {
    match date.month() {
        12 | 1 | 2 => "winter",
        3..=5 => "spring",
        6..=8 => "summer",
        _ => "autumn",
    }
}

impl TrendSource for SeasonalTrendSource {
    fn name(&self) -> &str {
        "seasonal"
    }

    fn fetch(&self, date: NaiveDate) -> Result<Vec<TrendItem>, SourceError> {
        let season = season(date);
        Ok(SEASONAL_BUCKETS
            .iter()
            .zip((0u8..).map(|i| 88 - 3 * i))
            .map(|(bucket, popularity)| TrendItem {
                keyword: format!("{season} {bucket}"),
                popularity: Some(popularity),
                category: Some((*bucket).to_string()),
                source: Some("seasonal".to_string()),
            })
            .collect())
    }
}

/// Tries each source in order; the first one returning a non-empty list
/// wins. Fails only when every source failed or came back empty.
pub struct FallbackSource {
    sources: Vec<Box<dyn TrendSource>>,
}

impl FallbackSource {
    pub fn new(sources: Vec<Box<dyn TrendSource>>) -> Self {
        Self { sources }
    }
}

impl TrendSource for FallbackSource {
    fn name(&self) -> &str {
        "fallback"
    }

    fn fetch(&self, date: NaiveDate) -> Result<Vec<TrendItem>, SourceError> {
        let mut reasons = Vec::new();
        for source in &self.sources {
            match source.fetch(date) {
                Ok(items) if !items.is_empty() => return Ok(items),
                Ok(_) => {
                    tracing::info!(source = source.name(), "trend source returned no terms");
                    reasons.push(format!("{}: empty", source.name()));
                }
                Err(e) => {
                    tracing::warn!(source = source.name(), error = %e, "trend source failed");
                    reasons.push(e.to_string());
                }
            }
        }
        Err(SourceError::Unavailable {
            name: self.name().to_string(),
            reason: if reasons.is_empty() {
                "no sources configured".to_string()
            } else {
                reasons.join("; ")
            },
        })
    }
}

/// Raw scrape snapshot persisted as `trends_data.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSnapshot {
    pub date: NaiveDate,
    pub fetched_at: DateTime<Utc>,
    pub sources_used: Vec<String>,
    pub trending_searches: Vec<TrendItem>,
}

impl TrendSnapshot {
    pub fn new(date: NaiveDate, source: &str, items: Vec<TrendItem>) -> Self {
        Self {
            date,
            fetched_at: Utc::now(),
            sources_used: vec![source.to_string()],
            trending_searches: items,
        }
    }

    /// Fold a later scrape for the same date into this snapshot. Items are
    /// matched on their exact keyword text; known ones keep their first
    /// version. Returns how many items were added.
    pub fn merge(&mut self, later: TrendSnapshot) -> usize {
        let before = self.trending_searches.len();
        for item in later.trending_searches {
            if !self
                .trending_searches
                .iter()
                .any(|known| known.keyword == item.keyword)
            {
                self.trending_searches.push(item);
            }
        }
        for source in later.sources_used {
            if !self.sources_used.contains(&source) {
                self.sources_used.push(source);
            }
        }
        self.fetched_at = later.fetched_at;
        self.trending_searches.len() - before
    }
}
