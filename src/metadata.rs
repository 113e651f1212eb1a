//! Metadata composition stage.
//!
//! Every image gets one `metadata/<slug>.json` record with the SEO fields a
//! stock platform asks for. Composition is a pure function of the keyword,
//! its trend context, the image (dimensions and content hash), the run date
//! and the metadata config:
//!
//! | Field | Source |
//! |---|---|
//! | Title | category template, quality descriptor from popularity |
//! | Description | category paragraph + licensing sentence |
//! | Tags | keyword and its words → category tags → seasonal tags → usage tags → popularity tags |
//! | Copyright | run year + company |
//! | `image_hash` | SHA-256 of the image the record describes |
//!
//! Because the output is deterministic, the stage simply recomposes every
//! candidate and lets the store decide: identical JSON is a no-op, a record
//! composed for an older image (different `image_hash`) is overwritten.

use crate::config::MetadataConfig;
use crate::context::{PipelineEvent, RunContext, StageOutcome};
use crate::keywords::{KeywordSet, categorize};
use crate::pipeline::{PipelineError, RunState};
use crate::render::read_dimensions;
use crate::store::{ArtifactKind, StoreError, WriteOutcome, hash_bytes};
use crate::types::{DEFAULT_POPULARITY, Keyword, TrendContext};
use chrono::{Datelike, NaiveDate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

const STAGE: RunState = RunState::Composing;

/// A record that breaks platform limits. Per keyword, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("title is empty")]
    EmptyTitle,
    #[error("title is {len} characters, limit {max}")]
    TitleTooLong { len: usize, max: usize },
    #[error("description is empty")]
    EmptyDescription,
    #[error("description is {len} characters, limit {max}")]
    DescriptionTooLong { len: usize, max: usize },
    #[error("{count} tags, at least {min} required")]
    TooFewTags { count: usize, min: usize },
    #[error("{count} tags, at most {max} allowed")]
    TooManyTags { count: usize, max: usize },
    #[error("tag '{tag}' exceeds {max} characters")]
    TagTooLong { tag: String, max: usize },
    #[error("duplicate tag '{0}'")]
    DuplicateTag(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Landscape,
    Portrait,
    Square,
}

impl Orientation {
    pub fn of(width: u32, height: u32) -> Self {
        match width.cmp(&height) {
            std::cmp::Ordering::Greater => Orientation::Landscape,
            std::cmp::Ordering::Less => Orientation::Portrait,
            std::cmp::Ordering::Equal => Orientation::Square,
        }
    }
}

/// SEO metadata for one image, stored as `metadata/<slug>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub keyword: Keyword,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category: String,
    pub secondary_keywords: Vec<String>,
    pub market_demand: String,
    pub popularity: u8,
    pub trend_source: String,
    pub creator: String,
    pub copyright: String,
    pub license: String,
    pub orientation: Orientation,
    pub width: u32,
    pub height: u32,
    /// Hash of the image this record was composed for.
    pub image_hash: String,
}

impl MetadataRecord {
    /// Check the record against platform limits.
    pub fn validate(&self, limits: &MetadataConfig) -> Result<(), ValidationError> {
        let title_len = self.title.chars().count();
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if title_len > limits.max_title_len {
            return Err(ValidationError::TitleTooLong {
                len: title_len,
                max: limits.max_title_len,
            });
        }
        let desc_len = self.description.chars().count();
        if self.description.trim().is_empty() {
            return Err(ValidationError::EmptyDescription);
        }
        if desc_len > limits.max_description_len {
            return Err(ValidationError::DescriptionTooLong {
                len: desc_len,
                max: limits.max_description_len,
            });
        }
        if self.tags.len() < limits.min_tags {
            return Err(ValidationError::TooFewTags {
                count: self.tags.len(),
                min: limits.min_tags,
            });
        }
        if self.tags.len() > limits.max_tags {
            return Err(ValidationError::TooManyTags {
                count: self.tags.len(),
                max: limits.max_tags,
            });
        }
        let mut seen = HashSet::new();
        for tag in &self.tags {
            if tag.chars().count() > limits.max_tag_len {
                return Err(ValidationError::TagTooLong {
                    tag: tag.clone(),
                    max: limits.max_tag_len,
                });
            }
            if !seen.insert(tag.as_str()) {
                return Err(ValidationError::DuplicateTag(tag.clone()));
            }
        }
        Ok(())
    }
}

/// What composition needs to know about the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub hash: String,
}

/// `"mountain lake"` → `"Mountain Lake"`.
fn title_case(keyword: &str) -> String {
    keyword
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn quality_descriptor(popularity: u8) -> &'static str {
    if popularity > 85 {
        "Premium"
    } else if popularity > 70 {
        "Professional"
    } else {
        "High Quality"
    }
}

fn build_title(keyword: &str, category: &str, popularity: u8) -> String {
    let name = title_case(keyword);
    match category {
        "business" => format!(
            "{} {name} - Corporate Stock Photography",
            quality_descriptor(popularity)
        ),
        "technology" => format!("Cutting-Edge {name} - Technology Stock Photo"),
        "lifestyle" => format!("Authentic {name} - Lifestyle Stock Photography"),
        "food" => format!("Gourmet {name} - Food Photography Stock Image"),
        "nature" => format!("Stunning {name} - Nature Stock Photography"),
        _ => format!("{} {name} Stock Photo", quality_descriptor(popularity)),
    }
}

fn build_description(keyword: &str, category: &str, source: &str) -> String {
    let usage = match category {
        "business" => {
            "Perfect for corporate communications, business presentations, marketing materials, and professional websites. Ideal for conveying success, teamwork, and modern business concepts."
        }
        "technology" => {
            "Excellent for technology blogs, software companies, digital marketing, and innovation-focused content. Represents cutting-edge technological advancement and digital transformation."
        }
        "lifestyle" => {
            "Authentic and relatable imagery perfect for lifestyle brands, wellness companies, social media, and human-centered marketing campaigns."
        }
        "food" => {
            "High-quality culinary photography ideal for restaurants, food blogs, nutrition websites, cookbook covers, and food-related marketing materials."
        }
        "nature" => {
            "Stunning environmental imagery perfect for travel websites, outdoor brands, environmental campaigns, and nature-focused content."
        }
        _ => {
            "Versatile stock photography suitable for various commercial applications, websites, marketing materials, and creative projects."
        }
    };
    let mut description = format!("Professional stock photograph featuring {keyword}. {usage}");
    if source == "seasonal" {
        description.push_str(" Currently trending in seasonal markets.");
    }
    description.push_str(
        " Royalty-free license with commercial usage rights included. High resolution and professional quality guaranteed.",
    );
    description
}

fn category_tags(category: &str) -> &'static [&'static str] {
    match category {
        "business" => &[
            "business", "corporate", "professional", "office", "meeting", "team", "success",
            "leadership", "strategy", "finance", "marketing", "workplace", "executive",
            "collaboration", "growth", "entrepreneur",
        ],
        "technology" => &[
            "technology", "tech", "digital", "innovation", "modern", "computer", "software",
            "artificial intelligence", "data", "cloud", "network", "future", "automation",
        ],
        "lifestyle" => &[
            "lifestyle", "people", "authentic", "everyday", "family", "friends", "happiness",
            "wellness", "health", "leisure", "home", "life",
        ],
        "food" => &[
            "food", "cooking", "kitchen", "meal", "healthy", "nutrition", "organic", "fresh",
            "ingredients", "recipe", "restaurant", "cuisine", "gourmet", "delicious",
        ],
        "nature" => &[
            "nature", "natural", "environment", "outdoor", "landscape", "scenic", "forest",
            "mountain", "sky", "tree", "green", "sustainable", "eco", "earth", "peaceful",
            "beauty", "wilderness",
        ],
        _ => &[],
    }
}

fn seasonal_tags(month: u32) -> &'static [&'static str] {
    match month {
        1 => &["new year", "winter", "resolution", "fresh start"],
        2 => &["valentine", "love", "romantic", "heart"],
        3 => &["spring", "growth", "renewal", "bloom"],
        4 => &["easter", "spring", "fresh", "new beginning"],
        5 => &["mother day", "family", "celebration", "flowers"],
        6 => &["graduation", "summer", "achievement", "success"],
        7 => &["summer", "vacation", "freedom", "outdoor"],
        8 => &["back to school", "education", "learning", "knowledge"],
        9 => &["autumn", "fall", "harvest", "change"],
        10 => &["halloween", "autumn", "transformation", "creative"],
        11 => &["thanksgiving", "gratitude", "family", "abundance"],
        _ => &["christmas", "holiday", "winter", "celebration"],
    }
}

const USAGE_TAGS: &[&str] = &[
    "stock photo",
    "stock photography",
    "commercial use",
    "royalty free",
    "high quality",
    "professional",
    "hd",
    "high resolution",
    "premium",
    "commercial license",
    "marketing",
    "advertising",
    "website",
    "social media",
    "print",
    "digital",
];

/// Ordered, de-duplicated tag list capped at `limits.max_tags`. Tags over
/// the length limit or shorter than two characters are left out.
fn build_tags(
    keyword: &str,
    context: &TrendContext,
    date: NaiveDate,
    limits: &MetadataConfig,
) -> Vec<String> {
    let mut candidates: Vec<String> = vec![keyword.to_string()];
    candidates.extend(
        keyword
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string),
    );
    candidates.extend(category_tags(&context.category).iter().map(|t| t.to_string()));
    if context.source == "seasonal" {
        candidates.extend(seasonal_tags(date.month()).iter().map(|t| t.to_string()));
    }
    candidates.extend(USAGE_TAGS.iter().map(|t| t.to_string()));
    if context.popularity > 90 {
        candidates.extend(["trending now", "hot topic", "viral", "popular"].map(String::from));
    } else if context.popularity > 80 {
        candidates.extend(["trending", "popular", "in demand"].map(String::from));
    }

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| t.chars().count() > 1 && t.chars().count() <= limits.max_tag_len)
        .filter(|t| seen.insert(t.clone()))
        .take(limits.max_tags)
        .collect()
}

fn market_demand(popularity: u8) -> &'static str {
    match popularity {
        90.. => "Very High",
        80..=89 => "High",
        70..=79 => "Medium",
        60..=69 => "Moderate",
        _ => "Low",
    }
}

/// Build the metadata record for one image.
pub fn compose(
    keyword: &Keyword,
    context: &TrendContext,
    image: &ImageInfo,
    date: NaiveDate,
    config: &MetadataConfig,
) -> MetadataRecord {
    let k = keyword.as_str();
    MetadataRecord {
        keyword: keyword.clone(),
        title: build_title(k, &context.category, context.popularity),
        description: build_description(k, &context.category, &context.source),
        tags: build_tags(k, context, date, config),
        category: context.category.clone(),
        secondary_keywords: vec![
            format!("{k} photography"),
            format!("{k} image"),
            format!("{k} picture"),
            format!("{k} stock"),
            format!("professional {k}"),
        ],
        market_demand: market_demand(context.popularity).to_string(),
        popularity: context.popularity,
        trend_source: context.source.clone(),
        creator: config.creator.clone(),
        copyright: format!("© {} {}", date.year(), config.company),
        license: config.license.clone(),
        orientation: Orientation::of(image.width, image.height),
        width: image.width,
        height: image.height,
        image_hash: image.hash.clone(),
    }
}

enum ItemResult {
    Composed(WriteOutcome),
    Failed(String),
    Cancelled,
}

/// Builds, validates and persists metadata for generated images.
pub struct MetadataComposer<'k> {
    keywords: &'k KeywordSet,
}

impl<'k> MetadataComposer<'k> {
    /// `keywords` supplies the trend context for each candidate.
    pub fn new(keywords: &'k KeywordSet) -> Self {
        Self { keywords }
    }

    /// Compose metadata for every candidate keyword (those with an image).
    pub fn run(
        &self,
        ctx: &RunContext,
        candidates: &BTreeSet<Keyword>,
        outcome: &mut StageOutcome,
    ) -> Result<(), PipelineError> {
        ctx.emit(PipelineEvent::StageStarted {
            stage: STAGE,
            candidates: candidates.len(),
        });

        let results: Vec<(Keyword, Result<ItemResult, StoreError>)> = ctx.install(|| {
            candidates
                .par_iter()
                .map(|keyword| (keyword.clone(), self.compose_one(ctx, keyword)))
                .collect()
        });

        let mut storage_error = None;
        for (keyword, result) in results {
            match result {
                Ok(ItemResult::Composed(WriteOutcome::Unchanged)) => {
                    outcome.reused.insert(keyword);
                }
                Ok(ItemResult::Composed(_)) => {
                    outcome.succeeded.insert(keyword);
                }
                Ok(ItemResult::Failed(reason)) => {
                    ctx.keyword_failed(STAGE, outcome, &keyword, reason);
                }
                Ok(ItemResult::Cancelled) => {
                    outcome.cancelled.insert(keyword);
                }
                Err(e) => {
                    tracing::error!(%keyword, error = %e, "storage failure during composition");
                    storage_error.get_or_insert(e);
                }
            }
        }

        ctx.emit(PipelineEvent::StageFinished {
            stage: STAGE,
            succeeded: outcome.available().len(),
            failed: outcome.failed.len(),
        });

        if let Some(e) = storage_error {
            return Err(e.into());
        }
        if !outcome.cancelled.is_empty() {
            return Err(PipelineError::Cancelled { stage: STAGE });
        }
        if outcome.available().is_empty() {
            return Err(PipelineError::NoArtifactsProduced { stage: STAGE });
        }
        Ok(())
    }

    fn trend_context(&self, keyword: &Keyword) -> TrendContext {
        self.keywords
            .context(keyword)
            .cloned()
            .unwrap_or_else(|| TrendContext {
                category: categorize(keyword.as_str()).to_string(),
                popularity: DEFAULT_POPULARITY,
                source: "unknown".to_string(),
            })
    }

    fn compose_one(&self, ctx: &RunContext, keyword: &Keyword) -> Result<ItemResult, StoreError> {
        if ctx.cancel.is_cancelled() {
            return Ok(ItemResult::Cancelled);
        }

        let bytes = match ctx.store.read_artifact(ctx.date, keyword, ArtifactKind::Image) {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound { .. }) => {
                return Ok(ItemResult::Failed("image artifact missing".to_string()));
            }
            Err(e) => return Err(e),
        };
        let (width, height) = match read_dimensions(&bytes) {
            Ok(dims) => dims,
            Err(e) => return Ok(ItemResult::Failed(e.to_string())),
        };
        let image = ImageInfo {
            width,
            height,
            hash: hash_bytes(&bytes),
        };

        let limits = &ctx.config.metadata;
        let record = compose(keyword, &self.trend_context(keyword), &image, ctx.date, limits);
        if let Err(e) = record.validate(limits) {
            // An older, now invalid record must not stay around to be staged.
            ctx.store
                .remove_artifact(ctx.date, keyword, ArtifactKind::Metadata)?;
            return Ok(ItemResult::Failed(e.to_string()));
        }

        let json = match serde_json::to_vec_pretty(&record) {
            Ok(json) => json,
            Err(e) => return Ok(ItemResult::Failed(e.to_string())),
        };
        let outcome = ctx
            .store
            .write_artifact(ctx.date, keyword, ArtifactKind::Metadata, &json)?;
        if outcome.changed() {
            tracing::info!(%keyword, title = %record.title, tags = record.tags.len(), %outcome, "metadata composed");
            ctx.log(keyword, &format!("metadata {outcome}: {}", record.title));
        }
        ctx.emit(PipelineEvent::MetadataComposed {
            keyword: keyword.clone(),
            title: record.title,
            tags: record.tags.len(),
            outcome,
        });
        Ok(ItemResult::Composed(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{TestRun, keyword_set, tiny_jpeg};

    fn kw(s: &str) -> Keyword {
        Keyword::parse(s).unwrap()
    }

    fn context(category: &str, popularity: u8, source: &str) -> TrendContext {
        TrendContext {
            category: category.into(),
            popularity,
            source: source.into(),
        }
    }

    fn image() -> ImageInfo {
        ImageInfo {
            width: 6000,
            height: 4000,
            hash: "abc".into(),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    // =========================================================================
    // Composition
    // =========================================================================

    #[test]
    fn business_title_uses_quality_descriptor() {
        let record = compose(
            &kw("remote work"),
            &context("business", 95, "pexels_api"),
            &image(),
            date(),
            &MetadataConfig::default(),
        );
        assert_eq!(
            record.title,
            "Premium Remote Work - Corporate Stock Photography"
        );
        assert_eq!(record.orientation, Orientation::Landscape);
        assert_eq!(record.market_demand, "Very High");
        assert_eq!(record.copyright, "© 2026 AI Stock Photography");
    }

    #[test]
    fn general_title_falls_back_to_descriptor_template() {
        assert_eq!(
            build_title("abstract shapes", "general", 60),
            "High Quality Abstract Shapes Stock Photo"
        );
        assert_eq!(
            build_title("abstract shapes", "medical", 75),
            "Professional Abstract Shapes Stock Photo"
        );
    }

    #[test]
    fn nature_title_template() {
        assert_eq!(
            build_title("forest", "nature", 80),
            "Stunning Forest - Nature Stock Photography"
        );
    }

    #[test]
    fn description_mentions_keyword_and_license() {
        let d = build_description("forest", "nature", "seasonal");
        assert!(d.starts_with("Professional stock photograph featuring forest."));
        assert!(d.contains("seasonal markets"));
        assert!(d.ends_with("professional quality guaranteed."));
    }

    #[test]
    fn tags_start_with_keyword_and_are_unique() {
        let tags = build_tags(
            "mountain lake",
            &context("nature", 92, "file"),
            date(),
            &MetadataConfig::default(),
        );
        assert_eq!(&tags[..3], &["mountain lake", "mountain", "lake"]);
        let unique: HashSet<_> = tags.iter().collect();
        assert_eq!(unique.len(), tags.len());
        assert!(tags.contains(&"viral".to_string()));
        assert!(tags.len() <= 50);
    }

    #[test]
    fn seasonal_source_adds_month_tags() {
        let tags = build_tags(
            "autumn food",
            &context("food", 80, "seasonal"),
            date(),
            &MetadataConfig::default(),
        );
        assert!(tags.contains(&"halloween".to_string()));
    }

    #[test]
    fn tags_respect_configured_limits() {
        let limits = MetadataConfig {
            max_tags: 5,
            max_tag_len: 8,
            ..MetadataConfig::default()
        };
        let tags = build_tags("forest", &context("nature", 50, "file"), date(), &limits);
        assert_eq!(tags.len(), 5);
        assert!(tags.iter().all(|t| t.chars().count() <= 8));
    }

    #[test]
    fn composition_is_deterministic() {
        let a = compose(
            &kw("forest"),
            &context("nature", 80, "file"),
            &image(),
            date(),
            &MetadataConfig::default(),
        );
        let b = compose(
            &kw("forest"),
            &context("nature", 80, "file"),
            &image(),
            date(),
            &MetadataConfig::default(),
        );
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }

    #[test]
    fn title_case_words() {
        assert_eq!(title_case("ai robot assistant"), "Ai Robot Assistant");
        assert_eq!(title_case("café"), "Café");
    }

    #[test]
    fn orientation_of_dimensions() {
        assert_eq!(Orientation::of(10, 5), Orientation::Landscape);
        assert_eq!(Orientation::of(5, 10), Orientation::Portrait);
        assert_eq!(Orientation::of(5, 5), Orientation::Square);
    }

    // =========================================================================
    // Validation
    // =========================================================================

    fn valid_record() -> MetadataRecord {
        compose(
            &kw("forest"),
            &context("nature", 80, "file"),
            &image(),
            date(),
            &MetadataConfig::default(),
        )
    }

    #[test]
    fn composed_record_is_valid() {
        valid_record().validate(&MetadataConfig::default()).unwrap();
    }

    #[test]
    fn validate_title_too_long() {
        let limits = MetadataConfig {
            max_title_len: 10,
            ..MetadataConfig::default()
        };
        assert!(matches!(
            valid_record().validate(&limits),
            Err(ValidationError::TitleTooLong { max: 10, .. })
        ));
    }

    #[test]
    fn validate_empty_fields() {
        let mut record = valid_record();
        record.title = "  ".into();
        assert_eq!(
            record.validate(&MetadataConfig::default()),
            Err(ValidationError::EmptyTitle)
        );
        let mut record = valid_record();
        record.description.clear();
        assert_eq!(
            record.validate(&MetadataConfig::default()),
            Err(ValidationError::EmptyDescription)
        );
    }

    #[test]
    fn validate_tag_rules() {
        let limits = MetadataConfig::default();
        let mut record = valid_record();
        record.tags.clear();
        assert!(matches!(
            record.validate(&limits),
            Err(ValidationError::TooFewTags { .. })
        ));

        let mut record = valid_record();
        record.tags = vec!["a".repeat(65)];
        assert!(matches!(
            record.validate(&limits),
            Err(ValidationError::TagTooLong { .. })
        ));

        let mut record = valid_record();
        record.tags = vec!["forest".into(), "forest".into()];
        assert_eq!(
            record.validate(&limits),
            Err(ValidationError::DuplicateTag("forest".into()))
        );

        let mut record = valid_record();
        record.tags = (0..51).map(|i| format!("tag{i}")).collect();
        assert!(matches!(
            record.validate(&limits),
            Err(ValidationError::TooManyTags { count: 51, .. })
        ));
    }

    // =========================================================================
    // Stage
    // =========================================================================

    fn with_images(run: &TestRun, names: &[&str]) -> BTreeSet<Keyword> {
        names
            .iter()
            .map(|n| {
                let k = kw(n);
                run.store
                    .write_artifact(run.date, &k, ArtifactKind::Image, &tiny_jpeg(40, 60))
                    .unwrap();
                k
            })
            .collect()
    }

    #[test]
    fn composes_metadata_for_each_image() {
        let run = TestRun::new();
        let ctx = run.context();
        let keywords = keyword_set(&["sunrise", "forest"]);
        let candidates = with_images(&run, &["sunrise", "forest"]);

        let mut outcome = StageOutcome::default();
        MetadataComposer::new(&keywords)
            .run(&ctx, &candidates, &mut outcome)
            .unwrap();

        assert_eq!(outcome.succeeded, candidates);
        let bytes = run
            .store
            .read_artifact(run.date, &kw("forest"), ArtifactKind::Metadata)
            .unwrap();
        let record: MetadataRecord = serde_json::from_slice(&bytes).unwrap();
        let image = run
            .store
            .read_artifact(run.date, &kw("forest"), ArtifactKind::Image)
            .unwrap();
        assert_eq!(record.image_hash, hash_bytes(&image));
        assert_eq!((record.width, record.height), (40, 60));
    }

    #[test]
    fn second_run_reuses_current_metadata() {
        let run = TestRun::new();
        let ctx = run.context();
        let keywords = keyword_set(&["forest"]);
        let candidates = with_images(&run, &["forest"]);
        let composer = MetadataComposer::new(&keywords);

        composer
            .run(&ctx, &candidates, &mut StageOutcome::default())
            .unwrap();
        let mut outcome = StageOutcome::default();
        composer.run(&ctx, &candidates, &mut outcome).unwrap();

        assert_eq!(outcome.reused, candidates);
        assert!(outcome.succeeded.is_empty());
    }

    #[test]
    fn stale_metadata_rebuilt_after_image_change() {
        let run = TestRun::new();
        let ctx = run.context();
        let keywords = keyword_set(&["forest"]);
        let candidates = with_images(&run, &["forest"]);
        let composer = MetadataComposer::new(&keywords);
        composer
            .run(&ctx, &candidates, &mut StageOutcome::default())
            .unwrap();

        let new_image = tiny_jpeg(48, 60);
        run.store
            .write_artifact(run.date, &kw("forest"), ArtifactKind::Image, &new_image)
            .unwrap();
        let mut outcome = StageOutcome::default();
        composer.run(&ctx, &candidates, &mut outcome).unwrap();

        assert_eq!(outcome.succeeded, candidates);
        let record = run
            .store
            .record(run.date, &kw("forest"), ArtifactKind::Metadata)
            .unwrap();
        assert_eq!(record.revision, 2);
        let bytes = run
            .store
            .read_artifact(run.date, &kw("forest"), ArtifactKind::Metadata)
            .unwrap();
        let stored: MetadataRecord = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(stored.image_hash, hash_bytes(&new_image));
    }

    #[test]
    fn missing_image_is_per_keyword_failure() {
        let run = TestRun::new();
        let ctx = run.context();
        let keywords = keyword_set(&["forest", "ghost"]);
        let mut candidates = with_images(&run, &["forest"]);
        candidates.insert(kw("ghost"));

        let mut outcome = StageOutcome::default();
        MetadataComposer::new(&keywords)
            .run(&ctx, &candidates, &mut outcome)
            .unwrap();

        assert!(outcome.failed.contains_key(&kw("ghost")));
        assert!(!run.store.exists(run.date, &kw("ghost"), ArtifactKind::Metadata));
    }

    #[test]
    fn validation_failure_removes_old_record() {
        let mut run = TestRun::new();
        let keywords = keyword_set(&["forest"]);
        let candidates = with_images(&run, &["forest"]);
        MetadataComposer::new(&keywords)
            .run(&run.context(), &candidates, &mut StageOutcome::default())
            .unwrap();

        run.config.metadata.max_title_len = 5;
        let mut outcome = StageOutcome::default();
        let err = MetadataComposer::new(&keywords)
            .run(&run.context(), &candidates, &mut outcome)
            .unwrap_err();

        assert!(matches!(err, PipelineError::NoArtifactsProduced { .. }));
        assert!(outcome.failed[&kw("forest")].contains("title"));
        assert!(!run.store.exists(run.date, &kw("forest"), ArtifactKind::Metadata));
    }
}
