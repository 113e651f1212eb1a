//! Shared test utilities for the trend-stock test suite.
//!
//! Provides tiny in-memory images, a ready-made run space in a temp
//! directory, and a scripted trend source.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let run = TestRun::new();
//! let ctx = run.context();
//! let keywords = keyword_set(&["sunrise", "forest"]);
//!
//! run.store
//!     .write_artifact(run.date, &keyword, ArtifactKind::Image, &tiny_jpeg(40, 60))
//!     .unwrap();
//! ```

use std::path::Path;
use tempfile::TempDir;

use crate::config::PipelineConfig;
use crate::context::{CancelToken, EventSink, RunContext};
use crate::keywords::KeywordSet;
use crate::store::ArtifactStore;
use crate::trends::{SourceError, TrendSource};
use crate::types::{DEFAULT_POPULARITY, Keyword, KeywordEntry, TrendContext, TrendItem};
use chrono::NaiveDate;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

// =========================================================================
// Images
// =========================================================================

fn pixels(width: u32, height: u32) -> Vec<u8> {
    (0..width * height)
        .flat_map(|i| {
            let v = (i % 251) as u8;
            [v, 255 - v, 128]
        })
        .collect()
}

/// A valid JPEG of the given size.
pub fn tiny_jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 80)
        .write_image(&pixels(width, height), width, height, ExtendedColorType::Rgb8)
        .unwrap();
    out
}

/// A valid PNG of the given size.
pub fn tiny_png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(&pixels(width, height), width, height, ExtendedColorType::Rgb8)
        .unwrap();
    out
}

// =========================================================================
// Run setup
// =========================================================================

/// Config rooted in `dir/output`, with minimum image dimensions small
/// enough for [`tiny_jpeg`] and two workers.
pub fn test_config(dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig {
        output_root: dir.join("output"),
        ..PipelineConfig::default()
    };
    config.generation.min_width = 16;
    config.generation.min_height = 16;
    config.processing.max_workers = Some(2);
    config
}

/// An isolated store with the run space for a fixed date already created.
pub struct TestRun {
    _tmp: TempDir,
    pub store: ArtifactStore,
    pub date: NaiveDate,
    pub config: PipelineConfig,
}

impl TestRun {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let store = ArtifactStore::new(&config.output_root);
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        store.ensure_run_space(date).unwrap();
        Self {
            _tmp: tmp,
            store,
            date,
            config,
        }
    }

    /// A context over this run with no event listener.
    pub fn context(&self) -> RunContext<'_> {
        RunContext::new(
            self.date,
            &self.config,
            &self.store,
            EventSink::none(),
            CancelToken::new(),
            2,
        )
        .unwrap()
    }
}

/// A keyword set in the given order, categorized "general".
pub fn keyword_set(names: &[&str]) -> KeywordSet {
    KeywordSet::from_entries(
        names
            .iter()
            .map(|name| KeywordEntry {
                keyword: Keyword::parse(name).unwrap(),
                context: TrendContext {
                    category: "general".to_string(),
                    popularity: DEFAULT_POPULARITY,
                    source: "test".to_string(),
                },
            })
            .collect(),
    )
}

// =========================================================================
// Trend source
// =========================================================================

/// Trend source returning a fixed list, or always failing.
pub struct StaticSource {
    items: Result<Vec<TrendItem>, String>,
}

impl StaticSource {
    pub fn terms(terms: &[&str]) -> Self {
        Self {
            items: Ok(terms.iter().map(|t| TrendItem::term(*t)).collect()),
        }
    }

    pub fn unavailable(reason: &str) -> Self {
        Self {
            items: Err(reason.to_string()),
        }
    }
}

impl TrendSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch(&self, _date: NaiveDate) -> Result<Vec<TrendItem>, SourceError> {
        self.items.clone().map_err(|reason| SourceError::Unavailable {
            name: self.name().to_string(),
            reason,
        })
    }
}
