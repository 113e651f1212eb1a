//! Pipeline configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults
//! are serialized to a TOML table and the user's file is merged on top, so
//! a config file only needs the keys it wants to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! output_root = "output"    # Root of the date-partitioned artifact tree
//!
//! [generation]
//! daily_limit = 10          # Max keywords per date partition
//! image_size = [4000, 6000] # Portrait render size (width, height)
//! landscape_size = [6000, 4000]  # Used for business/technology keywords
//! min_width = 1000          # Rendered images below this are rejected
//! min_height = 1000
//! jpeg_quality = 95         # Quality used when transcoding PNG to JPEG
//! renderer = "placeholder"  # "placeholder" or "command"
//! command = []              # argv of the external renderer (prompt appended)
//! fallback_to_placeholder = true
//! timeout_secs = 120        # Per-image limit for the command renderer
//!
//! [metadata]
//! max_title_len = 200
//! max_description_len = 2000
//! min_tags = 1
//! max_tags = 50
//! max_tag_len = 64
//! creator = "Professional AI Photography Studio"
//! company = "AI Stock Photography"
//! license = "Royalty Free - Commercial Use"
//!
//! [keywords]
//! blocked = ["nude", "weapon", ...]   # Keywords containing these are dropped
//!
//! [processing]
//! max_workers = 4           # Parallel render/compose workers (omit for CPU cores)
//!
//! [retention]
//! keep_days = 30            # `prune` removes partitions older than this
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Pipeline configuration loaded from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Root directory holding one subdirectory per run date.
    pub output_root: PathBuf,
    pub generation: GenerationConfig,
    pub metadata: MetadataConfig,
    pub keywords: KeywordsConfig,
    pub processing: ProcessingConfig,
    pub retention: RetentionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("output"),
            generation: GenerationConfig::default(),
            metadata: MetadataConfig::default(),
            keywords: KeywordsConfig::default(),
            processing: ProcessingConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.generation;
        if g.daily_limit == 0 {
            return Err(ConfigError::Validation(
                "generation.daily_limit must be at least 1".into(),
            ));
        }
        if g.jpeg_quality == 0 || g.jpeg_quality > 100 {
            return Err(ConfigError::Validation(
                "generation.jpeg_quality must be 1-100".into(),
            ));
        }
        for (name, [w, h]) in [("image_size", g.image_size), ("landscape_size", g.landscape_size)]
        {
            if w < g.min_width || h < g.min_height {
                return Err(ConfigError::Validation(format!(
                    "generation.{name} {w}x{h} is below the minimum {}x{}",
                    g.min_width, g.min_height
                )));
            }
        }
        if g.renderer == RendererKind::Command && g.command.is_empty() {
            return Err(ConfigError::Validation(
                "generation.command must be set when renderer = \"command\"".into(),
            ));
        }
        if g.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "generation.timeout_secs must be non-zero".into(),
            ));
        }

        let m = &self.metadata;
        if m.min_tags == 0 || m.min_tags > m.max_tags {
            return Err(ConfigError::Validation(
                "metadata.min_tags must be between 1 and metadata.max_tags".into(),
            ));
        }
        if m.max_title_len == 0 || m.max_description_len == 0 || m.max_tag_len == 0 {
            return Err(ConfigError::Validation(
                "metadata length limits must be non-zero".into(),
            ));
        }
        if self.retention.keep_days == 0 {
            return Err(ConfigError::Validation(
                "retention.keep_days must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Which rendering backend the CLI wires in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    Placeholder,
    Command,
}

/// Image generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    /// Maximum keywords per date partition (across re-runs).
    pub daily_limit: usize,
    /// Portrait render size as `[width, height]`.
    pub image_size: [u32; 2],
    /// Landscape render size for presentation-oriented categories.
    pub landscape_size: [u32; 2],
    pub min_width: u32,
    pub min_height: u32,
    /// JPEG quality used when a renderer returns PNG.
    pub jpeg_quality: u8,
    pub renderer: RendererKind,
    /// Program and leading arguments of the external renderer.
    pub command: Vec<String>,
    /// Fall back to a placeholder image when the command renderer fails.
    pub fallback_to_placeholder: bool,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            daily_limit: 10,
            image_size: [4000, 6000],
            landscape_size: [6000, 4000],
            min_width: 1000,
            min_height: 1000,
            jpeg_quality: 95,
            renderer: RendererKind::Placeholder,
            command: Vec::new(),
            fallback_to_placeholder: true,
            timeout_secs: 120,
        }
    }
}

impl GenerationConfig {
    /// Render size for a category: landscape for business and technology.
    pub fn size_for_category(&self, category: &str) -> (u32, u32) {
        let [w, h] = match category {
            "business" | "technology" => self.landscape_size,
            _ => self.image_size,
        };
        (w, h)
    }
}

/// Metadata limits and rights holder information.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetadataConfig {
    pub max_title_len: usize,
    pub max_description_len: usize,
    pub min_tags: usize,
    pub max_tags: usize,
    pub max_tag_len: usize,
    pub creator: String,
    pub company: String,
    pub license: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            max_title_len: 200,
            max_description_len: 2000,
            min_tags: 1,
            max_tags: 50,
            max_tag_len: 64,
            creator: "Professional AI Photography Studio".to_string(),
            company: "AI Stock Photography".to_string(),
            license: "Royalty Free - Commercial Use".to_string(),
        }
    }
}

/// Keyword filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeywordsConfig {
    /// Keywords containing any of these terms are dropped during normalization.
    pub blocked: Vec<String>,
}

impl Default for KeywordsConfig {
    fn default() -> Self {
        Self {
            blocked: [
                "nude", "naked", "sex", "porn", "violence", "blood", "weapon", "drug",
                "alcohol", "cigarette", "politics", "religion",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel per-keyword workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_workers: Option<usize>,
}

/// Resolve the effective worker count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)`, at least 1
pub fn effective_workers(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_workers
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// Retention of old date partitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionConfig {
    pub keep_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { keep_days: 30 }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(PipelineConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `config.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if no `config.toml` exists in the directory.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join("config.toml");
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Load config from `config.toml` in the given directory.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(dir: &Path) -> Result<PipelineConfig, ConfigError> {
    let merged = match load_raw_config(dir)? {
        Some(overlay) => merge_toml(stock_defaults_value(), overlay),
        None => stock_defaults_value(),
    };
    let config: PipelineConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# trend-stock configuration
# =========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys cause an error.

# Root of the date-partitioned output tree (output/<YYYY-MM-DD>/...).
output_root = "output"

# ---------------------------------------------------------------------------
# Image generation
# ---------------------------------------------------------------------------
[generation]
# Maximum keywords per date. Re-runs for the same date only add keywords
# while the partition holds fewer than this.
daily_limit = 10

# Render size [width, height]. Business and technology keywords use the
# landscape size, everything else the portrait size.
image_size = [4000, 6000]
landscape_size = [6000, 4000]

# Rendered images smaller than this are rejected.
min_width = 1000
min_height = 1000

# JPEG quality used when a renderer returns PNG.
jpeg_quality = 95

# "placeholder" draws a solid category-coloured image locally.
# "command" runs an external program: the prompt is appended as the last
# argument and the image bytes (JPEG or PNG) are read from stdout.
renderer = "placeholder"
command = []
fallback_to_placeholder = true
timeout_secs = 120

# ---------------------------------------------------------------------------
# Metadata (platform limits and rights holder)
# ---------------------------------------------------------------------------
[metadata]
max_title_len = 200
max_description_len = 2000
min_tags = 1
max_tags = 50
max_tag_len = 64
creator = "Professional AI Photography Studio"
company = "AI Stock Photography"
license = "Royalty Free - Commercial Use"

# ---------------------------------------------------------------------------
# Keyword filtering
# ---------------------------------------------------------------------------
[keywords]
blocked = ["nude", "naked", "sex", "porn", "violence", "blood", "weapon", "drug", "alcohol", "cigarette", "politics", "religion"]

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel render/compose workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_workers = 4

# ---------------------------------------------------------------------------
# Retention
# ---------------------------------------------------------------------------
[retention]
# `trend-stock prune` removes date partitions older than this many days.
keep_days = 30
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.output_root, PathBuf::from("output"));
        assert_eq!(config.generation.daily_limit, 10);
        assert_eq!(config.generation.image_size, [4000, 6000]);
        assert_eq!(config.metadata.max_tags, 50);
        assert_eq!(config.metadata.max_title_len, 200);
        assert_eq!(config.retention.keep_days, 30);
        assert!(config.keywords.blocked.contains(&"weapon".to_string()));
    }

    #[test]
    fn default_config_is_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn stock_config_toml_parses_to_defaults() {
        let parsed: PipelineConfig = toml::from_str(stock_config_toml()).unwrap();
        let defaults = PipelineConfig::default();
        assert_eq!(parsed.generation.daily_limit, defaults.generation.daily_limit);
        assert_eq!(parsed.metadata.creator, defaults.metadata.creator);
        assert_eq!(parsed.keywords.blocked, defaults.keywords.blocked);
        assert_eq!(parsed.processing.max_workers, None);
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[generation]
daily_limit = 3
"#;
        let config: PipelineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.generation.daily_limit, 3);
        assert_eq!(config.generation.jpeg_quality, 95);
        assert_eq!(config.metadata.max_tags, 50);
    }

    #[test]
    fn size_for_category_uses_landscape_for_business() {
        let g = GenerationConfig::default();
        assert_eq!(g.size_for_category("business"), (6000, 4000));
        assert_eq!(g.size_for_category("technology"), (6000, 4000));
        assert_eq!(g.size_for_category("nature"), (4000, 6000));
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.generation.daily_limit, 10);
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("config.toml"),
            r#"
output_root = "/srv/stock"

[metadata]
creator = "Studio X"

[processing]
max_workers = 2
"#,
        )
        .unwrap();

        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.output_root, PathBuf::from("/srv/stock"));
        assert_eq!(config.metadata.creator, "Studio X");
        assert_eq!(config.processing.max_workers, Some(2));
        // Unspecified values keep defaults
        assert_eq!(config.metadata.max_tags, 50);
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("config.toml"), "not valid toml [[[").unwrap();
        assert!(matches!(load_config(tmp.path()), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn unknown_key_rejected() {
        let result: Result<PipelineConfig, _> = toml::from_str("[generation]\ndaly_limit = 3\n");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("unknown field"));
    }

    #[test]
    fn unknown_section_rejected() {
        let result: Result<PipelineConfig, _> = toml::from_str("[scraping]\ntimeout = 3\n");
        assert!(result.is_err());
    }

    #[test]
    fn renderer_kind_parses_lowercase() {
        let config: PipelineConfig = toml::from_str(
            r#"
[generation]
renderer = "command"
command = ["imagen-cli", "--model", "4.0"]
"#,
        )
        .unwrap();
        assert_eq!(config.generation.renderer, RendererKind::Command);
        config.validate().unwrap();
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn validate_rejects_zero_daily_limit() {
        let mut config = PipelineConfig::default();
        config.generation.daily_limit = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_rejects_size_below_minimum() {
        let mut config = PipelineConfig::default();
        config.generation.image_size = [500, 500];
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("image_size"));
    }

    #[test]
    fn validate_rejects_command_renderer_without_command() {
        let mut config = PipelineConfig::default();
        config.generation.renderer = RendererKind::Command;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_min_tags_above_max() {
        let mut config = PipelineConfig::default();
        config.metadata.min_tags = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_quality_bounds() {
        let mut config = PipelineConfig::default();
        config.generation.jpeg_quality = 100;
        assert!(config.validate().is_ok());
        config.generation.jpeg_quality = 101;
        assert!(config.validate().is_err());
    }

    // =========================================================================
    // merge_toml / effective_workers
    // =========================================================================

    #[test]
    fn merge_toml_table_merge() {
        let base: toml::Value = toml::from_str("[generation]\ndaily_limit = 10\njpeg_quality = 95\n").unwrap();
        let overlay: toml::Value = toml::from_str("[generation]\ndaily_limit = 4\n").unwrap();
        let merged = merge_toml(base, overlay);
        let generation = merged.get("generation").unwrap();
        assert_eq!(generation.get("daily_limit").unwrap().as_integer(), Some(4));
        assert_eq!(generation.get("jpeg_quality").unwrap().as_integer(), Some(95));
    }

    #[test]
    fn merge_toml_arrays_replace() {
        let base: toml::Value = toml::from_str("blocked = [\"a\", \"b\"]").unwrap();
        let overlay: toml::Value = toml::from_str("blocked = [\"c\"]").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged.get("blocked").unwrap().as_array().unwrap().len(), 1);
    }

    #[test]
    fn effective_workers_auto() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(effective_workers(&ProcessingConfig::default()), cores);
    }

    #[test]
    fn effective_workers_clamped() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let config = ProcessingConfig {
            max_workers: Some(99_999),
        };
        assert_eq!(effective_workers(&config), cores);
        let config = ProcessingConfig {
            max_workers: Some(0),
        };
        assert_eq!(effective_workers(&config), 1);
    }
}
