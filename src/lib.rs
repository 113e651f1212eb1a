//! # Trend Stock
//!
//! A daily pipeline that turns trending search terms into stock-image upload
//! bundles. Every artifact lives in a date-partitioned tree on disk, keyed by
//! run date and keyword, so a run can be interrupted and resumed at any point.
//!
//! # Architecture: Five-Stage Pipeline
//!
//! ```text
//! 1. Scrape      TrendSource        →  trends_data.json     (raw trending terms)
//! 2. Normalize   raw terms          →  keywords.json        (clean, deduplicated, capped)
//! 3. Generate    keywords           →  images/<slug>.jpg    (one image per keyword)
//! 4. Compose     images + keywords  →  metadata/<slug>.json (title, description, tags)
//! 5. Stage       image + metadata   →  upload_ready/        (validated bundle pairs)
//! ```
//!
//! Each stage reads only what earlier stages persisted and writes only its own
//! artifact kind. A keyword that fails one stage is recorded and skipped by the
//! stages after it; the rest of the run carries on.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`pipeline`] | Run state machine, stage sequencing, summaries, status |
//! | [`trends`] | Trend sources: scraper snapshot file, seasonal baseline, fallback chain |
//! | [`keywords`] | Normalization, content filter, categorization, keyword sets |
//! | [`generate`] | Stage 3: parallel image generation with resume |
//! | [`render`] | Renderer backends, prompts, image validation |
//! | [`metadata`] | Stage 4: deterministic metadata composition and validation |
//! | [`stage`] | Stage 5: upload bundle pairing and cleanup |
//! | [`store`] | Date-partitioned, idempotent artifact store |
//! | [`context`] | Run-scoped context: events, cancellation, worker pool |
//! | [`config`] | `config.toml` loading, merging with stock defaults, validation |
//! | [`types`] | Shared value types (`Keyword`, `TrendItem`, `KeywordEntry`) |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Idempotent Writes
//!
//! The store hashes every artifact it writes. Writing identical bytes again is
//! a no-op reported as `Unchanged`; different bytes bump a revision counter.
//! Stages therefore never need to decide whether something "really" changed:
//! metadata is always recomposed and the store tells the difference.
//!
//! ## No Hidden Globals
//!
//! Configuration, the store, the event channel, the cancellation flag and the
//! worker pool all travel in a [`context::RunContext`]. Two runs in one process
//! (or two tests in one binary) never share state.
//!
//! ## Stage-Level vs Keyword-Level Errors
//!
//! Keyword-level problems (renderer refused a prompt, image too small, metadata
//! out of bounds) are recorded in the stage outcome and the keyword's log.
//! Only storage failures, an unusable trend source, or a stage that loses every
//! keyword abort the run. See [`pipeline`] for how that maps to terminal states
//! and exit codes.

pub mod config;
pub mod context;
pub mod generate;
pub mod keywords;
pub mod metadata;
pub mod output;
pub mod pipeline;
pub mod render;
pub mod stage;
pub mod store;
pub mod trends;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
