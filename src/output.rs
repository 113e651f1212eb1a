//! CLI output formatting.
//!
//! Output is **keyword-centric**: every line that concerns one keyword
//! leads with it, so a run log reads as an inventory of what happened to
//! each trend. Stage headers group the per-keyword lines.
//!
//! # Output Format
//!
//! ## Run progress
//!
//! ```text
//! Scraping
//!     12 terms from seasonal
//!     10 keywords (3 new)
//! Generating (10 keywords)
//!     forest: 4000x6000 created via imagen-cli
//!     sunrise: reused
//!     storm: FAILED renderer failed: safety filter
//!     9 succeeded, 1 failed
//! Composing (9 keywords)
//!     forest: "Stunning Forest - Nature Stock Photography" (24 tags) created
//! ```
//!
//! ## Run summary
//!
//! ```text
//! Run 2026-10-18: partially completed
//!     Source: seasonal (12 terms)
//!     Keywords: 10 (3 new)
//!     Generating: 8 new, 1 reused, 1 failed
//!         by imagen-cli 6, placeholder 2
//!     Composing: 9 new
//!     Staging: 9 new
//! Failed keywords
//!     generating storm: renderer failed: safety filter
//! ```
//!
//! ## Status
//!
//! ```text
//! Run 2026-10-18
//! 001 forest (nature): image, metadata, bundle
//! 002 storm (nature): nothing yet
//! Last run: partially completed
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::context::{PipelineEvent, StageOutcome};
use crate::pipeline::{RunFailure, RunState, RunStatus, RunSummary};
use chrono::NaiveDate;

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Stage name as a header: "generating" → "Generating".
fn stage_header(stage: RunState) -> String {
    let name = stage.to_string();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => name,
    }
}

/// Truncate text to `max` characters, appending `...` if truncated.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max).collect::<String>())
    }
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

/// One-line tally of a stage outcome, omitting zero counts.
///
/// ```text
/// 8 new, 1 reused, 1 failed
/// ```
fn outcome_tally(outcome: &StageOutcome) -> String {
    let parts: Vec<String> = [
        (outcome.succeeded.len(), "new"),
        (outcome.reused.len(), "reused"),
        (outcome.failed.len(), "failed"),
        (outcome.cancelled.len(), "cancelled"),
        (outcome.removed.len(), "removed"),
    ]
    .into_iter()
    .filter(|(n, _)| *n > 0)
    .map(|(n, label)| format!("{n} {label}"))
    .collect();
    if parts.is_empty() {
        "nothing to do".to_string()
    } else {
        parts.join(", ")
    }
}

// ============================================================================
// Run progress
// ============================================================================

/// Format a single progress event as display lines.
pub fn format_event(event: &PipelineEvent) -> Vec<String> {
    let line = match event {
        PipelineEvent::StageStarted {
            stage: RunState::Scraping,
            ..
        } => stage_header(RunState::Scraping),
        PipelineEvent::StageStarted { stage, candidates } => {
            format!("{} ({})", stage_header(*stage), plural(*candidates, "keyword"))
        }
        PipelineEvent::TrendsFetched { source, terms } => {
            format!("{}{} from {}", indent(1), plural(*terms, "term"), source)
        }
        PipelineEvent::KeywordsSelected { total, added } => {
            format!("{}{} ({} new)", indent(1), plural(*total, "keyword"), added)
        }
        PipelineEvent::ImageRendered {
            keyword,
            backend,
            width,
            height,
            outcome,
        } => format!(
            "{}{}: {}x{} {} via {}",
            indent(1),
            keyword,
            width,
            height,
            outcome,
            backend
        ),
        PipelineEvent::ImageReused { keyword } => format!("{}{}: reused", indent(1), keyword),
        PipelineEvent::MetadataComposed {
            keyword,
            title,
            tags,
            outcome,
        } => format!(
            "{}{}: \"{}\" ({}) {}",
            indent(1),
            keyword,
            truncate(title, 60),
            plural(*tags, "tag"),
            outcome
        ),
        PipelineEvent::BundleStaged { keyword, outcome } => {
            format!("{}{}: {}", indent(1), keyword, outcome)
        }
        PipelineEvent::BundleRemoved { keyword, reason } => {
            format!("{}{}: removed ({})", indent(1), keyword, reason)
        }
        PipelineEvent::KeywordFailed {
            keyword, reason, ..
        } => format!("{}{}: FAILED {}", indent(1), keyword, reason),
        PipelineEvent::StageFinished {
            succeeded, failed, ..
        } => {
            if *failed == 0 {
                format!("{}{} succeeded", indent(1), succeeded)
            } else {
                format!("{}{} succeeded, {} failed", indent(1), succeeded, failed)
            }
        }
    };
    vec![line]
}

// ============================================================================
// Run summary
// ============================================================================

/// Format the final report of a run.
pub fn format_summary(summary: &RunSummary) -> Vec<String> {
    let mut lines = vec![format!("Run {}: {}", summary.date, summary.state)];

    if let Some(source) = &summary.trend_source {
        lines.push(format!(
            "{}Source: {} ({})",
            indent(1),
            source,
            plural(summary.raw_terms, "term")
        ));
    }
    if !summary.keywords.is_empty() {
        lines.push(format!(
            "{}Keywords: {} ({} new)",
            indent(1),
            summary.keywords.len(),
            summary.keywords_added
        ));
    }
    for (stage, outcome) in summary.stages() {
        if outcome == &StageOutcome::default() {
            continue;
        }
        lines.push(format!(
            "{}{}: {}",
            indent(1),
            stage_header(stage),
            outcome_tally(outcome)
        ));
        if !outcome.rendered_by.is_empty() {
            let backends: Vec<String> = outcome
                .rendered_by
                .iter()
                .map(|(backend, n)| format!("{backend} {n}"))
                .collect();
            lines.push(format!("{}by {}", indent(2), backends.join(", ")));
        }
    }
    if let Some(error) = &summary.error {
        lines.push(format!("{}Error: {}", indent(1), error));
    }

    let failed = summary.failed_keywords();
    if !failed.is_empty() {
        lines.push("Failed keywords".to_string());
        for (stage, keyword, reason) in failed {
            lines.push(format!("{}{} {}: {}", indent(1), stage, keyword, reason));
        }
    }
    lines
}

/// Print a run summary to stdout.
pub fn print_summary(summary: &RunSummary) {
    for line in format_summary(summary) {
        println!("{}", line);
    }
}

/// Format an aborted run: the summary, which already names the error.
pub fn format_failure(failure: &RunFailure) -> Vec<String> {
    format_summary(&failure.summary)
}

/// Print an aborted run to stdout.
pub fn print_failure(failure: &RunFailure) {
    for line in format_failure(failure) {
        println!("{}", line);
    }
}

// ============================================================================
// Status
// ============================================================================

/// Format the stored state of one run.
pub fn format_status(status: &RunStatus) -> Vec<String> {
    let mut lines = vec![format!("Run {}", status.date)];
    if status.keywords.is_empty() {
        lines.push(format!("{}no keywords", indent(1)));
    }
    for (i, entry) in status.keywords.iter().enumerate() {
        let present: Vec<&str> = [
            (entry.image, "image"),
            (entry.metadata, "metadata"),
            (entry.bundle, "bundle"),
        ]
        .into_iter()
        .filter_map(|(has, label)| has.then_some(label))
        .collect();
        let artifacts = if present.is_empty() {
            "nothing yet".to_string()
        } else {
            present.join(", ")
        };
        lines.push(format!(
            "{} {} ({}): {}",
            format_index(i + 1),
            entry.keyword,
            entry.category,
            artifacts
        ));
    }
    if let Some(summary) = &status.last_summary {
        lines.push(format!("Last run: {}", summary.state));
    }
    lines
}

/// Print run status to stdout.
pub fn print_status(status: &RunStatus) {
    for line in format_status(status) {
        println!("{}", line);
    }
}

// ============================================================================
// Prune
// ============================================================================

/// Format the list of pruned runs.
pub fn format_prune(removed: &[NaiveDate]) -> Vec<String> {
    if removed.is_empty() {
        return vec!["Nothing to prune".to_string()];
    }
    let mut lines = vec![format!("Pruned {}", plural(removed.len(), "run"))];
    lines.extend(removed.iter().map(|d| format!("{}{}", indent(1), d)));
    lines
}

/// Print pruned runs to stdout.
pub fn print_prune(removed: &[NaiveDate]) {
    for line in format_prune(removed) {
        println!("{}", line);
    }
}
