//! Run orchestration.
//!
//! A run drives one date partition through a fixed sequence of stages:
//!
//! ```text
//! Scraping → Normalizing → Generating → Composing → Staging → Completed
//!     │            │             │            │          │
//!     └──── Failed ┘             └──── PartiallyCompleted ┘
//! ```
//!
//! - Stages run strictly in order; a stage starts only once the previous
//!   one has finalized its candidate set.
//! - A fatal error while scraping or normalizing means there is no usable
//!   keyword set at all: the run ends `Failed` and no directory skeleton
//!   is created.
//! - A fatal error later (storage failure, no surviving keywords,
//!   cancellation) ends the run `PartiallyCompleted`; everything persisted
//!   so far stays on disk.
//! - A run that finished every stage but lost keywords along the way also
//!   ends `PartiallyCompleted`.
//!
//! Nothing is retried automatically. Re-running the same date is safe and
//! cheap: every stage skips work whose artifact is already current.

use crate::config::{PipelineConfig, effective_workers};
use crate::context::{CancelToken, EventSink, PipelineEvent, RunContext, StageOutcome};
use crate::generate::GenerationCoordinator;
use crate::keywords::{KeywordSet, NormalizeError, normalize_trends};
use crate::metadata::MetadataComposer;
use crate::render::Renderer;
use crate::stage::UploadStager;
use crate::store::{ArtifactKind, ArtifactStore, RunDocument, StoreError};
use crate::trends::{SourceError, TrendSnapshot, TrendSource};
use crate::types::{Keyword, KeywordEntry};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stage-level error. Aborts the run; per-keyword errors never get here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    SourceUnavailable(#[from] SourceError),
    #[error(transparent)]
    InvalidInput(#[from] NormalizeError),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("no keyword survived the {stage} stage")]
    NoArtifactsProduced { stage: RunState },
    #[error("run cancelled during {stage}")]
    Cancelled { stage: RunState },
    #[error("cannot start worker pool: {0}")]
    WorkerPool(String),
}

/// Where a run is, or where it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Scraping,
    Normalizing,
    Generating,
    Composing,
    Staging,
    Completed,
    PartiallyCompleted,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::PartiallyCompleted | RunState::Failed
        )
    }

    /// Legal transitions of the run state machine.
    pub fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Scraping, Normalizing)
                | (Normalizing, Generating)
                | (Generating, Composing)
                | (Composing, Staging)
                | (Staging, Completed)
                | (Scraping | Normalizing, Failed)
                | (Generating | Composing | Staging, PartiallyCompleted)
        )
    }

    /// Terminal state reached when a fatal error hits this stage.
    pub fn failure_state(self) -> RunState {
        match self {
            RunState::Scraping | RunState::Normalizing => RunState::Failed,
            _ => RunState::PartiallyCompleted,
        }
    }

    /// Process exit code for a terminal state: 0 completed, 2 partial,
    /// 1 failed.
    pub fn exit_code(self) -> i32 {
        match self {
            RunState::Completed => 0,
            RunState::PartiallyCompleted => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Scraping => "scraping",
            RunState::Normalizing => "normalizing",
            RunState::Generating => "generating",
            RunState::Composing => "composing",
            RunState::Staging => "staging",
            RunState::Completed => "completed",
            RunState::PartiallyCompleted => "partially completed",
            RunState::Failed => "failed",
        })
    }
}

/// Structured result of a run, also written to `logs/summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub date: NaiveDate,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend_source: Option<String>,
    pub raw_terms: usize,
    /// The run's full keyword set after merging with earlier runs.
    pub keywords: Vec<Keyword>,
    pub keywords_added: usize,
    pub generation: StageOutcome,
    pub composition: StageOutcome,
    pub staging: StageOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            state: RunState::Scraping,
            started_at: Utc::now(),
            finished_at: None,
            trend_source: None,
            raw_terms: 0,
            keywords: Vec::new(),
            keywords_added: 0,
            generation: StageOutcome::default(),
            composition: StageOutcome::default(),
            staging: StageOutcome::default(),
            error: None,
        }
    }

    /// Per-stage outcomes in run order.
    pub fn stages(&self) -> [(RunState, &StageOutcome); 3] {
        [
            (RunState::Generating, &self.generation),
            (RunState::Composing, &self.composition),
            (RunState::Staging, &self.staging),
        ]
    }

    /// Every keyword that needs another attempt, with the stage and reason.
    pub fn failed_keywords(&self) -> Vec<(RunState, &Keyword, &str)> {
        self.stages()
            .into_iter()
            .flat_map(|(stage, outcome)| {
                outcome
                    .failed
                    .iter()
                    .map(move |(k, reason)| (stage, k, reason.as_str()))
            })
            .collect()
    }

    pub fn exit_code(&self) -> i32 {
        self.state.exit_code()
    }
}

/// A run that hit a stage-level error.
#[derive(Error, Debug)]
#[error("run {date} failed during {stage}: {error}")]
pub struct RunFailure {
    pub date: NaiveDate,
    /// Stage that was executing when the error occurred.
    pub stage: RunState,
    #[source]
    pub error: PipelineError,
    /// Partial results up to the failure; `summary.state` is terminal.
    pub summary: Box<RunSummary>,
}

impl RunFailure {
    pub fn exit_code(&self) -> i32 {
        self.summary.exit_code()
    }
}

/// Top-level sequencer for one run.
pub struct PipelineRunner<'a> {
    config: &'a PipelineConfig,
    store: &'a ArtifactStore,
    source: &'a dyn TrendSource,
    renderer: &'a dyn Renderer,
    events: EventSink,
    cancel: CancelToken,
    force: bool,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        store: &'a ArtifactStore,
        source: &'a dyn TrendSource,
        renderer: &'a dyn Renderer,
    ) -> Self {
        Self {
            config,
            store,
            source,
            renderer,
            events: EventSink::none(),
            cancel: CancelToken::new(),
            force: false,
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Re-render images that already exist.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Execute every stage for `date`.
    pub fn run(&self, date: NaiveDate) -> Result<RunSummary, RunFailure> {
        tracing::info!(%date, "run started");
        let mut summary = RunSummary::new(date);
        let mut state = RunState::Scraping;

        let result = self.execute(date, &mut state, &mut summary);
        summary.finished_at = Some(Utc::now());

        match result {
            Ok(()) => {
                let clean = summary.stages().iter().all(|(_, o)| o.is_clean());
                let terminal = if clean {
                    RunState::Completed
                } else {
                    RunState::PartiallyCompleted
                };
                debug_assert!(state.can_advance_to(terminal));
                summary.state = terminal;
                self.write_summary(&summary);
                tracing::info!(%date, state = %terminal, "run finished");
                Ok(summary)
            }
            Err(error) => {
                let terminal = state.failure_state();
                summary.state = terminal;
                summary.error = Some(error.to_string());
                self.write_summary(&summary);
                tracing::error!(%date, stage = %state, %error, state = %terminal, "run aborted");
                Err(RunFailure {
                    date,
                    stage: state,
                    error,
                    summary: Box::new(summary),
                })
            }
        }
    }

    fn execute(
        &self,
        date: NaiveDate,
        state: &mut RunState,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        self.events.emit(PipelineEvent::StageStarted {
            stage: RunState::Scraping,
            candidates: 0,
        });
        let items = self.source.fetch(date)?;
        summary.trend_source = Some(self.source.name().to_string());
        summary.raw_terms = items.len();
        self.events.emit(PipelineEvent::TrendsFetched {
            source: self.source.name().to_string(),
            terms: items.len(),
        });

        self.advance(state, RunState::Normalizing)?;
        let fresh = normalize_trends(&items, &self.config.keywords)?;
        let keywords = self.select_keywords(date, fresh, items, summary)?;

        self.advance(state, RunState::Generating)?;
        let ctx = RunContext::new(
            date,
            self.config,
            self.store,
            self.events.clone(),
            self.cancel.clone(),
            effective_workers(&self.config.processing),
        )
        .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;
        GenerationCoordinator::new(self.renderer)
            .force(self.force)
            .run(&ctx, &keywords, &mut summary.generation)?;

        self.advance(state, RunState::Composing)?;
        MetadataComposer::new(&keywords).run(
            &ctx,
            &summary.generation.available(),
            &mut summary.composition,
        )?;

        self.advance(state, RunState::Staging)?;
        UploadStager::new().run(
            &ctx,
            &summary.composition.available(),
            &mut summary.staging,
        )?;
        Ok(())
    }

    /// Create the run space and merge the fresh keywords into the set
    /// persisted by earlier runs for the same date.
    fn select_keywords(
        &self,
        date: NaiveDate,
        fresh: KeywordSet,
        items: Vec<crate::types::TrendItem>,
        summary: &mut RunSummary,
    ) -> Result<KeywordSet, PipelineError> {
        self.store.ensure_run_space(date)?;

        let mut keywords = self
            .store
            .read_document::<Vec<KeywordEntry>>(date, RunDocument::Keywords)?
            .map(KeywordSet::from_entries)
            .unwrap_or_default();
        let added = keywords.merge(fresh, self.config.generation.daily_limit, date.month());
        self.store
            .write_document(date, RunDocument::Keywords, keywords.entries())?;

        let snapshot = TrendSnapshot::new(date, self.source.name(), items);
        let snapshot = match self
            .store
            .read_document::<TrendSnapshot>(date, RunDocument::Trends)
        {
            Ok(Some(mut existing)) => {
                existing.merge(snapshot);
                existing
            }
            Ok(None) => snapshot,
            Err(StoreError::Json { path, source }) => {
                tracing::warn!(path = %path.display(), error = %source, "replacing unreadable trend snapshot");
                snapshot
            }
            Err(e) => return Err(e.into()),
        };
        self.store
            .write_document(date, RunDocument::Trends, &snapshot)?;

        summary.keywords = keywords.keywords().cloned().collect();
        summary.keywords_added = added;
        tracing::info!(%date, total = keywords.len(), added, "keywords selected");
        self.events.emit(PipelineEvent::KeywordsSelected {
            total: keywords.len(),
            added,
        });
        Ok(keywords)
    }

    /// Move to the next stage, honouring cancellation between stages.
    ///
    /// Cancellation is checked after the transition and charged to the
    /// stage that did not start. Once keywords are on disk that makes the
    /// run partially completed, not failed.
    fn advance(&self, state: &mut RunState, next: RunState) -> Result<(), PipelineError> {
        debug_assert!(state.can_advance_to(next), "{state} -> {next}");
        tracing::debug!(from = %state, to = %next, "stage transition");
        *state = next;
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled { stage: next });
        }
        Ok(())
    }

    fn write_summary(&self, summary: &RunSummary) {
        if !self.store.run_space_exists(summary.date) {
            return;
        }
        if let Err(e) = self
            .store
            .write_document(summary.date, RunDocument::Summary, summary)
        {
            tracing::warn!(error = %e, "cannot write run summary");
        }
    }
}

/// Artifact presence for one keyword of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordStatus {
    pub keyword: Keyword,
    pub category: String,
    pub image: bool,
    pub metadata: bool,
    pub bundle: bool,
}

/// Stored state of a run: keyword set, artifact presence and the last
/// summary, as far as they exist.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatus {
    pub date: NaiveDate,
    pub keywords: Vec<KeywordStatus>,
    pub last_summary: Option<RunSummary>,
}

/// Inspect a run without modifying it. `Ok(None)` when the date has no
/// run directory.
pub fn run_status(store: &ArtifactStore, date: NaiveDate) -> Result<Option<RunStatus>, StoreError> {
    if !store.run_space_exists(date) {
        return Ok(None);
    }
    let entries = store
        .read_document::<Vec<KeywordEntry>>(date, RunDocument::Keywords)?
        .unwrap_or_default();
    let keywords = entries
        .into_iter()
        .map(|entry| KeywordStatus {
            image: store.exists(date, &entry.keyword, ArtifactKind::Image),
            metadata: store.exists(date, &entry.keyword, ArtifactKind::Metadata),
            bundle: store.exists(date, &entry.keyword, ArtifactKind::Bundle)
                && store.exists(date, &entry.keyword, ArtifactKind::BundleImage),
            category: entry.context.category,
            keyword: entry.keyword,
        })
        .collect();
    let last_summary = store
        .read_document::<RunSummary>(date, RunDocument::Summary)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "ignoring unreadable run summary");
            None
        });
    Ok(Some(RunStatus {
        date,
        keywords,
        last_summary,
    }))
}
