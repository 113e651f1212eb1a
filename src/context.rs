//! Run-scoped context shared by every stage.
//!
//! A [`RunContext`] carries what a stage needs beyond its inputs: the run
//! date, configuration, the artifact store, the event sink, the
//! cancellation token and the worker pool. Nothing here is global; two
//! runs in one process get independent contexts.
//!
//! Progress is reported as [`PipelineEvent`]s over an optional channel.
//! The CLI prints them from a dedicated thread; library users may pass no
//! sender at all. Diagnostics go through `tracing` either way.

use crate::config::PipelineConfig;
use crate::pipeline::RunState;
use crate::store::{ArtifactStore, WriteOutcome};
use crate::types::Keyword;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;

/// Progress event emitted while a run executes.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StageStarted {
        stage: RunState,
        candidates: usize,
    },
    TrendsFetched {
        source: String,
        terms: usize,
    },
    KeywordsSelected {
        total: usize,
        added: usize,
    },
    ImageRendered {
        keyword: Keyword,
        backend: String,
        width: u32,
        height: u32,
        outcome: WriteOutcome,
    },
    ImageReused {
        keyword: Keyword,
    },
    MetadataComposed {
        keyword: Keyword,
        title: String,
        tags: usize,
        outcome: WriteOutcome,
    },
    BundleStaged {
        keyword: Keyword,
        outcome: WriteOutcome,
    },
    BundleRemoved {
        keyword: Keyword,
        reason: String,
    },
    KeywordFailed {
        stage: RunState,
        keyword: Keyword,
        reason: String,
    },
    StageFinished {
        stage: RunState,
        succeeded: usize,
        failed: usize,
    },
}

/// Optional event channel. Sending never fails the run: a closed
/// receiver just means nobody is listening any more.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<Sender<PipelineEvent>>,
}

impl EventSink {
    pub fn new(tx: Sender<PipelineEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            tx.send(event).ok();
        }
    }
}

/// Cooperative cancellation flag, cheap to clone and share with a signal
/// handler. Stages check it before each work item and between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-keyword result of one stage.
///
/// `succeeded` holds keywords whose artifact was written (created or
/// revised) in this run, `reused` those whose artifact was already current.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub succeeded: BTreeSet<Keyword>,
    pub reused: BTreeSet<Keyword>,
    pub failed: BTreeMap<Keyword, String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub cancelled: BTreeSet<Keyword>,
    /// Bundles deleted because their pair was no longer valid.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub removed: BTreeSet<Keyword>,
    /// Images written in this run, counted by the backend that rendered
    /// them. Only the generation stage fills this.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rendered_by: BTreeMap<String, usize>,
}

impl StageOutcome {
    /// Keywords holding a current artifact after the stage: the next
    /// stage's candidate set.
    pub fn available(&self) -> BTreeSet<Keyword> {
        self.succeeded.union(&self.reused).cloned().collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty()
    }
}

/// Everything a stage needs besides its candidate set.
pub struct RunContext<'a> {
    pub date: NaiveDate,
    pub config: &'a PipelineConfig,
    pub store: &'a ArtifactStore,
    pub events: EventSink,
    pub cancel: CancelToken,
    pool: rayon::ThreadPool,
}

impl<'a> RunContext<'a> {
    /// Build a context with a dedicated worker pool of `workers` threads.
    pub fn new(
        date: NaiveDate,
        config: &'a PipelineConfig,
        store: &'a ArtifactStore,
        events: EventSink,
        cancel: CancelToken,
        workers: usize,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("trend-stock-worker-{i}"))
            .build()?;
        Ok(Self {
            date,
            config,
            store,
            events,
            cancel,
            pool,
        })
    }

    /// Run `op` inside this run's worker pool so `par_iter` stays bounded.
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        self.pool.install(op)
    }

    pub fn emit(&self, event: PipelineEvent) {
        self.events.emit(event);
    }

    /// Append to the keyword's log. Log failures are reported but never
    /// abort the stage.
    pub fn log(&self, keyword: &Keyword, message: &str) {
        if let Err(e) = self.store.append_log(self.date, keyword, message) {
            tracing::warn!(%keyword, error = %e, "cannot write keyword log");
        }
    }

    /// Record a per-keyword failure in the outcome, the log, the event
    /// stream and tracing.
    pub fn keyword_failed(
        &self,
        stage: RunState,
        outcome: &mut StageOutcome,
        keyword: &Keyword,
        reason: String,
    ) {
        tracing::warn!(%keyword, %stage, %reason, "keyword failed");
        self.log(keyword, &format!("{stage} failed: {reason}"));
        self.emit(PipelineEvent::KeywordFailed {
            stage,
            keyword: keyword.clone(),
            reason: reason.clone(),
        });
        outcome.failed.insert(keyword.clone(), reason);
    }
}
