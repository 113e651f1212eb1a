//! Upload staging.
//!
//! A bundle is the pair `upload_ready/<slug>.jpg` + `upload_ready/<slug>.json`.
//! The JSON manifest is written last and is what an uploader looks for; it
//! records the hashes of both halves it was built from:
//!
//! ```json
//! { "keyword": "forest", "image_file": "forest.jpg",
//!   "image_hash": "…", "metadata_hash": "…", "title": "…", "tags": [ … ] }
//! ```
//!
//! A bundle is (re)built when either hash differs from the current image
//! or metadata, and removed when its keyword no longer has a valid,
//! current pair. No network I/O happens here.

use crate::context::{PipelineEvent, RunContext, StageOutcome};
use crate::metadata::MetadataRecord;
use crate::pipeline::{PipelineError, RunState};
use crate::store::{ArtifactKind, StoreError, WriteOutcome, hash_bytes};
use crate::types::Keyword;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const STAGE: RunState = RunState::Staging;

/// Manifest stored as `upload_ready/<slug>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub keyword: Keyword,
    /// File name of the image next to this manifest.
    pub image_file: String,
    pub image_hash: String,
    pub metadata_hash: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category: String,
    pub creator: String,
    pub copyright: String,
    pub license: String,
    pub width: u32,
    pub height: u32,
}

impl BundleManifest {
    fn new(record: MetadataRecord, image_hash: String, metadata_hash: String) -> Self {
        Self {
            image_file: format!("{}.jpg", record.keyword.slug()),
            keyword: record.keyword,
            image_hash,
            metadata_hash,
            title: record.title,
            description: record.description,
            tags: record.tags,
            category: record.category,
            creator: record.creator,
            copyright: record.copyright,
            license: record.license,
            width: record.width,
            height: record.height,
        }
    }
}

/// Why a keyword cannot be staged.
enum Ineligible {
    Missing(ArtifactKind),
    Invalid(String),
}

impl Ineligible {
    fn reason(&self) -> String {
        match self {
            Ineligible::Missing(kind) => format!("{kind} missing"),
            Ineligible::Invalid(reason) => reason.clone(),
        }
    }
}

/// Pairs images with their metadata in `upload_ready/`.
#[derive(Debug, Default)]
pub struct UploadStager;

impl UploadStager {
    pub fn new() -> Self {
        Self
    }

    /// Stage every candidate and sweep bundles that are no longer valid.
    ///
    /// Keywords outside `candidates` that still hold a bundle are checked
    /// too: a current pair is kept, anything else is removed.
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

        for keyword in candidates {
            if ctx.cancel.is_cancelled() {
                outcome.cancelled.insert(keyword.clone());
                continue;
            }
            match self.stage_one(ctx, keyword)? {
                Ok(WriteOutcome::Unchanged) => {
                    outcome.reused.insert(keyword.clone());
                }
                Ok(_) => {
                    outcome.succeeded.insert(keyword.clone());
                }
                Err(ineligible) => {
                    let reason = ineligible.reason();
                    if self.remove_bundle(ctx, keyword, &reason)? {
                        outcome.removed.insert(keyword.clone());
                    }
                    ctx.keyword_failed(STAGE, outcome, keyword, reason);
                }
            }
        }

        if !ctx.cancel.is_cancelled() {
            self.sweep(ctx, candidates, outcome)?;
        }

        ctx.emit(PipelineEvent::StageFinished {
            stage: STAGE,
            succeeded: outcome.available().len(),
            failed: outcome.failed.len(),
        });

        if !outcome.cancelled.is_empty() {
            return Err(PipelineError::Cancelled { stage: STAGE });
        }
        if outcome.available().is_empty() && !candidates.is_empty() {
            return Err(PipelineError::NoArtifactsProduced { stage: STAGE });
        }
        Ok(())
    }

    /// Check bundles of keywords that were not candidates in this run.
    fn sweep(
        &self,
        ctx: &RunContext,
        candidates: &BTreeSet<Keyword>,
        outcome: &mut StageOutcome,
    ) -> Result<(), StoreError> {
        let staged: BTreeSet<Keyword> = ctx
            .store
            .list_completed(ctx.date, ArtifactKind::Bundle)
            .chain(ctx.store.list_completed(ctx.date, ArtifactKind::BundleImage))
            .filter(|k| !candidates.contains(k))
            .collect();

        for keyword in staged {
            let current = match self.eligible(ctx, &keyword)? {
                Ok(manifest) => self.is_current(ctx, &keyword, &manifest)?,
                Err(_) => false,
            };
            if !current && self.remove_bundle(ctx, &keyword, "pair no longer current")? {
                outcome.removed.insert(keyword);
            }
        }
        Ok(())
    }

    /// Build the manifest for a keyword if both halves are present, valid
    /// and consistent with each other.
    fn eligible(
        &self,
        ctx: &RunContext,
        keyword: &Keyword,
    ) -> Result<Result<BundleManifest, Ineligible>, StoreError> {
        let image = match read_optional(ctx, keyword, ArtifactKind::Image)? {
            Some(bytes) => bytes,
            None => return Ok(Err(Ineligible::Missing(ArtifactKind::Image))),
        };
        let metadata = match read_optional(ctx, keyword, ArtifactKind::Metadata)? {
            Some(bytes) => bytes,
            None => return Ok(Err(Ineligible::Missing(ArtifactKind::Metadata))),
        };

        let record: MetadataRecord = match serde_json::from_slice(&metadata) {
            Ok(record) => record,
            Err(e) => return Ok(Err(Ineligible::Invalid(format!("unreadable metadata: {e}")))),
        };
        if let Err(e) = record.validate(&ctx.config.metadata) {
            return Ok(Err(Ineligible::Invalid(format!("invalid metadata: {e}"))));
        }
        let image_hash = hash_bytes(&image);
        if record.image_hash != image_hash {
            return Ok(Err(Ineligible::Invalid(
                "metadata describes a different image".to_string(),
            )));
        }
        Ok(Ok(BundleManifest::new(record, image_hash, hash_bytes(&metadata))))
    }

    /// True when the stored bundle was built from exactly these halves.
    fn is_current(
        &self,
        ctx: &RunContext,
        keyword: &Keyword,
        manifest: &BundleManifest,
    ) -> Result<bool, StoreError> {
        let Some(stored) = read_optional(ctx, keyword, ArtifactKind::Bundle)? else {
            return Ok(false);
        };
        let Ok(stored) = serde_json::from_slice::<BundleManifest>(&stored) else {
            return Ok(false);
        };
        let image_current = ctx
            .store
            .record(ctx.date, keyword, ArtifactKind::BundleImage)
            .is_some_and(|r| r.hash == manifest.image_hash);
        Ok(image_current && stored == *manifest)
    }

    fn stage_one(
        &self,
        ctx: &RunContext,
        keyword: &Keyword,
    ) -> Result<Result<WriteOutcome, Ineligible>, StoreError> {
        let manifest = match self.eligible(ctx, keyword)? {
            Ok(manifest) => manifest,
            Err(ineligible) => return Ok(Err(ineligible)),
        };
        if self.is_current(ctx, keyword, &manifest)? {
            ctx.emit(PipelineEvent::BundleStaged {
                keyword: keyword.clone(),
                outcome: WriteOutcome::Unchanged,
            });
            return Ok(Ok(WriteOutcome::Unchanged));
        }

        // Drop the old manifest first so an uploader never sees it next to
        // the new image.
        ctx.store
            .remove_artifact(ctx.date, keyword, ArtifactKind::Bundle)?;
        let image = ctx
            .store
            .read_artifact(ctx.date, keyword, ArtifactKind::Image)?;
        ctx.store
            .write_artifact(ctx.date, keyword, ArtifactKind::BundleImage, &image)?;
        let json = serde_json::to_vec_pretty(&manifest).map_err(|source| StoreError::Json {
            path: ctx.store.artifact_path(ctx.date, keyword, ArtifactKind::Bundle),
            source,
        })?;
        let outcome = ctx
            .store
            .write_artifact(ctx.date, keyword, ArtifactKind::Bundle, &json)?;

        tracing::info!(%keyword, %outcome, "bundle staged");
        ctx.log(keyword, &format!("bundle {outcome}"));
        ctx.emit(PipelineEvent::BundleStaged {
            keyword: keyword.clone(),
            outcome,
        });
        Ok(Ok(outcome))
    }

    /// Remove both bundle files. Returns whether anything existed.
    fn remove_bundle(
        &self,
        ctx: &RunContext,
        keyword: &Keyword,
        reason: &str,
    ) -> Result<bool, StoreError> {
        let manifest = ctx
            .store
            .remove_artifact(ctx.date, keyword, ArtifactKind::Bundle)?;
        let image = ctx
            .store
            .remove_artifact(ctx.date, keyword, ArtifactKind::BundleImage)?;
        let removed = manifest || image;
        if removed {
            tracing::info!(%keyword, %reason, "bundle removed");
            ctx.log(keyword, &format!("bundle removed: {reason}"));
            ctx.emit(PipelineEvent::BundleRemoved {
                keyword: keyword.clone(),
                reason: reason.to_string(),
            });
        }
        Ok(removed)
    }
}

fn read_optional(
    ctx: &RunContext,
    keyword: &Keyword,
    kind: ArtifactKind,
) -> Result<Option<Vec<u8>>, StoreError> {
    match ctx.store.read_artifact(ctx.date, keyword, kind) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(StoreError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}
