//! Image generation stage.
//!
//! For every keyword in the run that has no image yet, build a prompt, ask
//! the [`Renderer`] for bytes, validate them and persist through the store.
//! Keywords that already hold an image are reused, which is what makes a
//! re-run after a crash cheap: only the missing keywords are rendered.
//!
//! Per-keyword failures (renderer errors, timeouts, invalid images) are
//! recorded and never abort the stage. Storage errors do: without durable
//! writes no progress can be trusted.

use crate::context::{PipelineEvent, RunContext, StageOutcome};
use crate::keywords::KeywordSet;
use crate::pipeline::{PipelineError, RunState};
use crate::render::{RenderRequest, Renderer, build_prompt, prepare_image};
use crate::store::{ArtifactKind, StoreError, WriteOutcome};
use crate::types::{Keyword, KeywordEntry};
use rayon::prelude::*;

const STAGE: RunState = RunState::Generating;

enum ItemResult {
    Rendered(WriteOutcome, String),
    Failed(String),
    Cancelled,
}

/// Drives one renderer over a run's keyword set.
pub struct GenerationCoordinator<'r> {
    renderer: &'r dyn Renderer,
    force: bool,
}

impl<'r> GenerationCoordinator<'r> {
    pub fn new(renderer: &'r dyn Renderer) -> Self {
        Self {
            renderer,
            force: false,
        }
    }

    /// Re-render keywords that already have an image. Identical output is
    /// still a no-op in the store.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Generate missing images, filling `outcome` as keywords finish.
    ///
    /// Fails with [`PipelineError::NoArtifactsProduced`] when no keyword
    /// ends up with an image.
    pub fn run(
        &self,
        ctx: &RunContext,
        keywords: &KeywordSet,
        outcome: &mut StageOutcome,
    ) -> Result<(), PipelineError> {
        let (existing, pending): (Vec<&KeywordEntry>, Vec<&KeywordEntry>) = keywords
            .entries()
            .iter()
            .partition(|entry| {
                !self.force && ctx.store.exists(ctx.date, &entry.keyword, ArtifactKind::Image)
            });

        ctx.emit(PipelineEvent::StageStarted {
            stage: STAGE,
            candidates: pending.len(),
        });
        for entry in existing {
            tracing::debug!(keyword = %entry.keyword, "image already present");
            ctx.emit(PipelineEvent::ImageReused {
                keyword: entry.keyword.clone(),
            });
            outcome.reused.insert(entry.keyword.clone());
        }

        let results: Vec<(Keyword, Result<ItemResult, StoreError>)> = ctx.install(|| {
            pending
                .par_iter()
                .map(|entry| (entry.keyword.clone(), self.generate_one(ctx, entry)))
                .collect()
        });

        let mut storage_error = None;
        for (keyword, result) in results {
            match result {
                Ok(ItemResult::Rendered(WriteOutcome::Unchanged, _)) => {
                    outcome.reused.insert(keyword);
                }
                Ok(ItemResult::Rendered(_, backend)) => {
                    *outcome.rendered_by.entry(backend).or_default() += 1;
                    outcome.succeeded.insert(keyword);
                }
                Ok(ItemResult::Failed(reason)) => {
                    ctx.keyword_failed(STAGE, outcome, &keyword, reason);
                }
                Ok(ItemResult::Cancelled) => {
                    outcome.cancelled.insert(keyword);
                }
                Err(e) => {
                    tracing::error!(%keyword, error = %e, "storage failure during generation");
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

    fn generate_one(
        &self,
        ctx: &RunContext,
        entry: &KeywordEntry,
    ) -> Result<ItemResult, StoreError> {
        if ctx.cancel.is_cancelled() {
            return Ok(ItemResult::Cancelled);
        }

        let keyword = &entry.keyword;
        let category = entry.context.category.clone();
        let (width, height) = ctx.config.generation.size_for_category(&category);
        let request = RenderRequest {
            keyword: keyword.clone(),
            prompt: build_prompt(keyword.as_str(), &category, entry.context.popularity),
            category,
            width,
            height,
        };
        let generation = &ctx.config.generation;

        let rendered = self
            .renderer
            .render_with_backend(&request)
            .and_then(|(bytes, backend)| {
                let image = prepare_image(
                    bytes,
                    generation.min_width,
                    generation.min_height,
                    generation.jpeg_quality,
                )?;
                Ok((image, backend.to_string()))
            });
        let (image, backend) = match rendered {
            Ok(rendered) => rendered,
            Err(e) => {
                if !ctx.store.exists(ctx.date, keyword, ArtifactKind::Image) {
                    discard_dependents(ctx, keyword)?;
                }
                return Ok(ItemResult::Failed(e.to_string()));
            }
        };

        let outcome =
            ctx.store
                .write_artifact(ctx.date, keyword, ArtifactKind::Image, &image.bytes)?;
        tracing::info!(
            %keyword,
            renderer = %backend,
            width = image.width,
            height = image.height,
            %outcome,
            "image generated"
        );
        ctx.log(
            keyword,
            &format!(
                "image {outcome}: {}x{} via {backend}",
                image.width, image.height
            ),
        );
        ctx.emit(PipelineEvent::ImageRendered {
            keyword: keyword.clone(),
            backend: backend.clone(),
            width: image.width,
            height: image.height,
            outcome,
        });
        Ok(ItemResult::Rendered(outcome, backend))
    }
}

/// Remove artifacts built from an image that no longer exists. The bundle
/// goes first so an uploader never sees a manifest without its metadata.
fn discard_dependents(ctx: &RunContext, keyword: &Keyword) -> Result<(), StoreError> {
    let mut removed = Vec::new();
    for kind in [
        ArtifactKind::Bundle,
        ArtifactKind::BundleImage,
        ArtifactKind::Metadata,
    ] {
        if ctx.store.remove_artifact(ctx.date, keyword, kind)? {
            removed.push(kind.to_string());
        }
    }
    if !removed.is_empty() {
        tracing::info!(%keyword, removed = %removed.join(", "), "image missing, dropped dependent artifacts");
        ctx.log(
            keyword,
            &format!("image missing, removed {}", removed.join(", ")),
        );
    }
    Ok(())
}
