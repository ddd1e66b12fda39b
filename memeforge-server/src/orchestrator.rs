//! Meme creation pipeline
//!
//! Runs one creation through
//! BACKGROUND → CHARACTER → COMPOSITION → CAPTION → FINALIZING,
//! persisting the record and broadcasting progress after every step.
//! Intermediate images are written to `creations/<id>/` in the file store.
//!
//! There is no retry: the first failing step marks the creation failed with
//! its step preserved. Cancellation is checked between steps and interrupts
//! in-flight provider calls.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use memeforge_common::events::{EventBus, MemeEvent};

use crate::agents::AgentSet;
use crate::compositor::{Compositor, CompositorError};
use crate::db;
use crate::models::{CreationStep, Meme, MemeCreation, MemeKind};
use crate::storage::FileStore;

/// File store category for per-creation artifacts
pub const CREATIONS_DIR: &str = "creations";
/// File store category for finished memes
pub const MEMES_DIR: &str = "memes";

/// How a pipeline run ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Cancelled,
}

/// Await `fut` unless the token fires first
async fn until_cancelled<T, F>(cancel: &CancellationToken, fut: F) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

#[derive(Clone)]
pub struct MemeOrchestrator {
    db: SqlitePool,
    event_bus: EventBus,
    files: FileStore,
    agents: AgentSet,
    compositor: Arc<Compositor>,
}

impl MemeOrchestrator {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        files: FileStore,
        agents: AgentSet,
        compositor: Arc<Compositor>,
    ) -> Self {
        Self {
            db,
            event_bus,
            files,
            agents,
            compositor,
        }
    }

    /// Run the pipeline to a terminal state
    ///
    /// Returns the final record on completion or cancellation. On error the
    /// record has already been marked failed (see [`Self::handle_failure`]).
    pub async fn run(
        &self,
        mut creation: MemeCreation,
        cancel: CancellationToken,
    ) -> Result<MemeCreation> {
        let creation_id = creation.creation_id;

        match self.execute(&mut creation, &cancel).await {
            Ok(outcome) => {
                tracing::info!(
                    creation_id = %creation_id,
                    outcome = ?outcome,
                    duration_ms = creation.elapsed_ms(),
                    "Creation pipeline finished"
                );
                Ok(creation)
            }
            Err(e) => {
                tracing::error!(
                    creation_id = %creation_id,
                    step = %creation.step,
                    error = %format!("{:#}", e),
                    "Creation pipeline failed"
                );
                self.handle_failure(&mut creation, &e).await;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        creation: &mut MemeCreation,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let creation_id = creation.creation_id;
        let concept = creation.concept.clone();
        let style = creation.style.clone();

        creation.begin();
        self.persist(creation).await?;
        self.emit(MemeEvent::CreationStarted {
            creation_id,
            concept: concept.clone(),
            timestamp: Utc::now(),
        });

        // Background
        if cancel.is_cancelled() {
            return self.finish_cancelled(creation).await;
        }
        self.enter_step(creation, CreationStep::Background, "Generating background scene")
            .await?;
        let Some(background) = until_cancelled(
            cancel,
            self.agents.background.generate(&concept, style.as_deref()),
        )
        .await
        else {
            return self.finish_cancelled(creation).await;
        };
        let background = background.context("Background generation failed")?;
        let stored = self
            .save_artifact(creation_id, "background.png", &background.bytes)
            .await?;
        creation.background_prompt = Some(background.prompt);
        creation.background_path = Some(stored.clone());
        self.persist(creation).await?;
        self.artifact_ready(creation_id, CreationStep::Background, &stored);

        // Character
        if cancel.is_cancelled() {
            return self.finish_cancelled(creation).await;
        }
        self.enter_step(creation, CreationStep::Character, "Generating character")
            .await?;
        let Some(character) = until_cancelled(
            cancel,
            self.agents.character.generate(&concept, style.as_deref()),
        )
        .await
        else {
            return self.finish_cancelled(creation).await;
        };
        let character = character.context("Character generation failed")?;
        let stored = self
            .save_artifact(creation_id, "character.png", &character.bytes)
            .await?;
        creation.character_prompt = Some(character.prompt);
        creation.character_path = Some(stored.clone());
        self.persist(creation).await?;
        self.artifact_ready(creation_id, CreationStep::Character, &stored);

        // Composition
        if cancel.is_cancelled() {
            return self.finish_cancelled(creation).await;
        }
        self.enter_step(creation, CreationStep::Composition, "Compositing scene")
            .await?;
        let compositor = self.compositor.clone();
        let (background_bytes, character_bytes) = (background.bytes, character.bytes);
        let composite = tokio::task::spawn_blocking(move || {
            compositor.compose_scene_png(&background_bytes, &character_bytes)
        })
        .await
        .map_err(|e| CompositorError::Task(e.to_string()))
        .and_then(|r| r)
        .context("Composition failed")?;
        let stored = self
            .save_artifact(creation_id, "composite.png", &composite)
            .await?;
        creation.composite_path = Some(stored.clone());
        self.persist(creation).await?;
        self.artifact_ready(creation_id, CreationStep::Composition, &stored);

        // Caption
        if cancel.is_cancelled() {
            return self.finish_cancelled(creation).await;
        }
        self.enter_step(creation, CreationStep::Caption, "Writing caption")
            .await?;
        let Some(caption) = until_cancelled(
            cancel,
            self.agents.caption.generate(&concept, style.as_deref()),
        )
        .await
        else {
            return self.finish_cancelled(creation).await;
        };
        let caption = caption.context("Caption generation failed")?;
        creation.caption = Some(caption.clone());
        self.persist(creation).await?;

        // Finalizing
        if cancel.is_cancelled() {
            return self.finish_cancelled(creation).await;
        }
        self.enter_step(creation, CreationStep::Finalizing, "Rendering final meme")
            .await?;
        let compositor = self.compositor.clone();
        let burn_caption = caption.clone();
        let (png, width, height) = tokio::task::spawn_blocking(move || {
            compositor.burn_caption_png(&composite, &burn_caption)
        })
        .await
        .map_err(|e| CompositorError::Task(e.to_string()))
        .and_then(|r| r)
        .context("Caption rendering failed")?;

        let stored = self
            .files
            .save(MEMES_DIR, "png", &png)
            .await
            .context("Failed to store meme image")?;

        let meme = Meme {
            meme_id: uuid::Uuid::new_v4(),
            kind: MemeKind::Generated,
            title: concept,
            template_id: None,
            creation_id: Some(creation_id),
            top_text: caption.top_text.clone(),
            bottom_text: caption.bottom_text.clone(),
            image_path: stored.relative_path.clone(),
            width,
            height,
            created_at: Utc::now(),
        };
        if let Err(e) = db::memes::insert_meme(&self.db, &meme).await {
            self.discard_file(&stored.relative_path).await;
            return Err(anyhow::Error::new(e).context("Failed to record meme"));
        }

        // the record only becomes terminal once the row says so
        let mut completed = creation.clone();
        completed.complete(meme.meme_id, stored.relative_path.clone());
        if let Err(e) = self.persist(&completed).await {
            self.discard_meme(&meme).await;
            return Err(e);
        }
        *creation = completed;

        let image_url = self.files.url_for(&stored.relative_path);
        self.emit(MemeEvent::CreationCompleted {
            creation_id,
            meme_id: meme.meme_id,
            image_url: image_url.clone(),
            top_text: caption.top_text,
            bottom_text: caption.bottom_text,
            duration_ms: creation.elapsed_ms(),
            timestamp: Utc::now(),
        });
        self.emit(MemeEvent::MemeCreated {
            meme_id: meme.meme_id,
            kind: MemeKind::Generated,
            image_url,
            timestamp: Utc::now(),
        });

        Ok(Outcome::Completed)
    }

    /// Mark the creation failed, persist and broadcast
    ///
    /// Falls back to a direct status update if the regular save fails so the
    /// row never stays in progress.
    pub async fn handle_failure(&self, creation: &mut MemeCreation, error: &anyhow::Error) {
        let message = format!("{:#}", error);
        if !creation.fail(message.clone()) {
            tracing::debug!(
                creation_id = %creation.creation_id,
                status = %creation.status,
                "Creation already terminal, failure not recorded"
            );
            return;
        }

        if let Err(save_error) = db::creations::save_creation(&self.db, creation).await {
            tracing::error!(
                creation_id = %creation.creation_id,
                error = %save_error,
                "Failed to persist failed creation - attempting direct database update"
            );
            if let Err(fallback_error) =
                db::creations::force_fail(&self.db, creation.creation_id, &message).await
            {
                tracing::error!(
                    creation_id = %creation.creation_id,
                    error = %fallback_error,
                    "Direct failure update also failed"
                );
            }
        }

        self.emit(MemeEvent::CreationFailed {
            creation_id: creation.creation_id,
            step: creation.step,
            error: message,
            timestamp: Utc::now(),
        });
    }

    async fn enter_step(
        &self,
        creation: &mut MemeCreation,
        step: CreationStep,
        message: &str,
    ) -> Result<()> {
        if let Some(transition) = creation.advance_to(step) {
            tracing::info!(
                creation_id = %transition.creation_id,
                from = %transition.old_step,
                to = %transition.new_step,
                "Creation step"
            );
        }
        self.persist(creation).await?;
        self.emit(MemeEvent::CreationProgress {
            creation_id: creation.creation_id,
            step,
            progress_percent: creation.progress_percent,
            message: message.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn finish_cancelled(&self, creation: &mut MemeCreation) -> Result<Outcome> {
        creation.cancel();
        self.persist(creation).await?;
        tracing::info!(
            creation_id = %creation.creation_id,
            step = %creation.step,
            "Creation cancelled"
        );
        self.emit(MemeEvent::CreationCancelled {
            creation_id: creation.creation_id,
            timestamp: Utc::now(),
        });
        Ok(Outcome::Cancelled)
    }

    async fn save_artifact(
        &self,
        creation_id: uuid::Uuid,
        name: &str,
        bytes: &[u8],
    ) -> Result<String> {
        let stored = self
            .files
            .save_in(CREATIONS_DIR, &creation_id.to_string(), name, bytes)
            .await
            .with_context(|| format!("Failed to store {}", name))?;
        Ok(stored.relative_path)
    }

    fn artifact_ready(&self, creation_id: uuid::Uuid, step: CreationStep, relative: &str) {
        self.emit(MemeEvent::ArtifactReady {
            creation_id,
            step,
            url: self.files.url_for(relative),
            timestamp: Utc::now(),
        });
    }

    /// Remove a meme whose creation could not be completed
    async fn discard_meme(&self, meme: &Meme) {
        if let Err(e) = db::memes::delete_meme(&self.db, meme.meme_id).await {
            tracing::warn!(meme_id = %meme.meme_id, error = %e, "Failed to remove meme row");
        }
        self.discard_file(&meme.image_path).await;
    }

    async fn discard_file(&self, relative: &str) {
        if let Err(e) = self.files.delete(relative).await {
            tracing::warn!(path = %relative, error = %e, "Failed to remove meme image");
        }
    }

    async fn persist(&self, creation: &MemeCreation) -> Result<()> {
        db::creations::save_creation(&self.db, creation)
            .await
            .context("Failed to persist creation state")
    }

    fn emit(&self, event: MemeEvent) {
        self.event_bus.emit_lossy(event);
    }
}
