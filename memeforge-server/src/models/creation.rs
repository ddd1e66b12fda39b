//! Meme creation state machine
//!
//! A creation moves PENDING → IN_PROGRESS → {COMPLETED | FAILED | CANCELLED}
//! while its step advances through
//! QUEUED → BACKGROUND → CHARACTER → COMPOSITION → CAPTION → FINALIZING → DONE.
//!
//! The record is owned by the orchestrator task and persisted after every
//! change so that status polls see the latest state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CreationStatus, CreationStep};

/// Top and bottom caption text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Caption {
    pub top_text: String,
    pub bottom_text: String,
}

impl Caption {
    pub fn new(top_text: impl Into<String>, bottom_text: impl Into<String>) -> Self {
        Self {
            top_text: top_text.into(),
            bottom_text: bottom_text.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.top_text.trim().is_empty() && self.bottom_text.trim().is_empty()
    }
}

/// Step change record, returned by `MemeCreation::advance_to`
#[derive(Debug, Clone, Serialize)]
pub struct StepTransition {
    pub creation_id: Uuid,
    pub old_step: CreationStep,
    pub new_step: CreationStep,
    pub transitioned_at: DateTime<Utc>,
}

/// Meme creation state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemeCreation {
    pub creation_id: Uuid,

    /// User-supplied concept the meme is built around
    pub concept: String,

    /// Optional art style hint ("pixel art", "oil painting", ...)
    pub style: Option<String>,

    pub status: CreationStatus,
    pub step: CreationStep,

    /// Overall progress (0.0 - 100.0)
    pub progress_percent: f64,

    // Generated artifacts; paths are relative to the file store root
    pub background_prompt: Option<String>,
    pub character_prompt: Option<String>,
    pub background_path: Option<String>,
    pub character_path: Option<String>,
    pub composite_path: Option<String>,
    pub final_path: Option<String>,
    pub caption: Option<Caption>,

    /// Meme record produced on completion
    pub meme_id: Option<Uuid>,

    /// Failure description (FAILED only)
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MemeCreation {
    pub fn new(concept: String, style: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            creation_id: Uuid::new_v4(),
            concept,
            style,
            status: CreationStatus::Pending,
            step: CreationStep::Queued,
            progress_percent: 0.0,
            background_prompt: None,
            character_prompt: None,
            background_path: None,
            character_path: None,
            composite_path: None,
            final_path: None,
            caption: None,
            meme_id: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Pipeline picked the creation up
    pub fn begin(&mut self) -> bool {
        if self.status != CreationStatus::Pending {
            return false;
        }
        self.status = CreationStatus::InProgress;
        self.touch();
        true
    }

    /// Move to a later step
    ///
    /// Returns `None` when the creation is terminal or `step` is not ahead of
    /// the current step; progress never goes backwards.
    pub fn advance_to(&mut self, step: CreationStep) -> Option<StepTransition> {
        if self.is_terminal() || step <= self.step {
            return None;
        }

        let transition = StepTransition {
            creation_id: self.creation_id,
            old_step: self.step,
            new_step: step,
            transitioned_at: Utc::now(),
        };
        self.step = step;
        self.progress_percent = self.progress_percent.max(step.start_percent());
        self.touch();
        Some(transition)
    }

    /// Mark completed with the produced meme
    pub fn complete(&mut self, meme_id: Uuid, final_path: String) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.step = CreationStep::Done;
        self.progress_percent = 100.0;
        self.meme_id = Some(meme_id);
        self.final_path = Some(final_path);
        self.finish(CreationStatus::Completed);
        true
    }

    /// Mark failed; the current step is kept to show where it stopped
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.error = Some(error.into());
        self.finish(CreationStatus::Failed);
        true
    }

    pub fn cancel(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.finish(CreationStatus::Cancelled);
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Milliseconds between creation and completion (or now)
    pub fn elapsed_ms(&self) -> u64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.created_at).num_milliseconds().max(0) as u64
    }

    fn finish(&mut self, status: CreationStatus) {
        self.status = status;
        let now = Utc::now();
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
