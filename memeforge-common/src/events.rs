//! Event types for the MemeForge event system
//!
//! Provides the shared event definitions and the `EventBus` used to fan
//! progress out to WebSocket and SSE clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Step of the meme creation pipeline
///
/// Steps run strictly in declaration order:
/// QUEUED → BACKGROUND → CHARACTER → COMPOSITION → CAPTION → FINALIZING → DONE
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationStep {
    /// Accepted, waiting for the background task to pick it up
    Queued,
    /// Generating the background scene
    Background,
    /// Generating the character / subject
    Character,
    /// Compositing character over background
    Composition,
    /// Generating caption text
    Caption,
    /// Burning caption in and persisting the meme
    Finalizing,
    /// Pipeline finished
    Done,
}

impl CreationStep {
    /// Progress percentage reported when the step starts
    pub fn start_percent(self) -> f64 {
        match self {
            CreationStep::Queued => 0.0,
            CreationStep::Background => 5.0,
            CreationStep::Character => 30.0,
            CreationStep::Composition => 55.0,
            CreationStep::Caption => 70.0,
            CreationStep::Finalizing => 85.0,
            CreationStep::Done => 100.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CreationStep::Queued => "queued",
            CreationStep::Background => "background",
            CreationStep::Character => "character",
            CreationStep::Composition => "composition",
            CreationStep::Caption => "caption",
            CreationStep::Finalizing => "finalizing",
            CreationStep::Done => "done",
        }
    }
}

impl fmt::Display for CreationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CreationStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(CreationStep::Queued),
            "background" => Ok(CreationStep::Background),
            "character" => Ok(CreationStep::Character),
            "composition" => Ok(CreationStep::Composition),
            "caption" => Ok(CreationStep::Caption),
            "finalizing" => Ok(CreationStep::Finalizing),
            "done" => Ok(CreationStep::Done),
            other => Err(format!("unknown creation step: {}", other)),
        }
    }
}

/// Lifecycle status of a meme creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl CreationStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CreationStatus::Completed | CreationStatus::Failed | CreationStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CreationStatus::Pending => "pending",
            CreationStatus::InProgress => "in_progress",
            CreationStatus::Completed => "completed",
            CreationStatus::Failed => "failed",
            CreationStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CreationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CreationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CreationStatus::Pending),
            "in_progress" => Ok(CreationStatus::InProgress),
            "completed" => Ok(CreationStatus::Completed),
            "failed" => Ok(CreationStatus::Failed),
            "cancelled" => Ok(CreationStatus::Cancelled),
            other => Err(format!("unknown creation status: {}", other)),
        }
    }
}

/// How a meme was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemeKind {
    /// Caption burned onto a catalog template
    Template,
    /// Produced by the creation pipeline from a concept
    Generated,
}

impl MemeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MemeKind::Template => "template",
            MemeKind::Generated => "generated",
        }
    }
}

impl fmt::Display for MemeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "template" => Ok(MemeKind::Template),
            "generated" => Ok(MemeKind::Generated),
            other => Err(format!("unknown meme kind: {}", other)),
        }
    }
}

/// MemeForge event types
///
/// Events are broadcast via `EventBus` and serialized as JSON for the
/// WebSocket and SSE channels. The `type` tag carries the variant name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MemeEvent {
    /// Creation pipeline picked up a new request
    CreationStarted {
        creation_id: Uuid,
        concept: String,
        timestamp: DateTime<Utc>,
    },

    /// Creation moved to a new step or reported intermediate progress
    CreationProgress {
        creation_id: Uuid,
        step: CreationStep,
        /// Overall progress (0.0 - 100.0)
        progress_percent: f64,
        /// Human-readable description of the current operation
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// An intermediate image of a creation is available
    ArtifactReady {
        creation_id: Uuid,
        step: CreationStep,
        /// URL under /files where the artifact is served
        url: String,
        timestamp: DateTime<Utc>,
    },

    /// Creation finished and produced a meme
    CreationCompleted {
        creation_id: Uuid,
        meme_id: Uuid,
        image_url: String,
        top_text: String,
        bottom_text: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Creation failed; `step` is where it stopped
    CreationFailed {
        creation_id: Uuid,
        step: CreationStep,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Creation cancelled by the user
    CreationCancelled {
        creation_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// A meme was stored (template or generated)
    MemeCreated {
        meme_id: Uuid,
        kind: MemeKind,
        image_url: String,
        timestamp: DateTime<Utc>,
    },

    /// A meme was deleted
    MemeDeleted {
        meme_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Template or GIF catalog was refreshed from its provider
    CatalogRefreshed {
        /// "templates" or "gifs"
        catalog: String,
        entries: usize,
        timestamp: DateTime<Utc>,
    },
}

impl MemeEvent {
    /// Variant name, used as the SSE event name
    pub fn event_type(&self) -> &str {
        match self {
            MemeEvent::CreationStarted { .. } => "CreationStarted",
            MemeEvent::CreationProgress { .. } => "CreationProgress",
            MemeEvent::ArtifactReady { .. } => "ArtifactReady",
            MemeEvent::CreationCompleted { .. } => "CreationCompleted",
            MemeEvent::CreationFailed { .. } => "CreationFailed",
            MemeEvent::CreationCancelled { .. } => "CreationCancelled",
            MemeEvent::MemeCreated { .. } => "MemeCreated",
            MemeEvent::MemeDeleted { .. } => "MemeDeleted",
            MemeEvent::CatalogRefreshed { .. } => "CatalogRefreshed",
        }
    }

    /// Creation this event belongs to, if any
    pub fn creation_id(&self) -> Option<Uuid> {
        match self {
            MemeEvent::CreationStarted { creation_id, .. }
            | MemeEvent::CreationProgress { creation_id, .. }
            | MemeEvent::ArtifactReady { creation_id, .. }
            | MemeEvent::CreationCompleted { creation_id, .. }
            | MemeEvent::CreationFailed { creation_id, .. }
            | MemeEvent::CreationCancelled { creation_id, .. } => Some(*creation_id),
            _ => None,
        }
    }
}

/// Central event distribution bus
///
/// Uses `tokio::sync::broadcast` internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged receivers skip ahead instead of stalling the bus
///
/// # Examples
///
/// ```
/// use memeforge_common::events::{EventBus, MemeEvent};
///
/// let event_bus = EventBus::new(64);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(MemeEvent::MemeDeleted {
///     meme_id: uuid::Uuid::new_v4(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MemeEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<MemeEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: MemeEvent,
    ) -> Result<usize, broadcast::error::SendError<MemeEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: MemeEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
