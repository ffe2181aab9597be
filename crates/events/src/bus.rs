//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans [`PipelineEvent`]s out to every subscriber. It is
//! shared via `Arc<EventBus>`; a subscription ends when its receiver is
//! dropped, so repeated pipeline runs never accumulate listeners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

pub const JOB_SUBMITTED: &str = "job.submitted";
pub const JOB_PROGRESS: &str = "job.progress";
pub const JOB_SUCCEEDED: &str = "job.succeeded";
pub const JOB_FAILED: &str = "job.failed";
pub const SCENE_STATUS: &str = "scene.status";
pub const CLIP_COMPLETED: &str = "clip.completed";
pub const TRANSITION_SKIPPED: &str = "transition.skipped";
pub const STITCH_STAGE: &str = "stitch.stage";
pub const RUN_COMPLETED: &str = "run.completed";

// ---------------------------------------------------------------------------
// PipelineEvent
// ---------------------------------------------------------------------------

/// Something that happened during a pipeline run.
///
/// Constructed via [`PipelineEvent::new`] and enriched with
/// [`for_run`](PipelineEvent::for_run), [`for_scene`](PipelineEvent::for_scene)
/// and [`with_payload`](PipelineEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Dot-separated event name, e.g. `"scene.status"`.
    pub event_type: String,

    /// Run the event belongs to, when known.
    pub run_id: Option<String>,

    /// 0-based scene index, when the event concerns one scene.
    pub scene_index: Option<usize>,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            run_id: None,
            scene_index: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn for_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn for_scene(mut self, scene_index: usize) -> Self {
        self.scene_index = Some(scene_index);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// In-process fan-out event bus.
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed events are dropped
    /// and slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// With no subscribers the event is dropped.
    pub fn publish(&self, event: PipelineEvent) {
        tracing::trace!(event_type = %event.event_type, "Publishing pipeline event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
