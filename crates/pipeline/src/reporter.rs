//! Publishes pipeline progress onto an optional [`EventBus`].

use std::sync::Arc;

use reel_events::{EventBus, PipelineEvent};

/// Handle that stamps events with the current run id.
///
/// A reporter without a bus is a no-op, so library code can always report.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    bus: Option<Arc<EventBus>>,
    run_id: Option<String>,
}

impl ProgressReporter {
    pub fn new(bus: Arc<EventBus>, run_id: impl Into<String>) -> Self {
        Self {
            bus: Some(bus),
            run_id: Some(run_id.into()),
        }
    }

    /// A reporter that drops everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn emit(&self, event_type: &str, scene_index: Option<usize>, payload: serde_json::Value) {
        let Some(bus) = &self.bus else {
            return;
        };
        let mut event = PipelineEvent::new(event_type).with_payload(payload);
        if let Some(run_id) = &self.run_id {
            event = event.for_run(run_id.clone());
        }
        if let Some(index) = scene_index {
            event = event.for_scene(index);
        }
        bus.publish(event);
    }
}
