use std::sync::Arc;
use std::time::Duration;

use reel_pipeline::reporter::ProgressReporter;
use reel_pipeline::stitcher::ClipStitcher;

use crate::config::ServerConfig;

/// Shared application state available to all handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Pooled client for relay calls; carries no per-target state.
    pub http: reqwest::Client,
    /// Stitch engine, loaded once and shared by every stitch request.
    pub stitcher: Arc<ClipStitcher>,
    pub event_bus: Arc<reel_events::EventBus>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let event_bus = Arc::new(reel_events::EventBus::default());
        let stitcher =
            ClipStitcher::new().with_reporter(ProgressReporter::new(event_bus.clone(), "api"));
        Self {
            config: Arc::new(config),
            http: reqwest::Client::new(),
            stitcher: Arc::new(stitcher),
            event_bus,
        }
    }

    pub fn relay_call_timeout(&self) -> Duration {
        Duration::from_secs(self.config.relay_call_timeout_secs)
    }
}
