//! Scene transition synthesizer.
//!
//! Requests one short morph clip per adjacent pair of scenes, seeded from
//! the first scene's image. A failed transition is dropped, never fatal.

use std::sync::Arc;

use reel_core::clip::Clip;
use reel_core::settings::{GenerationSettings, MotionEffect};
use reel_core::types::Seed;
use reel_events::bus::TRANSITION_SKIPPED;

use crate::backend::{PreparedImage, VideoBackend, VideoRequest};
use crate::reporter::ProgressReporter;

/// Length of every transition clip.
pub const TRANSITION_SECS: u32 = 3;

/// Prompt used for every transition job.
pub const TRANSITION_PROMPT: &str =
    "smooth cinematic morph transition, flowing dissolve between scenes, soft motion blur";

/// Offset added to the run seed so transitions do not reuse scene seeds.
const TRANSITION_SEED_OFFSET: Seed = 10_000;

pub struct TransitionSynthesizer {
    backend: Arc<dyn VideoBackend>,
    reporter: ProgressReporter,
}

impl TransitionSynthesizer {
    pub fn new(backend: Arc<dyn VideoBackend>) -> Self {
        Self {
            backend,
            reporter: ProgressReporter::disabled(),
        }
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Settings for a transition job derived from the run settings.
    pub fn transition_settings(settings: &GenerationSettings) -> GenerationSettings {
        settings
            .with_motion(MotionEffect::Static, settings.motion_strength)
            .with_frame_count(TRANSITION_SECS * settings.frame_rate)
    }

    /// One entry per adjacent pair: `result[i]` bridges `seeds[i]` and the
    /// scene after it. `seeds` holds each scene's prepared image together
    /// with its scene index.
    pub async fn synthesize(
        &self,
        seeds: &[(usize, PreparedImage)],
        settings: &GenerationSettings,
        seed: Seed,
    ) -> Vec<Option<Clip>> {
        let settings = Self::transition_settings(settings);
        let pairs = seeds.len().saturating_sub(1);
        let mut transitions = Vec::with_capacity(pairs);

        for (i, (scene_index, image)) in seeds.iter().take(pairs).enumerate() {
            let request = VideoRequest {
                image: image.clone(),
                prompt: TRANSITION_PROMPT.to_string(),
                seed: seed.wrapping_add(TRANSITION_SEED_OFFSET + i as Seed),
                settings: settings.clone(),
            };
            match self.backend.generate_video(&request, None).await {
                Ok(video) => {
                    tracing::info!(after_scene = scene_index, job_id = %video.job_id, "Transition generated");
                    transitions.push(Some(Clip::transition(video.media, *scene_index)));
                }
                Err(e) => {
                    tracing::warn!(after_scene = scene_index, error = %e, "Transition failed, skipping");
                    self.reporter.emit(
                        TRANSITION_SKIPPED,
                        Some(*scene_index),
                        serde_json::json!({ "error": e.to_string() }),
                    );
                    transitions.push(None);
                }
            }
        }
        transitions
    }
}

#[cfg(test)]
mod tests {
    use reel_core::settings::preset;

    use super::*;

    #[test]
    fn transition_settings_are_static_and_three_seconds() {
        let base = preset("balanced").unwrap();
        let s = TransitionSynthesizer::transition_settings(&base);
        assert_eq!(s.motion_effect, MotionEffect::Static);
        assert_eq!(s.frame_count, TRANSITION_SECS * base.frame_rate);
        assert_eq!(s.clip_duration_secs(), f64::from(TRANSITION_SECS));
    }
}
