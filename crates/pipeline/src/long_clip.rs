//! Long-clip splitter: cover a duration longer than one job can produce
//! with a chain of equal sub-clips.
//!
//! Clips are generated strictly in order. The last frame of each clip
//! (except the final one) becomes the seed image of the next, and each
//! clip's seed is offset by its index so the clips are not identical.

use std::sync::Arc;

use reel_core::clip::Clip;
use reel_core::clip_plan::{clip_seed, plan_clips, ClipPlan};
use reel_core::scene::SceneImage;
use reel_core::settings::GenerationSettings;
use reel_core::types::Seed;
use reel_events::bus::CLIP_COMPLETED;

use crate::backend::{PreparedImage, VideoBackend, VideoRequest};
use crate::error::PipelineError;
use crate::fetch::fetch_media;
use crate::frames::FrameExtractor;
use crate::reporter::ProgressReporter;

/// One long-clip request.
#[derive(Debug, Clone)]
pub struct LongClipRequest {
    /// Seed image of the first clip.
    pub image: PreparedImage,
    pub prompt: String,
    pub seed: Seed,
    /// Settings with a concrete motion effect.
    pub settings: GenerationSettings,
    pub duration_secs: f64,
    /// Scene the clips belong to.
    pub scene_index: usize,
}

/// Clips produced for one request, in playback order.
#[derive(Debug, Clone)]
pub struct LongClipOutput {
    pub plan: ClipPlan,
    pub clips: Vec<Clip>,
}

/// Generates chained sub-clips through a [`VideoBackend`].
pub struct LongClipGenerator {
    backend: Arc<dyn VideoBackend>,
    frames: Arc<dyn FrameExtractor>,
    http: reqwest::Client,
    reporter: ProgressReporter,
}

impl LongClipGenerator {
    pub fn new(backend: Arc<dyn VideoBackend>, frames: Arc<dyn FrameExtractor>) -> Self {
        Self {
            backend,
            frames,
            http: reqwest::Client::new(),
            reporter: ProgressReporter::disabled(),
        }
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Generate every clip of the plan, or fail naming the 1-based clip
    /// that broke the chain. Clips finished before the failure are carried
    /// in [`PipelineError::ClipFailed`].
    pub async fn generate(&self, request: &LongClipRequest) -> Result<LongClipOutput, PipelineError> {
        let plan = plan_clips(request.duration_secs, &request.settings)?;
        let settings = request.settings.with_frame_count(plan.adjusted_frame_count);
        tracing::info!(
            scene = request.scene_index,
            clip_count = plan.clip_count,
            per_clip_secs = plan.per_clip_duration,
            frames = plan.adjusted_frame_count,
            "Planned clips",
        );

        let mut clips = Vec::with_capacity(plan.clip_count as usize);
        let mut image = request.image.clone();

        for i in 0..plan.clip_count {
            let is_last = i + 1 == plan.clip_count;
            let step = self
                .generate_one(request, &settings, &image, i, is_last)
                .await;

            match step {
                Ok((clip, next_image)) => {
                    clips.push(clip);
                    if let Some(next) = next_image {
                        image = next;
                    }
                }
                Err(source) => {
                    tracing::error!(
                        scene = request.scene_index,
                        clip = i + 1,
                        total = plan.clip_count,
                        error = %source,
                        "Clip generation failed, aborting sequence",
                    );
                    return Err(PipelineError::ClipFailed {
                        index: i + 1,
                        total: plan.clip_count,
                        source: Box::new(source),
                        completed: clips,
                    });
                }
            }
        }

        Ok(LongClipOutput { plan, clips })
    }

    async fn generate_one(
        &self,
        request: &LongClipRequest,
        settings: &GenerationSettings,
        image: &PreparedImage,
        index: u32,
        is_last: bool,
    ) -> Result<(Clip, Option<PreparedImage>), PipelineError> {
        let video = self
            .backend
            .generate_video(
                &VideoRequest {
                    image: image.clone(),
                    prompt: request.prompt.clone(),
                    seed: clip_seed(request.seed, index),
                    settings: settings.clone(),
                },
                Some(request.scene_index),
            )
            .await?;

        self.reporter.emit(
            CLIP_COMPLETED,
            Some(request.scene_index),
            serde_json::json!({ "clip": index + 1, "job_id": video.job_id }),
        );

        let next_image = if is_last {
            None
        } else {
            let bytes = fetch_media(&self.http, &video.media).await?;
            let frame = self.frames.extract_last_frame(&bytes).await?;
            let seed_image = SceneImage::Uploaded {
                filename: format!("scene_{:02}_clip_{:03}_last.png", request.scene_index, index + 1),
                bytes: frame,
            };
            let label = format!("scene_{:02}_clip_{:03}", request.scene_index, index + 2);
            Some(
                self.backend
                    .prepare_image(&seed_image, request.seed, settings, &label)
                    .await?,
            )
        };

        let mut clip = Clip::scene(video.media, request.scene_index);
        clip.ordinal = index as usize;
        Ok((clip, next_image))
    }
}
