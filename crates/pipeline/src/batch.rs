//! Batch scene pipeline: every scene of a video, generated one after
//! another, optionally bridged by transitions, then stitched.
//!
//! A scene that fails is marked `error` and left out; its siblings carry
//! on. Only a run in which no scene completes is an error by itself.

use std::sync::Arc;

use serde::Serialize;

use reel_core::clip::{interleave_groups, Clip, MediaRef, StitchJob};
use reel_core::motion::MotionDecision;
use reel_core::scene::{layout_timeline, Scene, SceneStatus};
use reel_core::settings::GenerationSettings;
use reel_core::types::Seed;
use reel_events::bus::{RUN_COMPLETED, SCENE_STATUS};

use crate::backend::{PreparedImage, VideoBackend};
use crate::error::PipelineError;
use crate::frames::FrameExtractor;
use crate::long_clip::{LongClipGenerator, LongClipRequest};
use crate::motion::SmartMotionResolver;
use crate::reporter::ProgressReporter;
use crate::stitcher::{StitchOutput, Stitcher};
use crate::transitions::TransitionSynthesizer;

/// Seed distance between consecutive scenes; larger than any clip count.
const SCENE_SEED_STRIDE: Seed = 1_000;

/// Seed used for the clips of scene `index`.
pub fn scene_seed(base: Seed, index: usize) -> Seed {
    base.wrapping_add(SCENE_SEED_STRIDE.wrapping_mul(index as Seed))
}

/// Input for one batch run.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub scenes: Vec<Scene>,
    /// Merged settings (preset plus overrides); may hold the automatic
    /// motion sentinel.
    pub settings: GenerationSettings,
    pub seed: Seed,
    pub transitions: bool,
    pub audio: Option<MediaRef>,
    pub output_name: String,
}

/// Result of a batch run.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Scenes with timeline offsets and final status.
    pub scenes: Vec<Scene>,
    /// Motion resolved for each scene, in scene order. Resolution runs
    /// before generation, so failed scenes have an entry too.
    pub motion: Vec<MotionDecision>,
    /// Clips in stitched order.
    pub clips: Vec<Clip>,
    pub failed_scenes: Vec<usize>,
    pub stitched: StitchOutput,
}

#[derive(Serialize)]
struct SceneStatusPayload<'a> {
    status: SceneStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    motion: Option<&'a MotionDecision>,
}

pub struct ScenePipeline {
    backend: Arc<dyn VideoBackend>,
    frames: Arc<dyn FrameExtractor>,
    motion: SmartMotionResolver,
    stitcher: Arc<dyn Stitcher>,
    reporter: ProgressReporter,
}

impl ScenePipeline {
    pub fn new(
        backend: Arc<dyn VideoBackend>,
        frames: Arc<dyn FrameExtractor>,
        motion: SmartMotionResolver,
        stitcher: Arc<dyn Stitcher>,
    ) -> Self {
        Self {
            backend,
            frames,
            motion,
            stitcher,
            reporter: ProgressReporter::disabled(),
        }
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub async fn run(&self, request: BatchRequest) -> Result<BatchOutcome, PipelineError> {
        let BatchRequest {
            mut scenes,
            settings,
            seed,
            transitions,
            audio,
            output_name,
        } = request;

        if scenes.is_empty() {
            return Err(PipelineError::EmptyInput("no scenes in the batch".into()));
        }
        let total_secs = layout_timeline(&mut scenes)?;
        tracing::info!(
            scenes = scenes.len(),
            total_secs,
            backend = self.backend.name(),
            "Starting batch run",
        );
        for (i, scene) in scenes.iter().enumerate() {
            self.report_status(i, scene, None);
        }

        let generator = LongClipGenerator::new(self.backend.clone(), self.frames.clone())
            .with_reporter(self.reporter.clone());

        let mut motion = Vec::with_capacity(scenes.len());
        let mut groups: Vec<Vec<Clip>> = Vec::new();
        let mut seeds: Vec<(usize, PreparedImage)> = Vec::new();
        let mut failed_scenes = Vec::new();

        for (i, scene) in scenes.iter_mut().enumerate() {
            scene.mark_generating();
            self.report_status(i, scene, None);

            let decision = self.motion.resolve(settings.motion_effect, &scene.prompt).await;
            let scene_settings = settings.with_motion(decision.effect, decision.strength);

            match self.generate_scene(&generator, i, scene, &scene_settings, seed).await {
                Ok((prepared, clips)) => {
                    scene.mark_complete();
                    self.report_status(i, scene, Some(&decision));
                    tracing::info!(scene = i, clips = clips.len(), "Scene complete");
                    groups.push(clips);
                    seeds.push((i, prepared));
                }
                Err(e) => {
                    if let PipelineError::ClipFailed { completed, .. } = &e {
                        tracing::warn!(scene = i, discarded = completed.len(), "Dropping partial clips");
                    }
                    tracing::error!(scene = i, error = %e, "Scene failed");
                    scene.mark_error(e.to_string());
                    self.report_status(i, scene, Some(&decision));
                    failed_scenes.push(i);
                }
            }
            motion.push(decision);
        }

        if groups.is_empty() {
            return Err(PipelineError::EmptyInput(
                "no scene completed, nothing to stitch".into(),
            ));
        }

        let bridges = if transitions && groups.len() > 1 {
            TransitionSynthesizer::new(self.backend.clone())
                .with_reporter(self.reporter.clone())
                .synthesize(&seeds, &settings, seed)
                .await
        } else {
            Vec::new()
        };

        let clips = interleave_groups(groups, bridges);
        let mut job = StitchJob::new(clips.clone(), output_name)?;
        if let Some(audio) = audio {
            job = job.with_audio(audio);
        }
        let stitched = self.stitcher.stitch(&job).await?;

        self.reporter.emit(
            RUN_COMPLETED,
            None,
            serde_json::json!({
                "output": stitched.filename,
                "clips": clips.len(),
                "failed_scenes": failed_scenes,
            }),
        );
        tracing::info!(
            clips = clips.len(),
            failed = failed_scenes.len(),
            output = %stitched.filename,
            "Batch run complete",
        );

        Ok(BatchOutcome {
            scenes,
            motion,
            clips,
            failed_scenes,
            stitched,
        })
    }

    async fn generate_scene(
        &self,
        generator: &LongClipGenerator,
        index: usize,
        scene: &Scene,
        settings: &GenerationSettings,
        base_seed: Seed,
    ) -> Result<(PreparedImage, Vec<Clip>), PipelineError> {
        let seed = scene_seed(base_seed, index);
        let prepared = self
            .backend
            .prepare_image(&scene.image, seed, settings, &format!("scene_{index:02}"))
            .await?;
        let output = generator
            .generate(&LongClipRequest {
                image: prepared.clone(),
                prompt: scene.prompt.clone(),
                seed,
                settings: settings.clone(),
                duration_secs: scene.duration_secs,
                scene_index: index,
            })
            .await?;
        Ok((prepared, output.clips))
    }

    fn report_status(&self, index: usize, scene: &Scene, motion: Option<&MotionDecision>) {
        let payload = SceneStatusPayload {
            status: scene.status,
            error: scene.error.as_deref(),
            motion,
        };
        self.reporter.emit(
            SCENE_STATUS,
            Some(index),
            serde_json::to_value(payload).unwrap_or_default(),
        );
    }
}
