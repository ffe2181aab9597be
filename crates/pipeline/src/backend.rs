//! Generation backends.
//!
//! A [`VideoBackend`] turns a prepared seed image plus prompt and settings
//! into a video clip. The long-clip splitter, transition synthesizer and
//! batch pipeline only see this trait, so the self-hosted job server
//! ([`ComfyBackend`]) and the hosted prediction API
//! ([`HostedBackend`](crate::hosted::HostedBackend)) are interchangeable.

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use reel_comfyui::history::{ArtifactResult, JobKind};
use reel_comfyui::workflow::{
    build_image_graph, build_image_to_video_graph, build_large_video_model_graph,
    checkpoint_names, node_available, select_motion_checkpoint, ADVANCED_VIDEO_NODE,
    MOTION_LOADER_NODE,
};
use reel_core::clip::{mime_for_filename, MediaRef};
use reel_core::ffmpeg;
use reel_core::scene::{seed_image_dimensions, SceneImage};
use reel_core::settings::GenerationSettings;
use reel_core::types::{JobId, Seed};

use crate::error::PipelineError;
use crate::fetch::fetch_media;
use crate::poller::JobPoller;

/// A seed image in the form the backend consumes (server-side file name,
/// URL or data URI).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedImage {
    pub reference: String,
}

/// Everything needed for one image-to-video job.
#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub image: PreparedImage,
    pub prompt: String,
    pub seed: Seed,
    /// Settings with a concrete motion effect.
    pub settings: GenerationSettings,
}

/// A finished clip.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedVideo {
    pub job_id: JobId,
    pub media: MediaRef,
}

#[async_trait::async_trait]
pub trait VideoBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Make a scene image usable as a job input.
    ///
    /// `label` names uploaded files (e.g. `scene_02`).
    async fn prepare_image(
        &self,
        image: &SceneImage,
        seed: Seed,
        settings: &GenerationSettings,
        label: &str,
    ) -> Result<PreparedImage, PipelineError>;

    /// Generate one clip and return it as a usable media reference.
    async fn generate_video(
        &self,
        request: &VideoRequest,
        scene_index: Option<usize>,
    ) -> Result<GeneratedVideo, PipelineError>;
}

// ---------------------------------------------------------------------------
// Job server backend
// ---------------------------------------------------------------------------

/// Which image-to-video pipeline the job server runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoModel {
    /// SD 1.5 checkpoint plus motion module and camera-motion LoRAs.
    #[default]
    MotionDiffusion,
    /// Large generative image-to-video model.
    LargeVideoModel,
}

/// Node classes the large-video-model graph needs.
const LARGE_MODEL_NODES: &[&str] = &["WanImageToVideo", "CreateVideo", "SaveVideo"];

/// What the job server can run, discovered once per backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub checkpoints: Vec<String>,
    pub advanced_video_nodes: bool,
    pub motion_nodes: bool,
    /// Large-model node classes that are not installed.
    pub missing_large_model_nodes: Vec<String>,
}

/// [`VideoBackend`] that drives a self-hosted job server through a
/// [`JobPoller`].
pub struct ComfyBackend {
    poller: JobPoller,
    http: reqwest::Client,
    model: VideoModel,
    preferred_checkpoint: Option<String>,
    capabilities: OnceCell<Capabilities>,
}

impl ComfyBackend {
    pub fn new(poller: JobPoller) -> Self {
        Self {
            poller,
            http: reqwest::Client::new(),
            model: VideoModel::default(),
            preferred_checkpoint: None,
            capabilities: OnceCell::new(),
        }
    }

    pub fn with_model(mut self, model: VideoModel) -> Self {
        self.model = model;
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: impl Into<String>) -> Self {
        self.preferred_checkpoint = Some(checkpoint.into());
        self
    }

    pub fn poller(&self) -> &JobPoller {
        &self.poller
    }

    pub fn model(&self) -> VideoModel {
        self.model
    }

    pub fn preferred_checkpoint(&self) -> Option<&str> {
        self.preferred_checkpoint.as_deref()
    }

    /// Discover (once) which checkpoints and nodes the server offers.
    pub async fn capabilities(&self) -> Result<&Capabilities, PipelineError> {
        self.capabilities.get_or_try_init(|| self.discover()).await
    }

    async fn discover(&self) -> Result<Capabilities, PipelineError> {
        let transport = self.poller.transport();
        let checkpoints = checkpoint_names(&transport.object_info("CheckpointLoaderSimple").await?);
        let advanced_video_nodes =
            node_available(&transport.object_info(ADVANCED_VIDEO_NODE).await?, ADVANCED_VIDEO_NODE);
        let motion_nodes =
            node_available(&transport.object_info(MOTION_LOADER_NODE).await?, MOTION_LOADER_NODE);

        let mut missing_large_model_nodes = Vec::new();
        if self.model == VideoModel::LargeVideoModel {
            for class in LARGE_MODEL_NODES {
                if !node_available(&transport.object_info(class).await?, class) {
                    missing_large_model_nodes.push((*class).to_string());
                }
            }
        }

        tracing::info!(
            checkpoints = checkpoints.len(),
            advanced_video_nodes,
            motion_nodes,
            "Discovered job server capabilities",
        );
        Ok(Capabilities {
            checkpoints,
            advanced_video_nodes,
            motion_nodes,
            missing_large_model_nodes,
        })
    }

    fn image_checkpoint(&self, caps: &Capabilities) -> Result<String, PipelineError> {
        self.preferred_checkpoint
            .clone()
            .or_else(|| caps.checkpoints.first().cloned())
            .ok_or_else(|| {
                PipelineError::CapabilityMissing("No checkpoint installed on the job server".into())
            })
    }

    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<PreparedImage, PipelineError> {
        seed_image_dimensions(&bytes)?;
        let stored = self.poller.transport().upload_image(filename, bytes).await?;
        tracing::debug!(filename, stored = %stored.name, "Seed image uploaded");
        Ok(PreparedImage {
            reference: stored.image_ref(),
        })
    }

    /// Turn an extracted artifact into a single video reference.
    ///
    /// Frame sequences are encoded locally; with `loop_mode` the frames are
    /// played forward then backward, matching what the video-combine node
    /// does with `pingpong`.
    async fn materialize(
        &self,
        artifact: ArtifactResult,
        settings: &GenerationSettings,
    ) -> Result<MediaRef, PipelineError> {
        let transport = self.poller.transport();
        match artifact {
            ArtifactResult::Video(r) => {
                let fetched = transport.fetch_artifact(&r).await?;
                Ok(MediaRef::data(fetched.mime_type, fetched.bytes))
            }
            ArtifactResult::FrameSequence(refs) => {
                let work = tempfile::tempdir()?;
                let mut frames = Vec::with_capacity(refs.len());
                for r in &refs {
                    frames.push(transport.fetch_artifact(r).await?.bytes);
                }
                let order = frame_order(frames.len(), settings.loop_mode);
                for (slot, &source) in order.iter().enumerate() {
                    tokio::fs::write(work.path().join(ffmpeg::frame_filename(slot)), &frames[source])
                        .await?;
                }
                let output = work.path().join("sequence.mp4");
                ffmpeg::encode_frame_sequence(work.path(), settings.frame_rate, &output).await?;
                let bytes = tokio::fs::read(&output).await?;
                tracing::debug!(
                    frames = refs.len(),
                    encoded = order.len(),
                    loop_mode = settings.loop_mode,
                    "Encoded frame sequence into video"
                );
                Ok(MediaRef::data("video/mp4", bytes))
            }
            ArtifactResult::Image(r) => Err(PipelineError::NoArtifact(format!(
                "expected a video but the job produced a single image ({}); \
                 install the video-combining node or check the output node",
                r.filename
            ))),
        }
    }
}

/// Source frame for each encoded slot. Ping-pong skips both end frames on
/// the way back so neither is shown twice in a row.
fn frame_order(count: usize, ping_pong: bool) -> Vec<usize> {
    let forward = 0..count;
    if !ping_pong || count < 3 {
        return forward.collect();
    }
    forward.chain((1..count - 1).rev()).collect()
}

#[async_trait::async_trait]
impl VideoBackend for ComfyBackend {
    fn name(&self) -> &'static str {
        "comfyui"
    }

    async fn prepare_image(
        &self,
        image: &SceneImage,
        seed: Seed,
        settings: &GenerationSettings,
        label: &str,
    ) -> Result<PreparedImage, PipelineError> {
        match image {
            SceneImage::Uploaded { filename, bytes } => {
                let ext = reel_core::naming::extension_of(filename).unwrap_or_else(|| "png".into());
                self.upload(&format!("{label}.{ext}"), bytes.clone()).await
            }
            SceneImage::Url { url } => {
                let bytes = fetch_media(&self.http, &MediaRef::url(url.clone())).await?;
                let ext = match mime_for_filename(url) {
                    "image/jpeg" => "jpg",
                    "image/webp" => "webp",
                    _ => "png",
                };
                self.upload(&format!("{label}.{ext}"), bytes).await
            }
            SceneImage::Generate { prompt } => {
                let caps = self.capabilities().await?;
                let checkpoint = self.image_checkpoint(caps)?;
                let graph =
                    build_image_graph(prompt, seed, settings.width, settings.height, &checkpoint)?;
                let (_, artifact) = self.poller.run(graph, JobKind::Image, None).await?;
                let primary = artifact.primary().cloned().ok_or_else(|| {
                    PipelineError::NoArtifact("image job returned an empty frame list".into())
                })?;
                let fetched = self.poller.transport().fetch_artifact(&primary).await?;
                self.upload(&format!("{label}.png"), fetched.bytes).await
            }
        }
    }

    async fn generate_video(
        &self,
        request: &VideoRequest,
        scene_index: Option<usize>,
    ) -> Result<GeneratedVideo, PipelineError> {
        let caps = self.capabilities().await?;
        let settings = &request.settings;

        let graph = match self.model {
            VideoModel::MotionDiffusion => {
                if !caps.motion_nodes {
                    return Err(PipelineError::CapabilityMissing(format!(
                        "{MOTION_LOADER_NODE} is not installed on the job server"
                    )));
                }
                let checkpoint = select_motion_checkpoint(
                    &caps.checkpoints,
                    self.preferred_checkpoint.as_deref(),
                )?;
                if !caps.advanced_video_nodes {
                    tracing::warn!("{ADVANCED_VIDEO_NODE} not installed, falling back to frame output");
                }
                build_image_to_video_graph(
                    &request.image.reference,
                    &request.prompt,
                    request.seed,
                    settings,
                    &checkpoint,
                    caps.advanced_video_nodes,
                )?
            }
            VideoModel::LargeVideoModel => {
                if settings.loop_mode {
                    tracing::warn!("Loop mode is not available with the large video model, ignoring it");
                }
                if !caps.missing_large_model_nodes.is_empty() {
                    return Err(PipelineError::CapabilityMissing(format!(
                        "Job server lacks nodes: {}",
                        caps.missing_large_model_nodes.join(", ")
                    )));
                }
                build_large_video_model_graph(
                    &request.image.reference,
                    &request.prompt,
                    request.seed,
                    settings.width,
                    settings.height,
                    settings.frame_count,
                    settings.steps,
                    settings.cfg,
                )?
            }
        };

        let (job_id, artifact) = self.poller.run(graph, JobKind::Video, scene_index).await?;
        let media = self.materialize(artifact, settings).await?;
        Ok(GeneratedVideo { job_id, media })
    }
}
