//! Hosted prediction API backend.
//!
//! The hosted GPU service runs a model per request:
//! `POST /v1/models/{model}/predictions` creates a prediction, which is then
//! polled at `GET /v1/predictions/{id}` until it succeeds or fails. Outputs
//! are URLs. The wait is bounded by a wall-clock timeout.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};

use reel_comfyui::history::classify_backend_error;
use reel_comfyui::transport::TransportError;
use reel_core::clip::{mime_for_filename, MediaRef};
use reel_core::scene::{seed_image_dimensions, SceneImage};
use reel_core::settings::GenerationSettings;
use reel_core::types::{JobId, Seed};
use reel_events::bus::{JOB_SUBMITTED, JOB_SUCCEEDED};

use crate::backend::{GeneratedVideo, PreparedImage, VideoBackend, VideoRequest};
use crate::clock::Clock;
use crate::error::PipelineError;
use crate::reporter::ProgressReporter;

pub const DEFAULT_HOSTED_BASE_URL: &str = "https://api.replicate.com";

/// Default wall-clock limit for one prediction.
pub const DEFAULT_HOSTED_TIMEOUT: Duration = Duration::from_secs(600);

const DEFAULT_HOSTED_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Connection settings for the hosted API.
#[derive(Debug, Clone)]
pub struct HostedConfig {
    pub base_url: String,
    pub api_token: String,
    /// `owner/name` of the image-to-video model.
    pub video_model: String,
    /// `owner/name` of a text-to-image model, for scenes without an image.
    pub image_model: Option<String>,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl HostedConfig {
    pub fn new(api_token: impl Into<String>, video_model: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_HOSTED_BASE_URL.to_string(),
            api_token: api_token.into(),
            video_model: video_model.into(),
            image_model: None,
            poll_interval: DEFAULT_HOSTED_POLL_INTERVAL,
            timeout: DEFAULT_HOSTED_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// First URL in a prediction output (a string or a list of strings).
fn output_url(output: &Value) -> Option<String> {
    match output {
        Value::String(url) => Some(url.clone()),
        Value::Array(items) => items.iter().find_map(|v| v.as_str().map(str::to_string)),
        Value::Object(map) => ["video", "url", "output"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str).map(str::to_string)),
        _ => None,
    }
}

/// [`VideoBackend`] for the hosted prediction API.
pub struct HostedBackend {
    client: reqwest::Client,
    config: HostedConfig,
    clock: Arc<dyn Clock>,
    reporter: ProgressReporter,
}

impl HostedBackend {
    pub fn new(config: HostedConfig, clock: Arc<dyn Clock>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            config,
            clock,
            reporter: ProgressReporter::disabled(),
        }
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn create_prediction(&self, model: &str, input: Value) -> Result<Prediction, TransportError> {
        let response = self
            .client
            .post(format!("{}/v1/models/{model}/predictions", self.config.base_url))
            .bearer_auth(&self.config.api_token)
            .json(&json!({ "input": input }))
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn get_prediction(&self, id: &str) -> Result<Prediction, TransportError> {
        let response = self
            .client
            .get(format!("{}/v1/predictions/{id}", self.config.base_url))
            .bearer_auth(&self.config.api_token)
            .send()
            .await?;
        Self::parse(response).await
    }

    /// Create a prediction and wait for its output URL.
    async fn run_prediction(
        &self,
        model: &str,
        input: Value,
        scene_index: Option<usize>,
    ) -> Result<(JobId, String), PipelineError> {
        let started = self.clock.now();
        let mut prediction = self.create_prediction(model, input).await?;
        let job_id = JobId::from(prediction.id.clone());
        tracing::info!(job_id = %job_id, model, "Hosted prediction created");
        self.reporter.emit(
            JOB_SUBMITTED,
            scene_index,
            json!({ "job_id": job_id, "backend": "hosted" }),
        );

        loop {
            match prediction.status.as_str() {
                "succeeded" => {
                    let url = prediction.output.as_ref().and_then(output_url).ok_or_else(|| {
                        PipelineError::NoArtifact(format!(
                            "prediction {job_id} succeeded without an output URL"
                        ))
                    })?;
                    self.reporter
                        .emit(JOB_SUCCEEDED, scene_index, json!({ "job_id": job_id }));
                    return Ok((job_id, url));
                }
                "failed" | "canceled" => {
                    let raw = match &prediction.error {
                        Some(Value::String(s)) => s.clone(),
                        Some(other) => other.to_string(),
                        None => format!("prediction {}", prediction.status),
                    };
                    let failure = classify_backend_error(&raw);
                    tracing::error!(job_id = %job_id, error = %failure.message, "Hosted prediction failed");
                    return Err(PipelineError::BackendExecution {
                        message: failure.message,
                        out_of_memory: failure.out_of_memory,
                    });
                }
                _ => {}
            }

            if self.clock.now().saturating_sub(started) >= self.config.timeout {
                return Err(PipelineError::Timeout(format!(
                    "hosted prediction {job_id} did not finish within {}s",
                    self.config.timeout.as_secs()
                )));
            }
            self.clock.sleep(self.config.poll_interval).await;
            prediction = self.get_prediction(&prediction.id).await?;
        }
    }
}

#[async_trait::async_trait]
impl VideoBackend for HostedBackend {
    fn name(&self) -> &'static str {
        "hosted"
    }

    async fn prepare_image(
        &self,
        image: &SceneImage,
        seed: Seed,
        settings: &GenerationSettings,
        _label: &str,
    ) -> Result<PreparedImage, PipelineError> {
        let reference = match image {
            SceneImage::Url { url } => url.clone(),
            SceneImage::Uploaded { filename, bytes } => {
                seed_image_dimensions(bytes)?;
                format!(
                    "data:{};base64,{}",
                    mime_for_filename(filename),
                    BASE64.encode(bytes)
                )
            }
            SceneImage::Generate { prompt } => {
                let model = self.config.image_model.as_deref().ok_or_else(|| {
                    PipelineError::CapabilityMissing(
                        "No hosted image model configured for prompt-only scenes".into(),
                    )
                })?;
                let input = json!({
                    "prompt": prompt,
                    "seed": seed,
                    "width": settings.width,
                    "height": settings.height,
                });
                self.run_prediction(model, input, None).await?.1
            }
        };
        Ok(PreparedImage { reference })
    }

    async fn generate_video(
        &self,
        request: &VideoRequest,
        scene_index: Option<usize>,
    ) -> Result<GeneratedVideo, PipelineError> {
        let settings = &request.settings;
        let input = json!({
            "image": request.image.reference,
            "prompt": request.prompt,
            "seed": request.seed,
            "num_frames": settings.frame_count,
            "frames_per_second": settings.frame_rate,
            "width": settings.width,
            "height": settings.height,
            "camera_motion": settings.motion_effect.id(),
            "motion_strength": settings.motion_strength,
        });
        let (job_id, url) = self
            .run_prediction(&self.config.video_model, input, scene_index)
            .await?;
        Ok(GeneratedVideo {
            job_id,
            media: MediaRef::url(url),
        })
    }
}
