//! Scenes: the narrative units that drive the batch pipeline.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Generation status of a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneStatus {
    Pending,
    Generating,
    Complete,
    Error,
}

/// Where a scene's source image comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SceneImage {
    /// Image bytes supplied by the user.
    Uploaded { filename: String, bytes: Vec<u8> },
    /// Image hosted elsewhere; fetched before upload.
    Url { url: String },
    /// Image still to be generated from a text prompt.
    Generate { prompt: String },
}

/// One scene of the video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub image: SceneImage,
    /// Motion / visual prompt for the image-to-video job.
    pub prompt: String,
    pub duration_secs: f64,
    #[serde(default)]
    pub start_secs: f64,
    #[serde(default)]
    pub end_secs: f64,
    #[serde(default = "default_status")]
    pub status: SceneStatus,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_status() -> SceneStatus {
    SceneStatus::Pending
}

impl Scene {
    pub fn new(image: SceneImage, prompt: impl Into<String>, duration_secs: f64) -> Self {
        Self {
            image,
            prompt: prompt.into(),
            duration_secs,
            start_secs: 0.0,
            end_secs: 0.0,
            status: SceneStatus::Pending,
            error: None,
        }
    }

    pub fn mark_generating(&mut self) {
        self.status = SceneStatus::Generating;
        self.error = None;
    }

    pub fn mark_complete(&mut self) {
        self.status = SceneStatus::Complete;
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = SceneStatus::Error;
        self.error = Some(message.into());
    }
}

/// Decode just enough of an uploaded seed image to read its dimensions.
///
/// Rejects bytes that are not a PNG, JPEG or WebP image before they are
/// uploaded to the job server.
pub fn seed_image_dimensions(bytes: &[u8]) -> Result<(u32, u32), CoreError> {
    image::ImageReader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CoreError::Validation(format!("Unreadable seed image: {e}")))?
        .into_dimensions()
        .map_err(|e| CoreError::Validation(format!("Unsupported seed image: {e}")))
}

/// Assign start/end offsets so scenes play back to back.
///
/// Returns the total timeline length in seconds.
pub fn layout_timeline(scenes: &mut [Scene]) -> Result<f64, CoreError> {
    let mut cursor = 0.0;
    for (i, scene) in scenes.iter_mut().enumerate() {
        if !scene.duration_secs.is_finite() || scene.duration_secs <= 0.0 {
            return Err(CoreError::Validation(format!(
                "Scene {} has non-positive duration {}",
                i + 1,
                scene.duration_secs
            )));
        }
        scene.start_secs = cursor;
        cursor += scene.duration_secs;
        scene.end_secs = cursor;
    }
    Ok(cursor)
}
