//! Batch manifest: the JSON file a worker run is driven by.
//!
//! ```json
//! {
//!   "preset": "balanced",
//!   "overrides": { "frame_rate": 12 },
//!   "seed": 42,
//!   "transitions": true,
//!   "audio": "song.mp3",
//!   "output_name": "lyric_video.mp4",
//!   "archive": true,
//!   "scenes": [
//!     { "prompt": "neon rain", "duration_secs": 4.0, "image": { "path": "a.png" } },
//!     { "prompt": "sunrise", "duration_secs": 2.0, "image": { "generate": "a red sunrise" } }
//!   ]
//! }
//! ```
//!
//! Relative paths resolve against the manifest's directory.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::Deserialize;

use reel_core::clip::{mime_for_filename, MediaRef};
use reel_core::scene::{Scene, SceneImage};
use reel_core::settings::{preset, SettingsOverrides, PRESET_BALANCED};
use reel_core::types::Seed;
use reel_pipeline::batch::BatchRequest;

const DEFAULT_OUTPUT_NAME: &str = "lyric_video.mp4";

#[derive(Debug, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default)]
    pub overrides: SettingsOverrides,
    /// Random when omitted.
    #[serde(default)]
    pub seed: Option<Seed>,
    #[serde(default)]
    pub transitions: bool,
    /// Local path or `http(s)` URL of a soundtrack.
    #[serde(default)]
    pub audio: Option<String>,
    #[serde(default)]
    pub output_name: Option<String>,
    /// Also write a zip of the individual clips next to the video.
    #[serde(default)]
    pub archive: bool,
    pub scenes: Vec<ManifestScene>,
}

fn default_preset() -> String {
    PRESET_BALANCED.to_string()
}

#[derive(Debug, Deserialize)]
pub struct ManifestScene {
    pub prompt: String,
    pub duration_secs: f64,
    pub image: ManifestImage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestImage {
    Path(PathBuf),
    Url(String),
    Generate(String),
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

impl Manifest {
    pub async fn load(path: &Path) -> anyhow::Result<(Self, PathBuf)> {
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading manifest {}", path.display()))?;
        let manifest: Manifest = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing manifest {}", path.display()))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok((manifest, base_dir))
    }

    /// Resolve settings, read local files and build the pipeline request.
    pub async fn into_request(self, base_dir: &Path) -> anyhow::Result<BatchRequest> {
        if self.scenes.is_empty() {
            bail!("manifest has no scenes");
        }
        let settings = self
            .overrides
            .apply(preset(&self.preset)?)
            .context("merging overrides onto preset")?;

        let mut scenes = Vec::with_capacity(self.scenes.len());
        for (i, scene) in self.scenes.into_iter().enumerate() {
            let image = match scene.image {
                ManifestImage::Path(path) => {
                    let full = base_dir.join(&path);
                    let bytes = tokio::fs::read(&full)
                        .await
                        .with_context(|| format!("scene {i}: reading {}", full.display()))?;
                    let filename = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| format!("scene_{i}.png"));
                    SceneImage::Uploaded { filename, bytes }
                }
                ManifestImage::Url(url) => SceneImage::Url { url },
                ManifestImage::Generate(prompt) => SceneImage::Generate { prompt },
            };
            scenes.push(Scene::new(image, scene.prompt, scene.duration_secs));
        }

        let audio = match self.audio {
            Some(location) if is_remote(&location) => Some(MediaRef::url(location)),
            Some(location) => {
                let full = base_dir.join(&location);
                let bytes = tokio::fs::read(&full)
                    .await
                    .with_context(|| format!("reading audio {}", full.display()))?;
                Some(MediaRef::data(audio_mime(&location), bytes))
            }
            None => None,
        };

        Ok(BatchRequest {
            scenes,
            settings,
            seed: self.seed.unwrap_or_else(rand::random),
            transitions: self.transitions,
            audio,
            output_name: self
                .output_name
                .unwrap_or_else(|| DEFAULT_OUTPUT_NAME.to_string()),
        })
    }
}

fn audio_mime(filename: &str) -> String {
    let lower = filename.to_ascii_lowercase();
    if lower.ends_with(".mp3") {
        "audio/mpeg".to_string()
    } else if lower.ends_with(".wav") {
        "audio/wav".to_string()
    } else if lower.ends_with(".m4a") || lower.ends_with(".aac") {
        "audio/mp4".to_string()
    } else {
        mime_for_filename(filename).to_string()
    }
}
