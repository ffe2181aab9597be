//! Clip stitcher: lossless stream-copy concatenation of an ordered clip
//! sequence, with optional soundtrack muxing.
//!
//! The ffmpeg engine is probed once per stitcher and stitch calls are
//! serialized. All working files live in a temporary directory that is
//! removed when the call returns, whether it succeeded or not.

use std::path::PathBuf;

use tokio::sync::{Mutex, OnceCell};

use reel_comfyui::transport::TransportError;
use reel_core::clip::{mime_for_filename, Clip, MediaRef, StitchJob};
use reel_core::ffmpeg::{self, FfmpegError, StreamSignature};
use reel_core::naming::{clip_work_filename, extension_of};
use reel_events::bus::STITCH_STAGE;

use crate::fetch::{fetch_media, media_mime};
use crate::reporter::ProgressReporter;

const MANIFEST_FILENAME: &str = "concat.txt";
const CONCAT_FILENAME: &str = "concat.mp4";

#[derive(Debug, thiserror::Error)]
pub enum StitchError {
    /// No clips were supplied.
    #[error("No clips to stitch")]
    EmptyInput,

    /// Clip `index` (0-based position in the sequence) could not be fetched.
    #[error("Failed to download clip {index}: {source}")]
    Download {
        index: usize,
        #[source]
        source: TransportError,
    },

    /// Clips cannot be joined without re-encoding.
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error(transparent)]
    Engine(#[from] FfmpegError),

    #[error("Stitch I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StitchError {
    pub fn is_nothing_to_do(&self) -> bool {
        matches!(self, StitchError::EmptyInput)
    }
}

/// The stitched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StitchOutput {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Coarse stages reported while stitching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StitchStage {
    LoadingEngine,
    Downloading { current: usize, total: usize },
    Concatenating,
    Muxing,
    Complete,
}

impl StitchStage {
    pub fn label(&self) -> &'static str {
        match self {
            StitchStage::LoadingEngine => "loading_engine",
            StitchStage::Downloading { .. } => "downloading",
            StitchStage::Concatenating => "concatenating",
            StitchStage::Muxing => "muxing",
            StitchStage::Complete => "complete",
        }
    }

    /// Percentage of the whole stitch at the start of this stage.
    pub fn percent(&self) -> u8 {
        match *self {
            StitchStage::LoadingEngine => 0,
            StitchStage::Downloading { current, total } => {
                let total = total.max(1);
                (10 + current.saturating_sub(1) * 50 / total) as u8
            }
            StitchStage::Concatenating => 60,
            StitchStage::Muxing => 85,
            StitchStage::Complete => 100,
        }
    }
}

pub struct ClipStitcher {
    engine: OnceCell<String>,
    lock: Mutex<()>,
    http: reqwest::Client,
    reporter: ProgressReporter,
    scratch_root: Option<PathBuf>,
}

impl Default for ClipStitcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ClipStitcher {
    pub fn new() -> Self {
        Self {
            engine: OnceCell::new(),
            lock: Mutex::new(()),
            http: reqwest::Client::new(),
            reporter: ProgressReporter::disabled(),
            scratch_root: None,
        }
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Create working directories under `root` instead of the system
    /// temp directory.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    fn scratch_dir(&self) -> std::io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("stitch-");
        match self.scratch_root.as_deref() {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }

    /// Stitch a plain clip list; an empty list is reported as nothing to do.
    pub async fn stitch_clips(
        &self,
        clips: Vec<Clip>,
        output_name: &str,
    ) -> Result<StitchOutput, StitchError> {
        let job = StitchJob::new(clips, output_name).map_err(|_| StitchError::EmptyInput)?;
        self.stitch(&job).await
    }

    pub async fn stitch(&self, job: &StitchJob) -> Result<StitchOutput, StitchError> {
        let clips = job.clips();
        if clips.is_empty() {
            return Err(StitchError::EmptyInput);
        }

        if job.is_passthrough() {
            let media = &clips[0].media;
            let bytes = fetch_media(&self.http, media)
                .await
                .map_err(|source| StitchError::Download { index: 0, source })?;
            let mime_type = media_mime(media)
                .unwrap_or_else(|| mime_for_filename(&job.output_name).to_string());
            self.report(StitchStage::Complete);
            tracing::info!(output = %job.output_name, "Single clip passed through");
            return Ok(StitchOutput {
                filename: job.output_name.clone(),
                mime_type,
                bytes,
            });
        }

        let extensions = clips
            .iter()
            .enumerate()
            .map(|(i, clip)| clip_extension(i, &clip.media))
            .collect::<Result<Vec<_>, _>>()?;

        let _guard = self.lock.lock().await;

        self.report(StitchStage::LoadingEngine);
        let engine = self
            .engine
            .get_or_try_init(ffmpeg::ffmpeg_version)
            .await?;
        tracing::debug!(engine = %engine, "Concatenation engine ready");

        let work = self.scratch_dir()?;
        let total = clips.len();
        let mut paths: Vec<PathBuf> = Vec::with_capacity(total);
        let mut signature: Option<StreamSignature> = None;

        for (i, clip) in clips.iter().enumerate() {
            self.report(StitchStage::Downloading {
                current: i + 1,
                total,
            });
            let bytes = fetch_media(&self.http, &clip.media)
                .await
                .map_err(|source| StitchError::Download { index: i, source })?;
            let path = work.path().join(clip_work_filename(i, &extensions[i]));
            tokio::fs::write(&path, bytes).await?;

            let probe = ffmpeg::probe_video(&path).await?;
            let current = ffmpeg::stream_signature(&probe).ok_or_else(|| {
                StitchError::UnsupportedInput(format!("clip {i} has no video stream"))
            })?;
            match &signature {
                None => signature = Some(current),
                Some(first) if *first != current => {
                    return Err(StitchError::UnsupportedInput(format!(
                        "clip {i} is {current} but clip 0 is {first}; stream copy needs identical parameters"
                    )));
                }
                Some(_) => {}
            }
            paths.push(path);
        }

        self.report(StitchStage::Concatenating);
        let manifest = work.path().join(MANIFEST_FILENAME);
        tokio::fs::write(&manifest, ffmpeg::concat_manifest(&paths)).await?;
        let concatenated = work.path().join(CONCAT_FILENAME);
        ffmpeg::concat_stream_copy(&manifest, &concatenated).await?;

        let output = match &job.audio {
            Some(audio) => {
                self.report(StitchStage::Muxing);
                let audio_bytes = fetch_media(&self.http, audio)
                    .await
                    .map_err(|source| StitchError::Download {
                        index: total,
                        source,
                    })?;
                let audio_ext = media_mime(audio)
                    .as_deref()
                    .and_then(audio_extension)
                    .unwrap_or("m4a");
                let audio_path = work.path().join(format!("audio.{audio_ext}"));
                tokio::fs::write(&audio_path, audio_bytes).await?;
                let muxed = work.path().join("muxed.mp4");
                ffmpeg::mux_audio(&concatenated, &audio_path, &muxed).await?;
                muxed
            }
            None => concatenated,
        };

        let bytes = tokio::fs::read(&output).await?;
        self.report(StitchStage::Complete);
        tracing::info!(
            clips = total,
            output = %job.output_name,
            size = bytes.len(),
            "Clips stitched",
        );
        Ok(StitchOutput {
            filename: job.output_name.clone(),
            mime_type: "video/mp4".to_string(),
            bytes,
        })
    }

    fn report(&self, stage: StitchStage) {
        let mut payload = serde_json::json!({
            "stage": stage.label(),
            "percent": stage.percent(),
        });
        if let StitchStage::Downloading { current, total } = stage {
            payload["current"] = current.into();
            payload["total"] = total.into();
        }
        self.reporter.emit(STITCH_STAGE, None, payload);
    }
}

/// Anything that can turn a [`StitchJob`] into one file.
#[async_trait::async_trait]
pub trait Stitcher: Send + Sync {
    async fn stitch(&self, job: &StitchJob) -> Result<StitchOutput, StitchError>;
}

#[async_trait::async_trait]
impl Stitcher for ClipStitcher {
    async fn stitch(&self, job: &StitchJob) -> Result<StitchOutput, StitchError> {
        ClipStitcher::stitch(self, job).await
    }
}

/// Working-file extension for a clip, rejecting inputs that cannot be
/// stream-copied into an MP4.
fn clip_extension(index: usize, media: &MediaRef) -> Result<String, StitchError> {
    let ext = match media_mime(media).as_deref() {
        Some("video/mp4") => "mp4".to_string(),
        Some("video/webm") => "webm".to_string(),
        Some("video/quicktime") => "mov".to_string(),
        Some("video/x-matroska") => "mkv".to_string(),
        Some(other) if other.starts_with("image/") => {
            return Err(StitchError::UnsupportedInput(format!(
                "clip {index} is an image ({other}), not a video"
            )));
        }
        _ => match media {
            MediaRef::Url { url } => extension_of(url).unwrap_or_else(|| "mp4".to_string()),
            MediaRef::Data { .. } => "mp4".to_string(),
        },
    };
    Ok(ext)
}

fn audio_extension(mime: &str) -> Option<&'static str> {
    match mime {
        "audio/mpeg" => Some("mp3"),
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "audio/aac" => Some("aac"),
        "audio/ogg" => Some("ogg"),
        "audio/mp4" => Some("m4a"),
        _ => None,
    }
}
