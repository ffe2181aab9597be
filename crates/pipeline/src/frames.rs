//! Last-frame extraction for clip continuity.

use reel_core::ffmpeg;

use crate::error::PipelineError;

/// Turns encoded video bytes into a still of its final frame.
#[async_trait::async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Return the last decodable frame of `video` as PNG bytes.
    async fn extract_last_frame(&self, video: &[u8]) -> Result<Vec<u8>, PipelineError>;
}

/// [`FrameExtractor`] backed by the `ffmpeg` binary.
///
/// Works in a scratch directory that is removed when the call returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegFrameExtractor;

#[async_trait::async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn extract_last_frame(&self, video: &[u8]) -> Result<Vec<u8>, PipelineError> {
        if video.is_empty() {
            return Err(PipelineError::EmptyInput("no video bytes to extract a frame from".into()));
        }
        let work = tempfile::tempdir()?;
        let input = work.path().join("clip.mp4");
        let output = work.path().join("last_frame.png");
        tokio::fs::write(&input, video).await?;

        ffmpeg::extract_last_frame(&input, &output).await?;

        let frame = tokio::fs::read(&output).await?;
        tracing::debug!(bytes = frame.len(), "Extracted last frame");
        Ok(frame)
    }
}
