use reel_comfyui::transport::TransportError;
use reel_comfyui::workflow::WorkflowError;
use reel_core::clip::Clip;
use reel_core::error::CoreError;
use reel_core::ffmpeg::FfmpegError;

use crate::stitcher::StitchError;

/// Failures of one unit of pipeline work.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Network, timeout or non-2xx answer from the job transport.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The remote job reported a runtime failure (already classified).
    #[error("Generation failed: {message}")]
    BackendExecution { message: String, out_of_memory: bool },

    /// The job finished but left nothing to fetch.
    #[error("Job finished without a usable output: {0}")]
    NoArtifact(String),

    /// The target cannot run the requested pipeline.
    #[error("Missing capability: {0}")]
    CapabilityMissing(String),

    /// Bounded polling ran out of attempts.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// One clip of a multi-clip sequence failed; `index` is 1-based.
    #[error("Clip {index} of {total} failed: {source}")]
    ClipFailed {
        index: u32,
        total: u32,
        #[source]
        source: Box<PipelineError>,
        /// Clips that completed before the failure.
        completed: Vec<Clip>,
    },

    #[error(transparent)]
    Stitch(#[from] StitchError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The caller asked for work on an empty input.
    #[error("Nothing to do: {0}")]
    EmptyInput(String),

    /// Local media processing (frame extraction, encoding) failed.
    #[error("Media processing failed: {0}")]
    Media(String),

    #[error("Archive error: {0}")]
    Archive(String),
}

impl PipelineError {
    /// Whether the caller asked for nothing (a caller bug, not a fault).
    pub fn is_nothing_to_do(&self) -> bool {
        match self {
            PipelineError::EmptyInput(_) => true,
            PipelineError::Stitch(e) => e.is_nothing_to_do(),
            _ => false,
        }
    }
}

impl From<WorkflowError> for PipelineError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::CapabilityMissing(msg) => PipelineError::CapabilityMissing(msg),
            WorkflowError::InvalidInput(msg) => PipelineError::InvalidInput(msg),
        }
    }
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => PipelineError::InvalidInput(msg),
            CoreError::EmptyInput(msg) => PipelineError::EmptyInput(msg),
            CoreError::Internal(msg) => PipelineError::Media(msg),
        }
    }
}

impl From<FfmpegError> for PipelineError {
    fn from(err: FfmpegError) -> Self {
        PipelineError::Media(err.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Media(err.to_string())
    }
}
