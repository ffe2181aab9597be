//! Stitch endpoint: concatenates remote clips into one downloadable file.

use axum::extract::State;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use reel_core::clip::{Clip, MediaRef, StitchJob};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

const DEFAULT_OUTPUT_NAME: &str = "stitched.mp4";

/// Request body for `POST /api/v1/stitch`.
#[derive(Debug, Deserialize)]
pub struct StitchRequest {
    /// Clip URLs in playback order.
    pub clips: Vec<String>,
    #[serde(default)]
    pub output_name: Option<String>,
    /// Soundtrack to mux over the stitched video.
    #[serde(default)]
    pub audio_url: Option<String>,
}

impl StitchRequest {
    fn into_job(self) -> AppResult<StitchJob> {
        if let Some(blank) = self.clips.iter().position(|u| u.trim().is_empty()) {
            return Err(AppError::BadRequest(format!("clip {blank} has an empty URL")));
        }
        let clips = self
            .clips
            .into_iter()
            .enumerate()
            .map(|(i, url)| Clip::scene(MediaRef::url(url.trim()), i))
            .collect();
        let name = self
            .output_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OUTPUT_NAME.to_string());

        let job = StitchJob::new(clips, name)?;
        Ok(match self.audio_url.filter(|u| !u.trim().is_empty()) {
            Some(audio) => job.with_audio(MediaRef::url(audio)),
            None => job,
        })
    }
}

/// POST /api/v1/stitch
///
/// Responds with the stitched bytes as an attachment.
pub async fn stitch(
    State(state): State<AppState>,
    Json(input): Json<StitchRequest>,
) -> AppResult<Response> {
    let job = input.into_job()?;
    tracing::info!(clips = job.clips().len(), output = %job.output_name, "Stitch requested");

    let output = state.stitcher.stitch(&job).await?;

    let disposition = format!("attachment; filename=\"{}\"", output.filename.replace('"', ""));
    Ok((
        [
            (CONTENT_TYPE, output.mime_type.clone()),
            (CONTENT_DISPOSITION, disposition),
        ],
        output.bytes,
    )
        .into_response())
}
