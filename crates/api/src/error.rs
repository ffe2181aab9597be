use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use reel_core::error::CoreError;
use reel_pipeline::error::PipelineError;
use reel_pipeline::stitcher::StitchError;

/// Application-level error type for HTTP handlers.
///
/// Produces `{ "error": ..., "code": ... }` JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Stitch(#[from] StitchError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type AppResult<T> = Result<T, AppError>;

fn internal(msg: &dyn std::fmt::Display) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %msg, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

fn classify_stitch_error(err: &StitchError) -> (StatusCode, &'static str, String) {
    match err {
        StitchError::EmptyInput => (StatusCode::BAD_REQUEST, "NOTHING_TO_DO", err.to_string()),
        StitchError::UnsupportedInput(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "UNSUPPORTED_INPUT",
            err.to_string(),
        ),
        StitchError::Download { .. } => (StatusCode::BAD_GATEWAY, "DOWNLOAD_FAILED", err.to_string()),
        StitchError::Engine(_) | StitchError::Io(_) => {
            tracing::error!(error = %err, "Stitch failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "STITCH_FAILED", err.to_string())
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => match core {
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::EmptyInput(_) => {
                    (StatusCode::BAD_REQUEST, "NOTHING_TO_DO", core.to_string())
                }
                CoreError::Internal(msg) => internal(msg),
            },
            AppError::Stitch(err) => classify_stitch_error(err),
            AppError::Pipeline(PipelineError::Stitch(err)) => classify_stitch_error(err),
            AppError::Pipeline(err) if err.is_nothing_to_do() => {
                (StatusCode::BAD_REQUEST, "NOTHING_TO_DO", err.to_string())
            }
            AppError::Pipeline(PipelineError::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Pipeline(PipelineError::Transport(e)) => {
                (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", e.to_string())
            }
            AppError::Pipeline(err) => internal(err),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => internal(msg),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
