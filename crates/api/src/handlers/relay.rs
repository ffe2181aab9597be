//! Relay endpoint: forwards one job-control action to the job server named
//! in the request and answers with the normalized envelope.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use reel_comfyui::relay::{self, NormalizedResponse, RelayRequest};
use reel_comfyui::transport::TransportError;

use crate::state::AppState;

/// POST /api/v1/relay
///
/// The HTTP status mirrors `NormalizedResponse::status`, and the body is
/// always the envelope, including for malformed requests.
pub async fn submit(
    State(state): State<AppState>,
    request: Result<Json<RelayRequest>, JsonRejection>,
) -> impl IntoResponse {
    let response = match request {
        Ok(Json(request)) => {
            tracing::debug!(action = ?request.action, target = %request.target_address, "Relaying");
            relay::dispatch(&state.http, state.relay_call_timeout(), request).await
        }
        Err(rejection) => {
            NormalizedResponse::failure(&TransportError::Relay(rejection.body_text()))
        }
    };
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(response))
}
