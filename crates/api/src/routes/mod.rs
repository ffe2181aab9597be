pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// POST /relay                   forward one job-control action to a job server
/// POST /stitch                  concatenate clips into one video
/// GET  /presets                 list generation presets
/// GET  /presets/{name}          one preset's settings
/// POST /plan                    split a duration into equal clips
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/relay", post(handlers::relay::submit))
        .route("/stitch", post(handlers::stitch::stitch))
        .route("/presets", get(handlers::settings::list_presets))
        .route("/presets/{name}", get(handlers::settings::get_preset))
        .route("/plan", post(handlers::settings::plan))
}
