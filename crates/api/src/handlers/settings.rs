//! Read-only settings endpoints: presets and clip planning.

use axum::extract::Path;
use axum::Json;
use serde::{Deserialize, Serialize};

use reel_core::clip_plan::{plan_clips, ClipPlan};
use reel_core::settings::{
    preset, GenerationSettings, SettingsOverrides, PRESET_BALANCED, PRESET_NAMES,
};

use crate::error::AppResult;
use crate::response::DataResponse;

#[derive(Debug, Serialize)]
pub struct PresetEntry {
    pub name: &'static str,
    pub settings: GenerationSettings,
}

/// GET /api/v1/presets
pub async fn list_presets() -> AppResult<Json<DataResponse<Vec<PresetEntry>>>> {
    let data = PRESET_NAMES
        .iter()
        .map(|&name| -> AppResult<PresetEntry> {
            Ok(PresetEntry {
                name,
                settings: preset(name)?,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;
    Ok(Json(DataResponse { data }))
}

/// GET /api/v1/presets/{name}
pub async fn get_preset(
    Path(name): Path<String>,
) -> AppResult<Json<DataResponse<GenerationSettings>>> {
    Ok(Json(DataResponse { data: preset(&name)? }))
}

/// Request body for `POST /api/v1/plan`.
#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    pub duration_secs: f64,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub overrides: SettingsOverrides,
}

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub plan: ClipPlan,
    pub settings: GenerationSettings,
}

/// POST /api/v1/plan
///
/// Resolves preset plus overrides, then plans the clip split.
pub async fn plan(Json(input): Json<PlanRequest>) -> AppResult<Json<DataResponse<PlanResponse>>> {
    let base = preset(input.preset.as_deref().unwrap_or(PRESET_BALANCED))?;
    let settings = input.overrides.apply(base)?;
    let plan = plan_clips(input.duration_secs, &settings)?;
    Ok(Json(DataResponse {
        data: PlanResponse { plan, settings },
    }))
}
