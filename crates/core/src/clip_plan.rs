//! Long-clip planning: split a requested duration into equal sub-clips.
//!
//! A single job can only produce `frame_count / frame_rate` seconds of
//! video. Longer requests are partitioned into `N` clips that each get an
//! equal share of the duration (not a short remainder clip at the end).

use serde::Serialize;

use crate::error::CoreError;
use crate::settings::GenerationSettings;
use crate::types::Seed;

/// Hard ceiling on clips per long-video request to prevent runaway loops.
pub const MAX_CLIPS_PER_REQUEST: u32 = 200;

/// Result of [`plan_clips`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClipPlan {
    pub clip_count: u32,
    pub per_clip_duration: f64,
    pub adjusted_frame_count: u32,
}

impl ClipPlan {
    /// Total duration covered by the plan.
    pub fn total_duration(&self) -> f64 {
        self.per_clip_duration * f64::from(self.clip_count)
    }
}

/// Plan how many equal clips are needed to cover `requested_duration_secs`.
///
/// - `max_clip = frame_count / frame_rate`
/// - `clip_count = ceil(requested / max_clip)` (at least 1)
/// - `per_clip = requested / clip_count`
/// - `adjusted_frame_count = round(per_clip * frame_rate)` (at least 1)
pub fn plan_clips(
    requested_duration_secs: f64,
    settings: &GenerationSettings,
) -> Result<ClipPlan, CoreError> {
    if !requested_duration_secs.is_finite() || requested_duration_secs <= 0.0 {
        return Err(CoreError::Validation(format!(
            "Requested duration must be positive, got {requested_duration_secs}"
        )));
    }
    if settings.frame_rate == 0 || settings.frame_count == 0 {
        return Err(CoreError::Validation(
            "frame_count and frame_rate must be positive".to_string(),
        ));
    }

    let max_clip = settings.clip_duration_secs();
    let raw = (requested_duration_secs / max_clip).ceil();
    if raw > f64::from(MAX_CLIPS_PER_REQUEST) {
        return Err(CoreError::Validation(format!(
            "Requested duration {requested_duration_secs}s needs {raw} clips (max {MAX_CLIPS_PER_REQUEST})"
        )));
    }
    let clip_count = (raw as u32).max(1);
    let per_clip_duration = requested_duration_secs / f64::from(clip_count);
    let adjusted_frame_count =
        ((per_clip_duration * f64::from(settings.frame_rate)).round() as u32).max(1);

    Ok(ClipPlan {
        clip_count,
        per_clip_duration,
        adjusted_frame_count,
    })
}

/// Seed for the clip at `clip_index`, so consecutive clips differ.
pub fn clip_seed(base_seed: Seed, clip_index: u32) -> Seed {
    base_seed.wrapping_add(u64::from(clip_index))
}
