//! Generation parameter registry and named presets.
//!
//! [`GenerationSettings`] is an immutable value built once per job
//! (preset defaults merged with [`SettingsOverrides`]) and threaded
//! explicitly through the workflow builders and the poller.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Motion effects
// ---------------------------------------------------------------------------

/// Fixed camera-movement style applied to an image-to-video job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionEffect {
    /// Sentinel: ask the motion classifier to pick an effect for the prompt.
    Automatic,
    /// No camera motion LoRA is applied.
    Static,
    ZoomIn,
    ZoomOut,
    PanLeft,
    PanRight,
    TiltUp,
    TiltDown,
    RollClockwise,
    RollAnticlockwise,
}

impl MotionEffect {
    /// Every concrete (non-sentinel) effect.
    pub const CONCRETE: [MotionEffect; 9] = [
        MotionEffect::Static,
        MotionEffect::ZoomIn,
        MotionEffect::ZoomOut,
        MotionEffect::PanLeft,
        MotionEffect::PanRight,
        MotionEffect::TiltUp,
        MotionEffect::TiltDown,
        MotionEffect::RollClockwise,
        MotionEffect::RollAnticlockwise,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Static => "static",
            Self::ZoomIn => "zoom_in",
            Self::ZoomOut => "zoom_out",
            Self::PanLeft => "pan_left",
            Self::PanRight => "pan_right",
            Self::TiltUp => "tilt_up",
            Self::TiltDown => "tilt_down",
            Self::RollClockwise => "roll_clockwise",
            Self::RollAnticlockwise => "roll_anticlockwise",
        }
    }

    /// Motion LoRA file the motion-diffusion pipeline loads for this effect.
    ///
    /// `None` for [`Static`](Self::Static) and the unresolved
    /// [`Automatic`](Self::Automatic) sentinel.
    pub fn motion_lora(self) -> Option<&'static str> {
        match self {
            Self::Automatic | Self::Static => None,
            Self::ZoomIn => Some("v2_lora_ZoomIn.ckpt"),
            Self::ZoomOut => Some("v2_lora_ZoomOut.ckpt"),
            Self::PanLeft => Some("v2_lora_PanLeft.ckpt"),
            Self::PanRight => Some("v2_lora_PanRight.ckpt"),
            Self::TiltUp => Some("v2_lora_TiltUp.ckpt"),
            Self::TiltDown => Some("v2_lora_TiltDown.ckpt"),
            Self::RollClockwise => Some("v2_lora_RollingClockwise.ckpt"),
            Self::RollAnticlockwise => Some("v2_lora_RollingAnticlockwise.ckpt"),
        }
    }
}

impl std::fmt::Display for MotionEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

// ---------------------------------------------------------------------------
// Output formats
// ---------------------------------------------------------------------------

/// Output container/codec produced by the video-combining node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    H264Mp4,
    H265Mp4,
    Webm,
    Gif,
}

impl OutputFormat {
    /// Format identifier understood by the video-combining node.
    pub fn codec_id(self) -> &'static str {
        match self {
            Self::H264Mp4 => "video/h264-mp4",
            Self::H265Mp4 => "video/h265-mp4",
            Self::Webm => "video/webm",
            Self::Gif => "image/gif",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::H264Mp4 | Self::H265Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Gif => "gif",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::H264Mp4 | Self::H265Mp4 => "video/mp4",
            Self::Webm => "video/webm",
            Self::Gif => "image/gif",
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Generation parameters for one job submission.
///
/// Clip duration is always derived from `frame_count / frame_rate` and is
/// never stored, so it cannot go stale when either side changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct GenerationSettings {
    pub sampler: String,
    pub scheduler: String,
    #[validate(range(min = 1, max = 150))]
    pub steps: u32,
    #[validate(range(min = 0.0, max = 30.0))]
    pub cfg: f32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub denoise: f32,
    #[validate(range(min = 1, max = 1024))]
    pub frame_count: u32,
    #[validate(range(min = 1, max = 120))]
    pub frame_rate: u32,
    #[validate(range(min = 64, max = 4096))]
    pub width: u32,
    #[validate(range(min = 64, max = 4096))]
    pub height: u32,
    pub motion_effect: MotionEffect,
    #[validate(range(min = 0.0, max = 2.0))]
    pub motion_strength: f32,
    pub output_format: OutputFormat,
    /// Codec-specific quality (CRF); lower means higher quality.
    #[validate(range(max = 63))]
    pub quality: u32,
    /// Mirror the clip forward then backward.
    pub loop_mode: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            sampler: "euler_ancestral".to_string(),
            scheduler: "normal".to_string(),
            steps: 20,
            cfg: 7.0,
            denoise: 0.75,
            frame_count: 16,
            frame_rate: 8,
            width: 512,
            height: 512,
            motion_effect: MotionEffect::Automatic,
            motion_strength: 0.8,
            output_format: OutputFormat::H264Mp4,
            quality: 19,
            loop_mode: false,
        }
    }
}

impl GenerationSettings {
    /// Length in seconds of a single clip produced with these settings.
    pub fn clip_duration_secs(&self) -> f64 {
        f64::from(self.frame_count) / f64::from(self.frame_rate)
    }

    /// Run the declarative range checks.
    pub fn validated(self) -> Result<Self, CoreError> {
        self.validate()?;
        Ok(self)
    }

    /// Copy with a concrete motion effect and strength filled in.
    pub fn with_motion(&self, effect: MotionEffect, strength: f32) -> Self {
        Self {
            motion_effect: effect,
            motion_strength: strength,
            ..self.clone()
        }
    }

    /// Copy with a different frame count (used when splitting long clips).
    pub fn with_frame_count(&self, frame_count: u32) -> Self {
        Self {
            frame_count,
            ..self.clone()
        }
    }
}

/// User overrides merged on top of a preset, once per job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsOverrides {
    pub sampler: Option<String>,
    pub scheduler: Option<String>,
    pub steps: Option<u32>,
    pub cfg: Option<f32>,
    pub denoise: Option<f32>,
    pub frame_count: Option<u32>,
    pub frame_rate: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub motion_effect: Option<MotionEffect>,
    pub motion_strength: Option<f32>,
    pub output_format: Option<OutputFormat>,
    pub quality: Option<u32>,
    pub loop_mode: Option<bool>,
}

impl SettingsOverrides {
    /// Merge onto `base` and validate the result.
    pub fn apply(self, base: GenerationSettings) -> Result<GenerationSettings, CoreError> {
        GenerationSettings {
            sampler: self.sampler.unwrap_or(base.sampler),
            scheduler: self.scheduler.unwrap_or(base.scheduler),
            steps: self.steps.unwrap_or(base.steps),
            cfg: self.cfg.unwrap_or(base.cfg),
            denoise: self.denoise.unwrap_or(base.denoise),
            frame_count: self.frame_count.unwrap_or(base.frame_count),
            frame_rate: self.frame_rate.unwrap_or(base.frame_rate),
            width: self.width.unwrap_or(base.width),
            height: self.height.unwrap_or(base.height),
            motion_effect: self.motion_effect.unwrap_or(base.motion_effect),
            motion_strength: self.motion_strength.unwrap_or(base.motion_strength),
            output_format: self.output_format.unwrap_or(base.output_format),
            quality: self.quality.unwrap_or(base.quality),
            loop_mode: self.loop_mode.unwrap_or(base.loop_mode),
        }
        .validated()
    }
}

// ---------------------------------------------------------------------------
// Presets
// ---------------------------------------------------------------------------

pub const PRESET_FAST_PREVIEW: &str = "fast_preview";
pub const PRESET_BALANCED: &str = "balanced";
pub const PRESET_HIGH_QUALITY: &str = "high_quality";
pub const PRESET_LONG_FORM: &str = "long_form";

/// All known preset names.
pub const PRESET_NAMES: &[&str] = &[
    PRESET_FAST_PREVIEW,
    PRESET_BALANCED,
    PRESET_HIGH_QUALITY,
    PRESET_LONG_FORM,
];

/// Look up a named preset.
pub fn preset(name: &str) -> Result<GenerationSettings, CoreError> {
    let base = GenerationSettings::default();
    let settings = match name {
        PRESET_FAST_PREVIEW => GenerationSettings {
            steps: 10,
            frame_count: 12,
            width: 384,
            height: 384,
            quality: 28,
            ..base
        },
        PRESET_BALANCED => base,
        PRESET_HIGH_QUALITY => GenerationSettings {
            steps: 30,
            cfg: 7.5,
            frame_count: 24,
            frame_rate: 12,
            width: 768,
            height: 768,
            quality: 16,
            ..base
        },
        PRESET_LONG_FORM => GenerationSettings {
            frame_count: 32,
            frame_rate: 8,
            ..base
        },
        other => {
            return Err(CoreError::Validation(format!(
                "Unknown preset '{other}'. Must be one of: {}",
                PRESET_NAMES.join(", ")
            )))
        }
    };
    Ok(settings)
}
