//! Smart-motion decision logic.
//!
//! When the user picks [`MotionEffect::Automatic`], a text classifier
//! suggests a camera motion for the prompt. This module maps the
//! classifier's free-form answer onto a concrete effect and clamps its
//! strength; the network call itself lives in the pipeline crate.

use serde::{Deserialize, Serialize};

use crate::settings::MotionEffect;

/// Strength used when the user picked a concrete effect.
pub const DEFAULT_MOTION_STRENGTH: f32 = 0.8;

/// Effect used when the classifier is unavailable or answers with an unknown name.
pub const FALLBACK_EFFECT: MotionEffect = MotionEffect::ZoomIn;

/// Strength used when the classifier is unavailable.
pub const FALLBACK_STRENGTH: f32 = 0.7;

/// Classifier strengths are clamped into `[MIN_AUTO_STRENGTH, MAX_AUTO_STRENGTH]`.
pub const MIN_AUTO_STRENGTH: f32 = 0.4;
pub const MAX_AUTO_STRENGTH: f32 = 1.0;

/// Classifier name aliases, normalised to lowercase `snake_case`.
const EFFECT_ALIASES: &[(&str, MotionEffect)] = &[
    ("zoom_in", MotionEffect::ZoomIn),
    ("zoomin", MotionEffect::ZoomIn),
    ("push_in", MotionEffect::ZoomIn),
    ("dolly_in", MotionEffect::ZoomIn),
    ("zoom_out", MotionEffect::ZoomOut),
    ("zoomout", MotionEffect::ZoomOut),
    ("pull_out", MotionEffect::ZoomOut),
    ("dolly_out", MotionEffect::ZoomOut),
    ("pan_left", MotionEffect::PanLeft),
    ("panleft", MotionEffect::PanLeft),
    ("pan_right", MotionEffect::PanRight),
    ("panright", MotionEffect::PanRight),
    ("tilt_up", MotionEffect::TiltUp),
    ("tiltup", MotionEffect::TiltUp),
    ("tilt_down", MotionEffect::TiltDown),
    ("tiltdown", MotionEffect::TiltDown),
    ("roll_clockwise", MotionEffect::RollClockwise),
    ("rolling_clockwise", MotionEffect::RollClockwise),
    ("roll_anticlockwise", MotionEffect::RollAnticlockwise),
    ("roll_counterclockwise", MotionEffect::RollAnticlockwise),
    ("rolling_anticlockwise", MotionEffect::RollAnticlockwise),
    ("static", MotionEffect::Static),
    ("still", MotionEffect::Static),
    ("none", MotionEffect::Static),
];

/// Raw answer returned by the motion classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionClassification {
    pub motion: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub strength: Option<f32>,
}

/// Where a [`MotionDecision`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    User,
    Classifier,
    /// The classifier could not be used; the caller should tell the user
    /// the choice was not AI-driven.
    Fallback,
}

/// Resolved camera motion for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionDecision {
    pub effect: MotionEffect,
    pub strength: f32,
    pub reason: Option<String>,
    pub source: DecisionSource,
}

impl MotionDecision {
    pub fn is_fallback(&self) -> bool {
        self.source == DecisionSource::Fallback
    }
}

/// Map a classifier effect name onto a concrete effect.
pub fn effect_from_name(name: &str) -> Option<MotionEffect> {
    let normalised = name.trim().to_lowercase().replace([' ', '-'], "_");
    EFFECT_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalised)
        .map(|(_, effect)| *effect)
}

/// Decision for a concrete user choice.
pub fn user_choice(effect: MotionEffect) -> MotionDecision {
    MotionDecision {
        effect,
        strength: DEFAULT_MOTION_STRENGTH,
        reason: None,
        source: DecisionSource::User,
    }
}

/// Decision derived from a successful classifier answer.
///
/// Unknown effect names map to [`FALLBACK_EFFECT`]; the strength is
/// clamped to `[MIN_AUTO_STRENGTH, MAX_AUTO_STRENGTH]`.
pub fn from_classification(classification: &MotionClassification) -> MotionDecision {
    let effect = effect_from_name(&classification.motion).unwrap_or(FALLBACK_EFFECT);
    let strength = classification
        .strength
        .filter(|s| s.is_finite())
        .unwrap_or(DEFAULT_MOTION_STRENGTH)
        .clamp(MIN_AUTO_STRENGTH, MAX_AUTO_STRENGTH);
    MotionDecision {
        effect,
        strength,
        reason: classification.reason.clone(),
        source: DecisionSource::Classifier,
    }
}

/// Deterministic decision used whenever the classifier call fails.
pub fn fallback() -> MotionDecision {
    MotionDecision {
        effect: FALLBACK_EFFECT,
        strength: FALLBACK_STRENGTH,
        reason: Some("Motion classifier unavailable; using default zoom in".to_string()),
        source: DecisionSource::Fallback,
    }
}
