//! Smart-motion resolver.
//!
//! Resolves the "automatic" motion sentinel by asking a text classifier
//! which camera motion fits the prompt. The classifier is optional and
//! unreliable; any failure yields the fixed fallback decision.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use reel_core::motion::{self, MotionClassification, MotionDecision};
use reel_core::settings::MotionEffect;

/// Failure of the motion classification call.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Classifier returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Classifier answer missing field: {0}")]
    MissingField(&'static str),
}

/// Suggests a camera motion for a prompt.
#[async_trait::async_trait]
pub trait MotionClassifier: Send + Sync {
    async fn classify(&self, prompt: &str) -> Result<MotionClassification, ClassifierError>;
}

/// Classifier reached over HTTP: `POST {prompt} -> {motion, reason, strength}`.
pub struct HttpMotionClassifier {
    client: reqwest::Client,
    url: String,
}

impl HttpMotionClassifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait::async_trait]
impl MotionClassifier for HttpMotionClassifier {
    async fn classify(&self, prompt: &str) -> Result<MotionClassification, ClassifierError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "prompt": prompt }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                body,
            });
        }

        // Missing fields are a soft failure, not a parse crash.
        let raw: serde_json::Value = response.json().await?;
        let motion = raw
            .get("motion")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or(ClassifierError::MissingField("motion"))?;
        Ok(MotionClassification {
            motion: motion.to_string(),
            reason: raw.get("reason").and_then(|v| v.as_str()).map(str::to_string),
            strength: raw
                .get("strength")
                .and_then(|v| v.as_f64())
                .map(|s| s as f32),
        })
    }
}

/// Resolves a user's motion selection into a concrete effect.
#[derive(Clone, Default)]
pub struct SmartMotionResolver {
    classifier: Option<Arc<dyn MotionClassifier>>,
}

impl SmartMotionResolver {
    pub fn new(classifier: Option<Arc<dyn MotionClassifier>>) -> Self {
        Self { classifier }
    }

    pub async fn resolve(&self, selected: MotionEffect, prompt: &str) -> MotionDecision {
        if selected != MotionEffect::Automatic {
            return motion::user_choice(selected);
        }

        let Some(classifier) = &self.classifier else {
            tracing::warn!("No motion classifier configured, using fallback motion");
            return motion::fallback();
        };

        match classifier.classify(prompt).await {
            Ok(classification) => {
                let decision = motion::from_classification(&classification);
                tracing::debug!(
                    effect = %decision.effect,
                    strength = decision.strength,
                    suggested = %classification.motion,
                    "Motion classified",
                );
                decision
            }
            Err(e) => {
                tracing::warn!(error = %e, "Motion classification failed, using fallback motion");
                motion::fallback()
            }
        }
    }
}
