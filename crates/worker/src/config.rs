use std::path::PathBuf;
use std::time::Duration;

use reel_pipeline::backend::VideoModel;

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Job server address (default: `http://127.0.0.1:8188`).
    pub comfyui_url: String,
    /// Relay endpoint; when set, every job-server call goes through it.
    pub relay_url: Option<String>,
    /// Hosted prediction API token; selects the hosted backend when set
    /// together with `hosted_video_model`.
    pub hosted_api_token: Option<String>,
    pub hosted_video_model: Option<String>,
    /// Image-to-video pipeline the job server runs.
    pub video_model: VideoModel,
    /// Checkpoint to prefer over the first SD 1.5 one the server lists.
    pub checkpoint: Option<String>,
    pub motion_classifier_url: Option<String>,
    pub poll_interval: Duration,
    pub output_dir: PathBuf,
}

/// Which generation backend a run uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendChoice {
    JobServer { address: String, relay_url: Option<String> },
    Hosted { api_token: String, video_model: String },
}

/// Accepts the serialized names and their hyphenated forms.
fn parse_video_model(raw: &str) -> Option<VideoModel> {
    match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "motion_diffusion" => Some(VideoModel::MotionDiffusion),
        "large_video_model" => Some(VideoModel::LargeVideoModel),
        _ => None,
    }
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `COMFYUI_URL`           | `http://127.0.0.1:8188` |
    /// | `RELAY_URL`             | unset                   |
    /// | `HOSTED_API_TOKEN`      | unset                   |
    /// | `HOSTED_VIDEO_MODEL`    | unset                   |
    /// | `COMFYUI_VIDEO_MODEL`   | `motion_diffusion`      |
    /// | `COMFYUI_CHECKPOINT`    | unset                   |
    /// | `MOTION_CLASSIFIER_URL` | unset                   |
    /// | `POLL_INTERVAL_MS`      | `1500`                  |
    /// | `OUTPUT_DIR`            | `./output`              |
    pub fn from_env() -> Self {
        let poll_ms: u64 = std::env::var("POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "1500".into())
            .parse()
            .expect("POLL_INTERVAL_MS must be a valid u64");

        let video_model = optional("COMFYUI_VIDEO_MODEL")
            .map(|raw| {
                parse_video_model(&raw).expect(
                    "COMFYUI_VIDEO_MODEL must be motion_diffusion or large_video_model",
                )
            })
            .unwrap_or_default();

        Self {
            comfyui_url: optional("COMFYUI_URL")
                .unwrap_or_else(|| "http://127.0.0.1:8188".into()),
            relay_url: optional("RELAY_URL"),
            hosted_api_token: optional("HOSTED_API_TOKEN"),
            hosted_video_model: optional("HOSTED_VIDEO_MODEL"),
            video_model,
            checkpoint: optional("COMFYUI_CHECKPOINT"),
            motion_classifier_url: optional("MOTION_CLASSIFIER_URL"),
            poll_interval: Duration::from_millis(poll_ms),
            output_dir: optional("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("output")),
        }
    }

    /// The hosted backend wins when both its token and model are present.
    pub fn backend(&self) -> BackendChoice {
        match (&self.hosted_api_token, &self.hosted_video_model) {
            (Some(token), Some(model)) => BackendChoice::Hosted {
                api_token: token.clone(),
                video_model: model.clone(),
            },
            _ => BackendChoice::JobServer {
                address: self.comfyui_url.trim_end_matches('/').to_string(),
                relay_url: self.relay_url.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WorkerConfig {
        WorkerConfig {
            comfyui_url: "http://gpu:8188/".into(),
            relay_url: None,
            hosted_api_token: None,
            hosted_video_model: None,
            video_model: VideoModel::default(),
            checkpoint: None,
            motion_classifier_url: None,
            poll_interval: Duration::from_millis(1500),
            output_dir: PathBuf::from("output"),
        }
    }

    #[test]
    fn job_server_is_the_default_backend() {
        assert_eq!(
            config().backend(),
            BackendChoice::JobServer {
                address: "http://gpu:8188".into(),
                relay_url: None
            }
        );
    }

    #[test]
    fn hosted_backend_needs_token_and_model() {
        let mut cfg = config();
        cfg.hosted_api_token = Some("r8_token".into());
        assert!(matches!(cfg.backend(), BackendChoice::JobServer { .. }));

        cfg.hosted_video_model = Some("acme/img2vid".into());
        assert_eq!(
            cfg.backend(),
            BackendChoice::Hosted {
                api_token: "r8_token".into(),
                video_model: "acme/img2vid".into()
            }
        );
    }

    #[test]
    fn video_model_names() {
        assert_eq!(parse_video_model("motion_diffusion"), Some(VideoModel::MotionDiffusion));
        assert_eq!(parse_video_model(" Large-Video-Model "), Some(VideoModel::LargeVideoModel));
        assert_eq!(parse_video_model("svd"), None);
        assert_eq!(config().video_model, VideoModel::MotionDiffusion);
    }
}
