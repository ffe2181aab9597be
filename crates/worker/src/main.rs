//! Batch worker: runs one manifest end-to-end and writes the stitched video.
//!
//! Usage: `reel-worker <manifest.json>`

mod config;
mod manifest;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reel_comfyui::api::ComfyUIApi;
use reel_comfyui::relay::RelayClient;
use reel_comfyui::transport::{check_connection, JobTransport};
use reel_events::{EventBus, PipelineEvent};
use reel_pipeline::backend::{ComfyBackend, VideoBackend};
use reel_pipeline::batch::ScenePipeline;
use reel_pipeline::clock::{Clock, TokioClock};
use reel_pipeline::frames::FfmpegFrameExtractor;
use reel_pipeline::hosted::{HostedBackend, HostedConfig};
use reel_pipeline::motion::{HttpMotionClassifier, MotionClassifier, SmartMotionResolver};
use reel_pipeline::poller::{JobPoller, PollerConfig};
use reel_pipeline::reporter::ProgressReporter;
use reel_pipeline::stitcher::ClipStitcher;

use config::{BackendChoice, WorkerConfig};
use manifest::Manifest;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reel_worker=debug,reel_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let manifest_path: PathBuf = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: reel-worker <manifest.json>")?;

    let config = WorkerConfig::from_env();
    let (manifest, base_dir) = Manifest::load(&manifest_path).await?;
    let archive = manifest.archive;
    let request = manifest.into_request(&base_dir).await?;
    tracing::info!(
        scenes = request.scenes.len(),
        seed = request.seed,
        transitions = request.transitions,
        "Manifest loaded"
    );

    let run_id = uuid::Uuid::new_v4().to_string();
    let bus = Arc::new(EventBus::default());
    let reporter = ProgressReporter::new(bus.clone(), run_id.clone());
    let log_handle = tokio::spawn(log_events(bus.subscribe()));

    let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
    let backend = build_backend(&config, clock, reporter.clone()).await?;

    let classifier = config
        .motion_classifier_url
        .as_ref()
        .map(|url| Arc::new(HttpMotionClassifier::new(url.clone())) as Arc<dyn MotionClassifier>);
    let stitcher = Arc::new(ClipStitcher::new().with_reporter(reporter.clone()));

    let pipeline = ScenePipeline::new(
        backend,
        Arc::new(FfmpegFrameExtractor),
        SmartMotionResolver::new(classifier),
        stitcher,
    )
    .with_reporter(reporter);

    let outcome = pipeline.run(request).await?;

    let written = output::write_outputs(
        &config.output_dir,
        &outcome,
        archive,
        chrono::Local::now().date_naive(),
    )
    .await?;

    if !outcome.failed_scenes.is_empty() {
        tracing::warn!(failed = ?outcome.failed_scenes, "Some scenes were left out");
    }
    tracing::info!(
        run_id = %run_id,
        path = %written.video.display(),
        clips = outcome.clips.len(),
        bytes = outcome.stitched.bytes.len(),
        "Video written"
    );

    drop(pipeline);
    drop(bus);
    let _ = log_handle.await;
    Ok(())
}

fn comfy_backend(config: &WorkerConfig, poller: JobPoller) -> ComfyBackend {
    tracing::info!(model = ?config.video_model, checkpoint = ?config.checkpoint, "Job server video model");
    let backend = ComfyBackend::new(poller).with_model(config.video_model);
    match &config.checkpoint {
        Some(checkpoint) => backend.with_checkpoint(checkpoint.clone()),
        None => backend,
    }
}

async fn build_backend(
    config: &WorkerConfig,
    clock: Arc<dyn Clock>,
    reporter: ProgressReporter,
) -> anyhow::Result<Arc<dyn VideoBackend>> {
    match config.backend() {
        BackendChoice::Hosted {
            api_token,
            video_model,
        } => {
            tracing::info!(model = %video_model, "Using hosted prediction backend");
            let backend = HostedBackend::new(HostedConfig::new(api_token, video_model), clock)
                .with_reporter(reporter);
            Ok(Arc::new(backend))
        }
        BackendChoice::JobServer { address, relay_url } => {
            let transport: Arc<dyn JobTransport> = match relay_url {
                Some(relay) => {
                    tracing::info!(relay = %relay, target = %address, "Using job server through relay");
                    Arc::new(RelayClient::new(relay, address.clone()))
                }
                None => {
                    tracing::info!(target = %address, "Using job server directly");
                    Arc::new(ComfyUIApi::new(address.clone()))
                }
            };
            check_connection(&address, transport.as_ref())
                .await
                .with_context(|| format!("job server {address} is not reachable"))?;

            let poller_config = PollerConfig {
                poll_interval: config.poll_interval,
                ..PollerConfig::default()
            };
            let poller = JobPoller::new(transport, clock, poller_config).with_reporter(reporter);
            Ok(Arc::new(comfy_backend(config, poller)))
        }
    }
}

/// Mirror pipeline events into the log until every sender is gone.
async fn log_events(mut rx: tokio::sync::broadcast::Receiver<PipelineEvent>) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match rx.recv().await {
            Ok(event) => tracing::debug!(
                event_type = %event.event_type,
                scene = ?event.scene_index,
                payload = %event.payload,
                "Pipeline event"
            ),
            Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "Event log lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use reel_pipeline::backend::VideoModel;
    use reel_pipeline::clock::ManualClock;

    use super::*;

    fn config(video_model: VideoModel, checkpoint: Option<&str>) -> WorkerConfig {
        WorkerConfig {
            comfyui_url: "http://gpu:8188".into(),
            relay_url: None,
            hosted_api_token: None,
            hosted_video_model: None,
            video_model,
            checkpoint: checkpoint.map(str::to_string),
            motion_classifier_url: None,
            poll_interval: Duration::from_millis(1500),
            output_dir: PathBuf::from("output"),
        }
    }

    fn poller() -> JobPoller {
        JobPoller::new(
            Arc::new(ComfyUIApi::new("http://gpu:8188")),
            Arc::new(ManualClock::new()),
            PollerConfig::default(),
        )
    }

    #[test]
    fn job_server_backend_follows_model_and_checkpoint() {
        let backend = comfy_backend(
            &config(VideoModel::LargeVideoModel, Some("wan2.1_i2v.safetensors")),
            poller(),
        );
        assert_eq!(backend.model(), VideoModel::LargeVideoModel);
        assert_eq!(backend.preferred_checkpoint(), Some("wan2.1_i2v.safetensors"));

        let backend = comfy_backend(&config(VideoModel::MotionDiffusion, None), poller());
        assert_eq!(backend.model(), VideoModel::MotionDiffusion);
        assert_eq!(backend.preferred_checkpoint(), None);
    }
}
