#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use reel_comfyui::transport::{
    Artifact, ArtifactRef, JobTransport, QueueSnapshot, SubmitResponse, TransportError,
    UploadResponse,
};
use reel_comfyui::workflow::{Graph, Input, ADVANCED_VIDEO_NODE, MOTION_LOADER_NODE};
use reel_core::clip::{mime_for_filename, StitchJob};
use reel_pipeline::clock::ManualClock;
use reel_pipeline::error::PipelineError;
use reel_pipeline::frames::FrameExtractor;
use reel_pipeline::poller::{JobPoller, PollerConfig};
use reel_pipeline::stitcher::{StitchError, StitchOutput, Stitcher};

/// What the mock server does with one submitted job.
#[derive(Debug, Clone)]
pub struct JobScript {
    /// Queue polls that list the job as running.
    pub running_polls: u32,
    /// History calls answered with `{}` after the job left the queue.
    pub history_misses: u32,
    pub outcome: Outcome,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    /// A video file in the `gifs` list of node 9.
    Video,
    /// A single PNG in the `images` list of node 9.
    Image,
    /// This many numbered PNG frames in the `images` list of node 9.
    Frames(usize),
    /// An execution error with this exception message.
    Error(String),
    /// Recorded with no outputs at all.
    Empty,
    /// Never recorded in history.
    Never,
}

impl JobScript {
    pub fn video(running_polls: u32) -> Self {
        Self {
            running_polls,
            history_misses: 0,
            outcome: Outcome::Video,
        }
    }

    pub fn image(running_polls: u32) -> Self {
        Self {
            running_polls,
            history_misses: 0,
            outcome: Outcome::Image,
        }
    }

    pub fn frames(count: usize) -> Self {
        Self {
            running_polls: 1,
            history_misses: 0,
            outcome: Outcome::Frames(count),
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            running_polls: 1,
            history_misses: 0,
            outcome: Outcome::Error(message.to_string()),
        }
    }

    pub fn with_history_misses(mut self, misses: u32) -> Self {
        self.history_misses = misses;
        self
    }
}

type Script = Box<dyn Fn(usize, &str) -> JobScript + Send + Sync>;

struct JobRecord {
    script: JobScript,
    graph: Graph,
    running_left: u32,
    misses_left: u32,
}

/// In-memory job server.
///
/// Job ids are `job-1`, `job-2`, ... in submission order. The script
/// receives the submission number and the serialized graph.
pub struct MockTransport {
    script: Script,
    jobs: Mutex<HashMap<String, JobRecord>>,
    order: Mutex<Vec<String>>,
    uploads: Mutex<Vec<String>>,
    pub queue_calls: AtomicUsize,
    pub history_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub object_info_calls: AtomicUsize,
    checkpoints: Vec<String>,
    installed: Vec<String>,
}

impl MockTransport {
    pub fn new(script: impl Fn(usize, &str) -> JobScript + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            jobs: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            queue_calls: AtomicUsize::new(0),
            history_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            object_info_calls: AtomicUsize::new(0),
            checkpoints: vec!["dreamshaper_8.safetensors".to_string()],
            installed: vec![ADVANCED_VIDEO_NODE.to_string(), MOTION_LOADER_NODE.to_string()],
        }
    }

    /// Every job succeeds with a video after `running_polls` polls.
    pub fn always_video(running_polls: u32) -> Self {
        Self::new(move |_, _| JobScript::video(running_polls))
    }

    /// Node classes `object_info` reports as installed.
    pub fn with_installed(mut self, classes: &[&str]) -> Self {
        self.installed = classes.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Checkpoints `CheckpointLoaderSimple` lists.
    pub fn with_checkpoints(mut self, names: &[&str]) -> Self {
        self.checkpoints = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn submitted(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    pub fn graph(&self, job_id: &str) -> Graph {
        self.jobs.lock().unwrap()[job_id].graph.clone()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    /// Literal input `key` of the first `class` node of a job's graph.
    pub fn input_of(&self, job_id: &str, class: &str, key: &str) -> Option<Value> {
        let graph = self.graph(job_id);
        let id = graph.find_class(class)?.to_string();
        match graph.node(&id)?.inputs.get(key)? {
            Input::Value(v) => Some(v.clone()),
            Input::Link(_) => None,
        }
    }

    /// Input image the job's `LoadImage` node reads.
    pub fn load_image_of(&self, job_id: &str) -> Option<String> {
        self.input_of(job_id, "LoadImage", "image")?
            .as_str()
            .map(str::to_string)
    }
}

/// Bytes served for a job's video output.
pub fn video_bytes(job_id: &str) -> Vec<u8> {
    format!("video:{job_id}").into_bytes()
}

fn output_name(job_id: &str, ext: &str) -> String {
    format!("reel_{job_id}.{ext}")
}

#[async_trait::async_trait]
impl JobTransport for MockTransport {
    async fn system_stats(&self) -> Result<Value, TransportError> {
        Ok(json!({"system": {"os": "mock"}, "devices": []}))
    }

    async fn object_info(&self, class_type: &str) -> Result<Value, TransportError> {
        self.object_info_calls.fetch_add(1, Ordering::SeqCst);
        if class_type == "CheckpointLoaderSimple" {
            return Ok(json!({"CheckpointLoaderSimple": {"input": {"required": {
                "ckpt_name": [self.checkpoints]
            }}}}));
        }
        if self.installed.iter().any(|c| c == class_type) {
            return Ok(json!({ class_type: {"input": {}} }));
        }
        Ok(json!({}))
    }

    async fn enqueue(&self, graph: &Graph) -> Result<SubmitResponse, TransportError> {
        let mut order = self.order.lock().unwrap();
        let number = order.len() + 1;
        let job_id = format!("job-{number}");
        let text = String::from_utf8(graph.to_bytes()).unwrap_or_default();
        let script = (self.script)(number, &text);
        self.jobs.lock().unwrap().insert(
            job_id.clone(),
            JobRecord {
                running_left: script.running_polls,
                misses_left: script.history_misses,
                script,
                graph: graph.clone(),
            },
        );
        order.push(job_id.clone());
        Ok(SubmitResponse {
            prompt_id: job_id,
            number: number as i64,
        })
    }

    async fn queue(&self) -> Result<QueueSnapshot, TransportError> {
        self.queue_calls.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().unwrap();
        let mut running = Vec::new();
        for (id, record) in jobs.iter_mut() {
            if record.running_left > 0 {
                record.running_left -= 1;
                running.push(id.clone());
            }
        }
        Ok(QueueSnapshot {
            running,
            pending: Vec::new(),
        })
    }

    async fn history(&self, prompt_id: &str) -> Result<Value, TransportError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().unwrap();
        let Some(record) = jobs.get_mut(prompt_id) else {
            return Ok(json!({}));
        };
        if record.misses_left > 0 {
            record.misses_left -= 1;
            return Ok(json!({}));
        }
        let entry = match &record.script.outcome {
            Outcome::Video => json!({"outputs": {"9": {"gifs": [
                {"filename": output_name(prompt_id, "mp4"), "subfolder": "", "type": "output"}
            ]}}, "status": {"status_str": "success", "completed": true, "messages": []}}),
            Outcome::Image => json!({"outputs": {"9": {"images": [
                {"filename": output_name(prompt_id, "png"), "subfolder": "", "type": "output"}
            ]}}, "status": {"status_str": "success", "completed": true, "messages": []}}),
            Outcome::Frames(count) => {
                let frames: Vec<Value> = (0..*count)
                    .map(|i| json!({"filename": format!("reel_{prompt_id}_{i:05}.png"), "subfolder": "", "type": "output"}))
                    .collect();
                json!({"outputs": {"9": {"images": frames}},
                       "status": {"status_str": "success", "completed": true, "messages": []}})
            }
            Outcome::Error(message) => json!({"outputs": {}, "status": {
                "status_str": "error", "completed": false, "messages": [
                    ["execution_error", {"exception_type": "RuntimeError", "exception_message": message}]
                ]
            }}),
            Outcome::Empty => json!({"outputs": {}, "status": {"status_str": "success", "completed": true, "messages": []}}),
            Outcome::Never => return Ok(json!({})),
        };
        Ok(json!({ prompt_id: entry }))
    }

    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Artifact, TransportError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let job_id = artifact
            .filename
            .trim_start_matches("reel_")
            .rsplit_once('.')
            .map(|(id, _)| id.to_string())
            .unwrap_or_default();
        let bytes = if artifact.filename.ends_with(".png") {
            png_bytes()
        } else {
            video_bytes(&job_id)
        };
        Ok(Artifact {
            filename: artifact.filename.clone(),
            mime_type: mime_for_filename(&artifact.filename).to_string(),
            bytes,
        })
    }

    async fn upload_image(
        &self,
        filename: &str,
        _bytes: Vec<u8>,
    ) -> Result<UploadResponse, TransportError> {
        self.uploads.lock().unwrap().push(filename.to_string());
        Ok(UploadResponse {
            name: filename.to_string(),
            subfolder: String::new(),
            kind: "input".to_string(),
        })
    }
}

/// A valid 4x4 PNG.
pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 80, 40]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Fast poller settings for tests (virtual time anyway).
pub fn test_config() -> PollerConfig {
    PollerConfig {
        poll_interval: Duration::from_millis(1_500),
        grace_attempts: 5,
        grace_delay: Duration::from_secs(2),
        image_max_polls: 120,
        max_consecutive_errors: 3,
        expected_video_duration: Duration::from_secs(180),
    }
}

pub fn poller(transport: Arc<MockTransport>, clock: Arc<ManualClock>) -> JobPoller {
    JobPoller::new(transport, clock, test_config())
}

/// Returns a fixed PNG as the "last frame" of any clip.
pub struct StillFrames {
    pub calls: AtomicUsize,
}

impl StillFrames {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl FrameExtractor for StillFrames {
    async fn extract_last_frame(&self, video: &[u8]) -> Result<Vec<u8>, PipelineError> {
        assert!(!video.is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(png_bytes())
    }
}

/// Stitcher that concatenates clip bytes with `|` and remembers the job.
#[derive(Default)]
pub struct RecordingStitcher {
    pub jobs: Mutex<Vec<StitchJob>>,
}

#[async_trait::async_trait]
impl Stitcher for RecordingStitcher {
    async fn stitch(&self, job: &StitchJob) -> Result<StitchOutput, StitchError> {
        self.jobs.lock().unwrap().push(job.clone());
        let parts: Vec<Vec<u8>> = job
            .clips()
            .iter()
            .map(|c| c.media.as_bytes().unwrap_or_default().to_vec())
            .collect();
        Ok(StitchOutput {
            filename: job.output_name.clone(),
            mime_type: "video/mp4".to_string(),
            bytes: parts.join(&b'|'),
        })
    }
}

/// Whether ffmpeg can be run; media tests skip themselves without it.
pub async fn ffmpeg_available(test: &str) -> bool {
    let found = reel_core::ffmpeg::ffmpeg_version().await.is_ok();
    if !found {
        eprintln!("skipping {test}: ffmpeg not found on PATH");
    }
    found
}

/// Render a test-pattern H.264 clip, optionally with a sine audio track.
pub async fn render_clip(path: &std::path::Path, width: u32, height: u32, seconds: f32, audio: bool) {
    let mut cmd = tokio::process::Command::new("ffmpeg");
    cmd.args(["-y", "-v", "error", "-f", "lavfi", "-i"])
        .arg(format!("testsrc=size={width}x{height}:rate=8:duration={seconds}"));
    if audio {
        cmd.args(["-f", "lavfi", "-i"])
            .arg(format!("sine=frequency=440:duration={seconds}"))
            .args(["-c:a", "aac", "-shortest"]);
    }
    cmd.args(["-c:v", "libx264", "-pix_fmt", "yuv420p"]).arg(path);
    let status = cmd.status().await.unwrap();
    assert!(status.success(), "ffmpeg could not render {}", path.display());
}

/// Render a sine-wave audio file.
pub async fn render_tone(path: &std::path::Path, seconds: f32) {
    let status = tokio::process::Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-f", "lavfi", "-i"])
        .arg(format!("sine=frequency=220:duration={seconds}"))
        .arg(path)
        .status()
        .await
        .unwrap();
    assert!(status.success(), "ffmpeg could not render {}", path.display());
}
