//! Job history parsing, artifact extraction and error classification.
//!
//! The history payload varies with the node that produced the output, so
//! extraction runs an explicit, ordered rule list:
//!
//! 1. the first `gifs` entry (video-combining node),
//! 2. the first `videos` entry,
//! 3. `images`: an animated entry is a video; several frames from a video
//!    job form a frame sequence; otherwise an image, preferring `.png`,
//! 4. any other list of files, filtered by extension.
//!
//! Within each rule, output nodes are visited in ascending numeric id order
//! and the first match wins.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use reel_core::naming::extension_of;

use crate::transport::ArtifactRef;

/// Remediation text surfaced for out-of-memory failures.
pub const OOM_REMEDIATION: &str =
    "The GPU ran out of memory. Reduce the frame count or resolution and try again.";

/// Backend message fragments that identify an out-of-memory failure.
const OOM_SIGNATURES: &[&str] = &[
    "out of memory",
    "ran out of memory",
    "outofmemoryerror",
    "allocation on device",
];

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "mkv", "gif"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// What kind of output a job is expected to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Image,
    Video,
}

/// A produced output in one of the shapes the server can return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "refs", rename_all = "snake_case")]
pub enum ArtifactResult {
    Image(ArtifactRef),
    Video(ArtifactRef),
    FrameSequence(Vec<ArtifactRef>),
}

impl ArtifactResult {
    /// The artifact to fetch when only one file can be used.
    pub fn primary(&self) -> Option<&ArtifactRef> {
        match self {
            Self::Image(r) | Self::Video(r) => Some(r),
            Self::FrameSequence(refs) => refs.first(),
        }
    }
}

// ---------------------------------------------------------------------------
// History payload
// ---------------------------------------------------------------------------

/// Status block of a history entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
    /// `[[event_name, {...}], ...]`
    #[serde(default)]
    pub messages: Vec<(String, Value)>,
}

impl HistoryStatus {
    pub fn is_error(&self) -> bool {
        self.status_str.as_deref() == Some("error")
    }

    /// The `exception_message` of the first `execution_error` event.
    pub fn error_message(&self) -> Option<String> {
        self.messages
            .iter()
            .find(|(event, _)| event == "execution_error")
            .and_then(|(_, data)| {
                let message = data.get("exception_message").and_then(Value::as_str)?;
                let kind = data.get("exception_type").and_then(Value::as_str);
                Some(match kind {
                    Some(kind) if !message.contains(kind) => format!("{kind}: {message}"),
                    _ => message.to_string(),
                })
            })
    }
}

/// Outputs of one node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutputs {
    #[serde(default)]
    pub images: Vec<ArtifactRef>,
    #[serde(default)]
    pub gifs: Vec<ArtifactRef>,
    #[serde(default)]
    pub videos: Vec<ArtifactRef>,
    #[serde(default)]
    pub animated: Vec<bool>,
    /// Any other output lists (custom save nodes).
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

/// One job's history record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutputs>,
    #[serde(default)]
    pub status: Option<HistoryStatus>,
}

impl HistoryEntry {
    /// Pick the entry for `prompt_id` out of a raw `/history/{id}` answer.
    ///
    /// `Ok(None)` means the server has not recorded the job yet.
    pub fn from_response(raw: &Value, prompt_id: &str) -> Result<Option<Self>, serde_json::Error> {
        match raw.get(prompt_id) {
            Some(entry) => serde_json::from_value(entry.clone()).map(Some),
            None => Ok(None),
        }
    }

    /// Output nodes in ascending numeric id order.
    fn ordered_outputs(&self) -> Vec<&NodeOutputs> {
        let mut nodes: Vec<(&String, &NodeOutputs)> = self.outputs.iter().collect();
        nodes.sort_by_key(|(id, _)| (id.parse::<u64>().unwrap_or(u64::MAX), id.to_string()));
        nodes.into_iter().map(|(_, out)| out).collect()
    }

    /// Apply the extraction rules for a job of `kind`.
    pub fn extract_artifact(&self, kind: JobKind) -> Option<ArtifactResult> {
        let nodes = self.ordered_outputs();

        if let Some(first) = nodes.iter().find_map(|n| n.gifs.first()) {
            return Some(ArtifactResult::Video(first.clone()));
        }
        if let Some(first) = nodes.iter().find_map(|n| n.videos.first()) {
            return Some(ArtifactResult::Video(first.clone()));
        }
        if let Some(node) = nodes.iter().find(|n| !n.images.is_empty()) {
            return Some(classify_images(node, kind));
        }
        nodes.iter().find_map(|n| generic_file(n, kind))
    }
}

fn classify_images(node: &NodeOutputs, kind: JobKind) -> ArtifactResult {
    let animated = node.animated.iter().any(|a| *a);
    if animated || node.images.iter().any(|r| has_extension(r, VIDEO_EXTENSIONS)) {
        let video = node
            .images
            .iter()
            .find(|r| has_extension(r, VIDEO_EXTENSIONS))
            .unwrap_or(&node.images[0]);
        return ArtifactResult::Video(video.clone());
    }
    if kind == JobKind::Video && node.images.len() > 1 {
        return ArtifactResult::FrameSequence(node.images.clone());
    }
    let image = node
        .images
        .iter()
        .find(|r| has_extension(r, &["png"]))
        .unwrap_or(&node.images[0]);
    ArtifactResult::Image(image.clone())
}

fn generic_file(node: &NodeOutputs, kind: JobKind) -> Option<ArtifactResult> {
    let files: Vec<ArtifactRef> = node
        .other
        .values()
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(|v| serde_json::from_value::<ArtifactRef>(v.clone()).ok())
        .collect();

    let video = files.iter().find(|r| has_extension(r, VIDEO_EXTENSIONS));
    let image = files
        .iter()
        .find(|r| has_extension(r, &["png"]))
        .or_else(|| files.iter().find(|r| has_extension(r, IMAGE_EXTENSIONS)));

    match kind {
        JobKind::Video => video
            .map(|r| ArtifactResult::Video(r.clone()))
            .or_else(|| image.map(|r| ArtifactResult::Image(r.clone()))),
        JobKind::Image => image
            .map(|r| ArtifactResult::Image(r.clone()))
            .or_else(|| video.map(|r| ArtifactResult::Video(r.clone()))),
    }
}

fn has_extension(artifact: &ArtifactRef, allowed: &[&str]) -> bool {
    extension_of(&artifact.filename).is_some_and(|ext| allowed.contains(&ext.as_str()))
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// A backend-reported failure, after pattern classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendFailure {
    /// Message to surface to the user.
    pub message: String,
    pub out_of_memory: bool,
}

/// Rewrite known failure patterns; pass everything else through.
pub fn classify_backend_error(raw: &str) -> BackendFailure {
    let lower = raw.to_lowercase();
    if OOM_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        return BackendFailure {
            message: OOM_REMEDIATION.to_string(),
            out_of_memory: true,
        };
    }
    let message = raw.trim();
    BackendFailure {
        message: if message.is_empty() {
            "The job failed on the backend without an error message".to_string()
        } else {
            message.to_string()
        },
        out_of_memory: false,
    }
}

/// What a single history fetch says about a job.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryOutcome {
    /// No record yet.
    NotRecorded,
    /// The job produced a usable artifact.
    Succeeded(ArtifactResult),
    /// The backend reported an execution error.
    Failed(BackendFailure),
    /// Recorded, but with neither an artifact nor an error.
    Empty,
}

/// Interpret a raw history answer for one job.
pub fn classify_history(
    raw: &Value,
    prompt_id: &str,
    kind: JobKind,
) -> Result<HistoryOutcome, serde_json::Error> {
    let Some(entry) = HistoryEntry::from_response(raw, prompt_id)? else {
        return Ok(HistoryOutcome::NotRecorded);
    };

    if let Some(status) = entry.status.as_ref().filter(|s| s.is_error()) {
        let raw_message = status.error_message().unwrap_or_default();
        return Ok(HistoryOutcome::Failed(classify_backend_error(&raw_message)));
    }

    Ok(match entry.extract_artifact(kind) {
        Some(artifact) => HistoryOutcome::Succeeded(artifact),
        None => HistoryOutcome::Empty,
    })
}
