//! The job-control contract shared by the direct client and the relay client.
//!
//! A [`JobTransport`] forwards job-control requests to a remote GPU job
//! server and normalizes the answers. It performs no retries: retry policy
//! belongs to the poller in `reel-pipeline`.

use serde::{Deserialize, Serialize};

use crate::workflow::Graph;

/// Errors from the job transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No job server address has been configured.
    #[error("No job server address configured")]
    NotConfigured,

    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("Request to job server failed: {0}")]
    Request(String),

    /// The request did not complete within its time budget.
    #[error("Request to job server timed out: {0}")]
    Timeout(String),

    /// The job server returned a non-2xx status code.
    #[error("Job server error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response body could not be decoded.
    #[error("Malformed job server response: {0}")]
    Parse(String),

    /// The relay rejected the request before contacting the job server.
    #[error("Relay error: {0}")]
    Relay(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_decode() {
            TransportError::Parse(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Parse(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Response returned by the job server after queuing a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued job.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
}

/// Ids currently running or waiting on the job server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub running: Vec<String>,
    pub pending: Vec<String>,
}

impl QueueSnapshot {
    /// Parse the server's `/queue` payload.
    ///
    /// Entries are arrays shaped `[number, prompt_id, graph, ...]`; anything
    /// without a string in position 1 is ignored.
    pub fn from_raw(raw: &serde_json::Value) -> Self {
        fn ids(raw: &serde_json::Value, key: &str) -> Vec<String> {
            raw.get(key)
                .and_then(|v| v.as_array())
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|e| e.get(1).and_then(|id| id.as_str()))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        }

        Self {
            running: ids(raw, "queue_running"),
            pending: ids(raw, "queue_pending"),
        }
    }

    pub fn is_running(&self, prompt_id: &str) -> bool {
        self.running.iter().any(|id| id == prompt_id)
    }

    pub fn is_pending(&self, prompt_id: &str) -> bool {
        self.pending.iter().any(|id| id == prompt_id)
    }

    /// Whether the id is present in either list.
    pub fn contains(&self, prompt_id: &str) -> bool {
        self.is_running(prompt_id) || self.is_pending(prompt_id)
    }
}

/// Location of an output file on the job server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage folder kind (`output`, `temp`, `input`).
    #[serde(rename = "type", default = "default_folder_kind")]
    pub kind: String,
}

fn default_folder_kind() -> String {
    "output".to_string()
}

impl ArtifactRef {
    pub fn output(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            subfolder: String::new(),
            kind: default_folder_kind(),
        }
    }
}

/// A fetched output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Answer to an input-image upload: the name the server stored it under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl UploadResponse {
    /// Reference usable as a `LoadImage` input.
    pub fn image_ref(&self) -> String {
        if self.subfolder.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.subfolder, self.name)
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Job-control operations against one remote job server.
#[async_trait::async_trait]
pub trait JobTransport: Send + Sync {
    /// Server status (devices, versions). Used as a connectivity probe.
    async fn system_stats(&self) -> Result<serde_json::Value, TransportError>;

    /// Node schema for one node class; `{}` when the class is unknown.
    async fn object_info(&self, class_type: &str) -> Result<serde_json::Value, TransportError>;

    /// Queue a job graph for execution.
    async fn enqueue(&self, graph: &Graph) -> Result<SubmitResponse, TransportError>;

    /// Current running and pending job ids.
    async fn queue(&self) -> Result<QueueSnapshot, TransportError>;

    /// Raw history for one job: `{}` until the server records it, then
    /// `{"<id>": {"outputs": {...}, "status": {...}}}`.
    async fn history(&self, prompt_id: &str) -> Result<serde_json::Value, TransportError>;

    /// Download one output file.
    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Artifact, TransportError>;

    /// Upload an input image and return the name it was stored under.
    async fn upload_image(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadResponse, TransportError>;
}

/// Probe a transport with [`JobTransport::system_stats`].
///
/// An empty address is reported as [`TransportError::NotConfigured`] so
/// callers can tell a missing setting apart from an unreachable server.
pub async fn check_connection(
    address: &str,
    transport: &dyn JobTransport,
) -> Result<serde_json::Value, TransportError> {
    if address.trim().is_empty() {
        return Err(TransportError::NotConfigured);
    }
    let stats = transport.system_stats().await?;
    tracing::debug!(address, "Job server reachable");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_snapshot_parses_entries() {
        let raw = serde_json::json!({
            "queue_running": [[7, "abc", {}, {}, []]],
            "queue_pending": [[8, "def", {}], [9, "ghi", {}], ["bad"]],
        });
        let snap = QueueSnapshot::from_raw(&raw);
        assert_eq!(snap.running, vec!["abc"]);
        assert_eq!(snap.pending, vec!["def", "ghi"]);
        assert!(snap.is_running("abc"));
        assert!(snap.is_pending("ghi"));
        assert!(!snap.contains("zzz"));
    }

    #[test]
    fn queue_snapshot_tolerates_missing_lists() {
        let snap = QueueSnapshot::from_raw(&serde_json::json!({}));
        assert!(snap.running.is_empty());
        assert!(snap.pending.is_empty());
    }

    #[test]
    fn artifact_ref_defaults() {
        let r: ArtifactRef = serde_json::from_str(r#"{"filename": "a.png"}"#).unwrap();
        assert_eq!(r, ArtifactRef::output("a.png"));
    }

    #[test]
    fn upload_image_ref_includes_subfolder() {
        let up = UploadResponse {
            name: "seed.png".into(),
            subfolder: "reel".into(),
            kind: "input".into(),
        };
        assert_eq!(up.image_ref(), "reel/seed.png");
    }
}
