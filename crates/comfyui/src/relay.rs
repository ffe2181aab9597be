//! Relay envelope: job-control requests forwarded to a user-configured
//! job server, with responses normalized into one shape and binary
//! artifacts base64-encoded for transport.
//!
//! [`dispatch`] runs on the relay server; [`RelayClient`] is the matching
//! [`JobTransport`] that talks to it.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::ComfyUIApi;
use crate::transport::{
    Artifact, ArtifactRef, JobTransport, QueueSnapshot, SubmitResponse, TransportError,
    UploadResponse,
};
use crate::workflow::Graph;

/// Job-control actions the relay forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayAction {
    SystemStats,
    ObjectInfo,
    Enqueue,
    Queue,
    History,
    View,
    Upload,
}

/// One relay call: `submit(action, target_address, payload)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRequest {
    pub action: RelayAction,
    pub target_address: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ObjectInfoPayload {
    class_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct EnqueuePayload {
    graph: Graph,
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryPayload {
    prompt_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct UploadPayload {
    filename: String,
    data_base64: String,
}

/// Base64 file blob returned for `view`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactBlob {
    pub filename: String,
    pub mime_type: String,
    pub data_base64: String,
}

impl ArtifactBlob {
    pub fn encode(artifact: &Artifact) -> Self {
        Self {
            filename: artifact.filename.clone(),
            mime_type: artifact.mime_type.clone(),
            data_base64: BASE64.encode(&artifact.bytes),
        }
    }

    pub fn decode(self) -> Result<Artifact, TransportError> {
        let bytes = BASE64
            .decode(self.data_base64.as_bytes())
            .map_err(|e| TransportError::Parse(format!("invalid base64 artifact: {e}")))?;
        Ok(Artifact {
            filename: self.filename,
            mime_type: self.mime_type,
            bytes,
        })
    }
}

/// Which [`TransportError`] a failed relay call came from, so the client
/// side can rebuild it and keep retry decisions identical to a direct
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayErrorKind {
    NotConfigured,
    Request,
    Timeout,
    Status,
    Parse,
    Relay,
}

impl RelayErrorKind {
    fn of(err: &TransportError) -> Self {
        match err {
            TransportError::NotConfigured => Self::NotConfigured,
            TransportError::Request(_) => Self::Request,
            TransportError::Timeout(_) => Self::Timeout,
            TransportError::Status { .. } => Self::Status,
            TransportError::Parse(_) => Self::Parse,
            TransportError::Relay(_) => Self::Relay,
        }
    }
}

/// Uniform relay answer.
///
/// `status` is the job server's HTTP status when it answered, or a
/// gateway-style status when it could not be reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    pub ok: bool,
    pub status: u16,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<RelayErrorKind>,
}

impl NormalizedResponse {
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            status: 200,
            data,
            error: None,
            error_kind: None,
        }
    }

    pub fn failure(err: &TransportError) -> Self {
        let (status, message) = match err {
            TransportError::NotConfigured => (400, err.to_string()),
            TransportError::Relay(_) => (400, err.to_string()),
            TransportError::Status { status, body } => (*status, body.clone()),
            TransportError::Timeout(_) => (504, err.to_string()),
            TransportError::Request(_) | TransportError::Parse(_) => (502, err.to_string()),
        };
        Self {
            ok: false,
            status,
            data: Value::Null,
            error: Some(message),
            error_kind: Some(RelayErrorKind::of(err)),
        }
    }

    /// Rebuild the transport error of a failed call.
    ///
    /// Envelopes without `error_kind` fall back to the gateway statuses
    /// [`failure`](Self::failure) assigns: 504 is a timeout and 502 a
    /// request failure.
    pub fn into_error(self) -> TransportError {
        let message = self.error.unwrap_or_default();
        let kind = self.error_kind.unwrap_or(match self.status {
            504 => RelayErrorKind::Timeout,
            502 => RelayErrorKind::Request,
            _ => RelayErrorKind::Status,
        });
        match kind {
            RelayErrorKind::NotConfigured => TransportError::NotConfigured,
            RelayErrorKind::Request => TransportError::Request(message),
            RelayErrorKind::Timeout => TransportError::Timeout(message),
            RelayErrorKind::Parse => TransportError::Parse(message),
            RelayErrorKind::Relay => TransportError::Relay(message),
            RelayErrorKind::Status => TransportError::Status {
                status: self.status,
                body: message,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

fn payload<T: serde::de::DeserializeOwned>(
    action: RelayAction,
    raw: Value,
) -> Result<T, TransportError> {
    serde_json::from_value(raw)
        .map_err(|e| TransportError::Relay(format!("invalid {action:?} payload: {e}")))
}

/// Execute one relay request against its target job server.
///
/// No state is kept between calls; `client` only provides connection pooling.
pub async fn dispatch(
    client: &reqwest::Client,
    call_timeout: Duration,
    request: RelayRequest,
) -> NormalizedResponse {
    let action = request.action;
    let target = request.target_address.trim().to_string();
    let result = forward(client, call_timeout, request).await;
    match result {
        Ok(data) => NormalizedResponse::success(data),
        Err(e) => {
            tracing::warn!(?action, target = %target, error = %e, "Relay request failed");
            NormalizedResponse::failure(&e)
        }
    }
}

async fn forward(
    client: &reqwest::Client,
    call_timeout: Duration,
    request: RelayRequest,
) -> Result<Value, TransportError> {
    let target = request.target_address.trim();
    if target.is_empty() {
        return Err(TransportError::NotConfigured);
    }
    let api = ComfyUIApi::with_client(client.clone(), target).with_call_timeout(call_timeout);
    let action = request.action;

    match action {
        RelayAction::SystemStats => api.ping().await,
        RelayAction::ObjectInfo => {
            let p: ObjectInfoPayload = payload(action, request.payload)?;
            api.object_info(&p.class_type).await
        }
        RelayAction::Enqueue => {
            let p: EnqueuePayload = payload(action, request.payload)?;
            Ok(serde_json::to_value(api.enqueue(&p.graph).await?)?)
        }
        RelayAction::Queue => Ok(serde_json::to_value(api.queue().await?)?),
        RelayAction::History => {
            let p: HistoryPayload = payload(action, request.payload)?;
            api.history(&p.prompt_id).await
        }
        RelayAction::View => {
            let artifact: ArtifactRef = payload(action, request.payload)?;
            let fetched = api.fetch_artifact(&artifact).await?;
            Ok(serde_json::to_value(ArtifactBlob::encode(&fetched))?)
        }
        RelayAction::Upload => {
            let p: UploadPayload = payload(action, request.payload)?;
            let bytes = BASE64
                .decode(p.data_base64.as_bytes())
                .map_err(|e| TransportError::Relay(format!("invalid base64 upload: {e}")))?;
            Ok(serde_json::to_value(api.upload_image(&p.filename, bytes).await?)?)
        }
    }
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// [`JobTransport`] that routes every call through a relay server.
#[derive(Clone)]
pub struct RelayClient {
    client: reqwest::Client,
    relay_url: String,
    target_address: String,
}

impl RelayClient {
    /// * `relay_url` - Full URL of the relay endpoint.
    /// * `target_address` - Job server address the relay should contact.
    pub fn new(relay_url: impl Into<String>, target_address: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            relay_url: relay_url.into(),
            target_address: target_address.into(),
        }
    }

    async fn call(&self, action: RelayAction, payload: Value) -> Result<Value, TransportError> {
        let request = RelayRequest {
            action,
            target_address: self.target_address.clone(),
            payload,
        };
        let response = self
            .client
            .post(&self.relay_url)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        let normalized: NormalizedResponse = serde_json::from_slice(&bytes).map_err(|e| {
            TransportError::Relay(format!(
                "relay answered {status} with a non-envelope body: {e}"
            ))
        })?;

        if normalized.ok {
            Ok(normalized.data)
        } else {
            Err(normalized.into_error())
        }
    }
}

#[async_trait::async_trait]
impl JobTransport for RelayClient {
    async fn system_stats(&self) -> Result<Value, TransportError> {
        self.call(RelayAction::SystemStats, Value::Null).await
    }

    async fn object_info(&self, class_type: &str) -> Result<Value, TransportError> {
        let payload = serde_json::to_value(ObjectInfoPayload {
            class_type: class_type.to_string(),
        })?;
        self.call(RelayAction::ObjectInfo, payload).await
    }

    async fn enqueue(&self, graph: &Graph) -> Result<SubmitResponse, TransportError> {
        let payload = serde_json::json!({ "graph": graph });
        let data = self.call(RelayAction::Enqueue, payload).await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn queue(&self) -> Result<QueueSnapshot, TransportError> {
        let data = self.call(RelayAction::Queue, Value::Null).await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn history(&self, prompt_id: &str) -> Result<Value, TransportError> {
        let payload = serde_json::to_value(HistoryPayload {
            prompt_id: prompt_id.to_string(),
        })?;
        self.call(RelayAction::History, payload).await
    }

    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Artifact, TransportError> {
        let data = self
            .call(RelayAction::View, serde_json::to_value(artifact)?)
            .await?;
        let blob: ArtifactBlob = serde_json::from_value(data)?;
        blob.decode()
    }

    async fn upload_image(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadResponse, TransportError> {
        let payload = serde_json::to_value(UploadPayload {
            filename: filename.to_string(),
            data_base64: BASE64.encode(&bytes),
        })?;
        let data = self.call(RelayAction::Upload, payload).await?;
        Ok(serde_json::from_value(data)?)
    }
}
