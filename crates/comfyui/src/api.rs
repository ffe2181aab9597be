//! REST API client for the job server's HTTP endpoints.
//!
//! Wraps system status, node schema lookup, graph submission, queue and
//! history retrieval, output download and input upload using [`reqwest`].
//! Every request carries a per-call timeout so one stalled call cannot
//! hang a poll loop.

use std::time::Duration;

use reel_core::clip::mime_for_filename;

use crate::transport::{
    Artifact, ArtifactRef, JobTransport, QueueSnapshot, SubmitResponse, TransportError,
    UploadResponse,
};
use crate::workflow::Graph;

/// Default time budget for a single request.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Time budget for the connectivity probe.
pub const CONNECT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for a single job server.
#[derive(Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    client_id: String,
    call_timeout: Duration,
}

impl ComfyUIApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188` or a tunnel URL.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (connection pooling across targets in the relay).
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            client_id: uuid::Uuid::new_v4().to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// `GET /system_stats` with the short connectivity timeout.
    pub async fn ping(&self) -> Result<serde_json::Value, TransportError> {
        let response = self
            .client
            .get(self.url("/system_stats")?)
            .timeout(CONNECT_CHECK_TIMEOUT)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> Result<String, TransportError> {
        if self.api_url.is_empty() {
            return Err(TransportError::NotConfigured);
        }
        Ok(format!("{}{path}", self.api_url))
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`TransportError::Status`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait::async_trait]
impl JobTransport for ComfyUIApi {
    async fn system_stats(&self) -> Result<serde_json::Value, TransportError> {
        self.ping().await
    }

    async fn object_info(&self, class_type: &str) -> Result<serde_json::Value, TransportError> {
        let response = self
            .client
            .get(self.url(&format!("/object_info/{class_type}"))?)
            .timeout(self.call_timeout)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn enqueue(&self, graph: &Graph) -> Result<SubmitResponse, TransportError> {
        let body = serde_json::json!({
            "prompt": graph,
            "client_id": self.client_id,
        });

        let response = self
            .client
            .post(self.url("/prompt")?)
            .timeout(self.call_timeout)
            .json(&body)
            .send()
            .await?;

        let submitted: SubmitResponse = Self::parse_response(response).await?;
        tracing::debug!(prompt_id = %submitted.prompt_id, number = submitted.number, "Graph queued");
        Ok(submitted)
    }

    async fn queue(&self) -> Result<QueueSnapshot, TransportError> {
        let response = self
            .client
            .get(self.url("/queue")?)
            .timeout(self.call_timeout)
            .send()
            .await?;
        let raw: serde_json::Value = Self::parse_response(response).await?;
        Ok(QueueSnapshot::from_raw(&raw))
    }

    async fn history(&self, prompt_id: &str) -> Result<serde_json::Value, TransportError> {
        let response = self
            .client
            .get(self.url(&format!("/history/{prompt_id}"))?)
            .timeout(self.call_timeout)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Artifact, TransportError> {
        let response = self
            .client
            .get(self.url("/view")?)
            .query(&[
                ("filename", artifact.filename.as_str()),
                ("subfolder", artifact.subfolder.as_str()),
                ("type", artifact.kind.as_str()),
            ])
            .timeout(self.call_timeout)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty() && *v != "application/octet-stream")
            .map(str::to_string)
            .unwrap_or_else(|| mime_for_filename(&artifact.filename).to_string());
        let bytes = response.bytes().await?.to_vec();

        Ok(Artifact {
            filename: artifact.filename.clone(),
            mime_type,
            bytes,
        })
    }

    async fn upload_image(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadResponse, TransportError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime_for_filename(filename))
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("type", "input")
            .text("overwrite", "true");

        let response = self
            .client
            .post(self.url("/upload/image")?)
            .timeout(self.call_timeout)
            .multipart(form)
            .send()
            .await?;
        Self::parse_response(response).await
    }
}
