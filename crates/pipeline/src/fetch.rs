//! Dereferencing [`MediaRef`]s.

use reel_comfyui::transport::TransportError;
use reel_core::clip::MediaRef;

/// Bytes behind a media reference; URLs are downloaded.
pub async fn fetch_media(
    client: &reqwest::Client,
    media: &MediaRef,
) -> Result<Vec<u8>, TransportError> {
    match media {
        MediaRef::Data { bytes, .. } => Ok(bytes.clone()),
        MediaRef::Url { url } => {
            let response = client.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(TransportError::Status {
                    status: status.as_u16(),
                    body,
                });
            }
            Ok(response.bytes().await?.to_vec())
        }
    }
}

/// MIME type of a media reference, if it can be told without fetching.
pub fn media_mime(media: &MediaRef) -> Option<String> {
    match media {
        MediaRef::Data { mime_type, .. } => Some(mime_type.clone()),
        MediaRef::Url { url } => {
            let path = url.split(['?', '#']).next().unwrap_or(url);
            let mime = reel_core::clip::mime_for_filename(path);
            (mime != "application/octet-stream").then(|| mime.to_string())
        }
    }
}
