use async_trait::async_trait;
use reqwest::multipart;
use reqwest::StatusCode;
use serde::Deserialize;

use super::{validate_upload, MediaError, MediaStore, StoredAsset};
use crate::config::MediaConfig;

/// HTTP client for the media host: multipart upload, delete by public id.
/// No retries; a failed call surfaces to the handler as an upstream error.
pub struct RemoteMediaStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    public_id: String,
    url: String,
}

impl RemoteMediaStore {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl MediaStore for RemoteMediaStore {
    async fn store(
        &self,
        bytes: Vec<u8>,
        mime: &str,
        folder: &str,
        transform: bool,
    ) -> Result<StoredAsset, MediaError> {
        validate_upload(&bytes, mime)?;

        let part = multipart::Part::bytes(bytes)
            .file_name("upload")
            .mime_str(mime)
            .map_err(|e| MediaError::Rejected(e.to_string()))?;
        let form = multipart::Form::new().part("file", part);

        let url = format!(
            "{}/assets?folder={}&transform={}",
            self.base_url, folder, transform
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| MediaError::Transport(e.to_string()))?;

        match resp.status() {
            s if s.is_success() => {
                let body: UploadResponse = resp
                    .json()
                    .await
                    .map_err(|e| MediaError::Transport(e.to_string()))?;
                Ok(StoredAsset {
                    public_id: body.public_id,
                    url: body.url,
                })
            }
            StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => {
                Err(MediaError::Rejected(format!(
                    "host rejected upload ({})",
                    resp.status()
                )))
            }
            s => Err(MediaError::Transport(format!("upload failed ({s})"))),
        }
    }

    async fn remove(&self, public_id: &str) -> Result<(), MediaError> {
        let url = format!("{}/assets/{}", self.base_url, public_id);
        let resp = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| MediaError::Transport(e.to_string()))?;

        match resp.status() {
            // Already gone counts as removed
            s if s.is_success() || s == StatusCode::NOT_FOUND => Ok(()),
            s => Err(MediaError::Transport(format!("delete failed ({s})"))),
        }
    }
}
