// Image hosting client (imgbb-compatible upload API)
use std::time::Duration;

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use thiserror::Error;

use crate::config::ImagesConfig;
use crate::db::models::ApiKeys;
use crate::store::{DocumentStore, StoreError};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Image host API key is not configured")]
    MissingApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Upload rejected by image host (status {0})")]
    Rejected(u16),

    #[error("Image is larger than {0} bytes")]
    TooLarge(usize),

    #[error("Image is empty")]
    Empty,

    #[error("Settings error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    data: Option<UploadData>,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    status: u16,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    url: Option<String>,
}

pub struct ImageHost {
    http_client: reqwest::Client,
    endpoint: String,
    max_bytes: usize,
}

impl ImageHost {
    pub fn new(config: &ImagesConfig) -> Result<Self, UploadError> {
        url::Url::parse(&config.endpoint)
            .map_err(|e| UploadError::Network(format!("invalid endpoint: {}", e)))?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| UploadError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            max_bytes: config.max_bytes,
        })
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Upload using the image host key from the settings document.
    /// Returns the public URL of the hosted image.
    pub async fn upload(
        &self,
        store: &dyn DocumentStore,
        image: Bytes,
        file_name: Option<&str>,
    ) -> Result<String, UploadError> {
        self.check_size(&image)?;
        let keys = ApiKeys::load(store).await?;
        let key = keys.image_host_key().ok_or(UploadError::MissingApiKey)?;
        self.upload_with_key(key, image, file_name).await
    }

    pub async fn upload_with_key(
        &self,
        api_key: &str,
        image: Bytes,
        file_name: Option<&str>,
    ) -> Result<String, UploadError> {
        self.check_size(&image)?;

        let file_name = file_name.unwrap_or("dream.jpg").to_string();
        let mime = mime_guess::from_path(&file_name).first_or_octet_stream();
        let size = image.len();

        let part = Part::bytes(image.to_vec())
            .file_name(file_name)
            .mime_str(mime.as_ref())
            .map_err(|e| UploadError::Network(e.to_string()))?;
        let form = Form::new().part("image", part);

        tracing::debug!(bytes = size, "Uploading image");

        let response = self
            .http_client
            .post(&self.endpoint)
            .query(&[("key", api_key)])
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(UploadError::Api(status.as_u16(), error_text));
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| UploadError::Parse(e.to_string()))?;

        if !body.success {
            return Err(UploadError::Rejected(body.status));
        }

        let url = body
            .data
            .and_then(|d| d.url)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| UploadError::Parse("response has no image url".into()))?;

        tracing::info!(bytes = size, url = %url, "Image uploaded");
        Ok(url)
    }

    fn check_size(&self, image: &[u8]) -> Result<(), UploadError> {
        if image.is_empty() {
            return Err(UploadError::Empty);
        }
        if image.len() > self.max_bytes {
            return Err(UploadError::TooLarge(self.max_bytes));
        }
        Ok(())
    }
}
