//! Upload client for the Lexoffice document API.
//!
//! One multipart `POST` per attachment: a `file` field carrying the original
//! filename and a `type` field classifying the document as a voucher.
//! Status alone decides the outcome; the response body is only kept for
//! diagnostics. Redirects are not followed, so a 3xx counts as a failure.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};

use crate::config::UploadConfig;
use crate::error::UploadError;

/// Bound on a single upload request, connect through response.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Document category sent in the `type` field.
pub const VOUCHER_TYPE: &str = "voucher";

/// Destination for qualifying attachments.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload one file. Exactly one attempt, no retry.
    async fn upload(&self, filename: &str, payload: Vec<u8>) -> Result<(), UploadError>;
}

/// `Uploader` backed by the Lexoffice `v1/files` endpoint.
pub struct LexofficeUploader {
    client: reqwest::Client,
    url: String,
    api_key: SecretString,
}

impl LexofficeUploader {
    pub fn new(config: &UploadConfig) -> Result<Self, UploadError> {
        Self::with_timeout(config, UPLOAD_TIMEOUT)
    }

    pub fn with_timeout(config: &UploadConfig, timeout: Duration) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl Uploader for LexofficeUploader {
    async fn upload(&self, filename: &str, payload: Vec<u8>) -> Result<(), UploadError> {
        let part = Part::bytes(payload)
            .file_name(filename.to_string())
            .mime_str(content_type_for(filename))?;
        let form = Form::new().part("file", part).text("type", VOUCHER_TYPE);

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret())
            .header(ACCEPT, "application/json")
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            tracing::debug!(filename, status = status.as_u16(), "Upload accepted");
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        Err(UploadError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// MIME type for the `file` part, from the filename extension.
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "xml" => "application/xml",
        _ => "application/octet-stream",
    }
}
