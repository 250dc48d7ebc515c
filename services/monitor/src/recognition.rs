//! Plate recognition client.
//!
//! Snapshots are uploaded as multipart form data to a Plate Recognizer style
//! endpoint. The response carries a `results` array; each entry with a plate
//! string becomes a [`RecognitionCandidate`].

use crate::config::{ConfigValidationError, RecognitionConfig};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Errors that can occur during a recognition call.
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("Invalid recognition configuration: {0}")]
    Config(#[from] ConfigValidationError),

    #[error("HTTP client initialization failed: {0}")]
    ClientInit(String),

    #[error("Failed to read snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Recognition request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Recognition service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed recognition response: {0}")]
    MalformedResponse(String),
}

/// A plate reading with its confidence score in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionCandidate {
    pub plate: String,
    pub confidence: f64,
}

/// Submits an image and returns zero or more plate candidates. An empty list
/// means no plate was found.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlateRecognizer: Send + Sync {
    async fn recognize(
        &self,
        image_path: &Path,
    ) -> Result<Vec<RecognitionCandidate>, RecognitionError>;
}

#[derive(Debug, Deserialize)]
struct PlateReaderResponse {
    #[serde(default)]
    results: Vec<PlateReaderResult>,
}

#[derive(Debug, Deserialize)]
struct PlateReaderResult {
    #[serde(default)]
    plate: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

/// HTTP client for the plate reader API.
pub struct RecognitionClient {
    client: reqwest::Client,
    api_url: Url,
    authorization: String,
    regions: Vec<String>,
}

impl RecognitionClient {
    /// Build the client. The credential is normalized here, once.
    pub fn new(config: &RecognitionConfig) -> Result<Self, RecognitionError> {
        let api_url = config.api_url()?;
        let authorization = config.authorization()?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RecognitionError::ClientInit(e.to_string()))?;

        debug!(
            url = %api_url,
            scheme = authorization.split(' ').next().unwrap_or_default(),
            "Recognition client ready"
        );

        Ok(Self {
            client,
            api_url,
            authorization,
            regions: config.regions.clone(),
        })
    }

    /// Authorization header value sent with every request.
    pub fn authorization(&self) -> &str {
        &self.authorization
    }
}

#[async_trait]
impl PlateRecognizer for RecognitionClient {
    #[instrument(skip(self, image_path), fields(image = %image_path.display()))]
    async fn recognize(
        &self,
        image_path: &Path,
    ) -> Result<Vec<RecognitionCandidate>, RecognitionError> {
        let image = tokio::fs::read(image_path)
            .await
            .map_err(|source| RecognitionError::Io {
                path: image_path.to_path_buf(),
                source,
            })?;

        let file_name = image_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot.jpg".to_string());

        let upload = Part::bytes(image)
            .file_name(file_name)
            .mime_str("image/jpeg")?;
        let mut form = Form::new().part("upload", upload);
        for region in &self.regions {
            form = form.text("regions", region.clone());
        }

        let response = self
            .client
            .post(self.api_url.clone())
            .header(AUTHORIZATION, self.authorization.as_str())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!(status = status.as_u16(), "Recognition response received");

        if !status.is_success() {
            return Err(RecognitionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_candidates(&body)
    }
}

/// Parse a plate reader response body into candidates. Entries without a
/// plate are reported and skipped; missing or non-finite scores count as 0.
pub fn parse_candidates(body: &str) -> Result<Vec<RecognitionCandidate>, RecognitionError> {
    let response: PlateReaderResponse = serde_json::from_str(body)
        .map_err(|e| RecognitionError::MalformedResponse(e.to_string()))?;

    let mut candidates = Vec::with_capacity(response.results.len());
    for (index, result) in response.results.into_iter().enumerate() {
        let plate = match result.plate {
            Some(plate) if !plate.trim().is_empty() => plate.trim().to_string(),
            _ => {
                warn!(index, "Recognition result without a plate, skipping");
                continue;
            }
        };

        let confidence = result
            .score
            .filter(|score| score.is_finite())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);

        candidates.push(RecognitionCandidate { plate, confidence });
    }

    Ok(candidates)
}
