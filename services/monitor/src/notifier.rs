//! Gate display notifications.
//!
//! The display controller exposes `GET /update?plate=..&status=..`. Delivery
//! is best-effort: every failure is classified and returned to the caller,
//! which reports it and moves on.

use crate::config::{ConfigValidationError, NotifierConfig};
use crate::store::PaymentStatus;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while notifying the display.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Invalid notifier configuration: {0}")]
    Config(#[from] ConfigValidationError),

    #[error("HTTP client initialization failed: {0}")]
    ClientInit(String),

    #[error("Display did not answer in time: {0}")]
    Timeout(String),

    #[error("Display unreachable: {0}")]
    Connect(String),

    #[error("Display returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Display request failed: {0}")]
    Request(String),
}

impl NotifyError {
    /// Short classification used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            NotifyError::Config(_) | NotifyError::ClientInit(_) => "config",
            NotifyError::Timeout(_) => "timeout",
            NotifyError::Connect(_) => "connect",
            NotifyError::Status { .. } => "status",
            NotifyError::Request(_) => "request",
        }
    }
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NotifyError::Timeout(err.to_string())
        } else if err.is_connect() {
            NotifyError::Connect(err.to_string())
        } else {
            NotifyError::Request(err.to_string())
        }
    }
}

/// Pushes a plate's payment status to the remote display.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, plate: &str, status: PaymentStatus) -> Result<(), NotifyError>;
}

/// HTTP GET notifier for the display controller.
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpNotifier {
    pub fn new(config: &NotifierConfig) -> Result<Self, NotifyError> {
        let endpoint = config.endpoint_url()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| NotifyError::ClientInit(e.to_string()))?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, plate: &str, status: PaymentStatus) -> Result<(), NotifyError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("plate", plate), ("status", status.as_str())])
            .send()
            .await?;

        let code = response.status();
        if code != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                status: code.as_u16(),
                body,
            });
        }

        debug!(plate, status = %status, "Display updated");
        Ok(())
    }
}
