//! Camera stream client with single-shot reconnection support.
//!
//! This module handles connecting to the MJPEG stream served by the gate
//! camera and handing individual JPEG frames to the acquisition loop.

use crate::config::{CameraConfig, ConfigValidationError};
use crate::mjpeg::{FrameOverflow, JpegFrameExtractor};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur during stream operations.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Invalid camera configuration: {0}")]
    Config(#[from] ConfigValidationError),

    #[error("HTTP client initialization failed: {0}")]
    ClientInit(String),

    #[error("Stream connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Stream is not connected")]
    NotConnected,

    #[error("Stream read failed: {0}")]
    Read(String),

    #[error("Stream ended by the camera")]
    Ended,

    #[error("No complete frame received within {0:?}")]
    Timeout(Duration),

    #[error("Frame decode failed: {0}")]
    Decode(#[from] FrameOverflow),
}

impl StreamError {
    /// Short classification used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::Config(_) | StreamError::ClientInit(_) => "config",
            StreamError::ConnectionFailed(_) | StreamError::NotConnected => "connect",
            StreamError::Read(_) | StreamError::Ended | StreamError::Timeout(_) => "read",
            StreamError::Decode(_) => "decode",
        }
    }
}

/// A JPEG frame extracted from the camera stream.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Encoded JPEG bytes
    pub data: Bytes,

    /// Frame sequence number since the current connection was opened
    pub sequence: u64,

    /// Timestamp when frame was received
    pub captured_at: Instant,
}

/// Statistics for the camera stream.
#[derive(Debug, Default, Clone)]
pub struct StreamStats {
    pub frames_received: u64,
    pub bytes_received: u64,
    pub reconnect_count: u32,
    pub last_frame_at: Option<Instant>,
    pub stream_start: Option<Instant>,
}

/// State of the camera connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Source of camera frames driven by the acquisition loop.
///
/// `open` may be called again after `close` to replace a failed connection.
#[async_trait]
pub trait FrameSource: Send {
    async fn open(&mut self) -> Result<(), StreamError>;

    async fn read_frame(&mut self) -> Result<RawFrame, StreamError>;

    /// Release the connection. Idempotent.
    fn close(&mut self);

    fn state(&self) -> ConnectionState;
}

/// MJPEG-over-HTTP camera client.
pub struct MjpegStream {
    config: CameraConfig,
    url: Url,
    client: reqwest::Client,
    body: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    extractor: JpegFrameExtractor,
    state: ConnectionState,
    frame_sequence: u64,
    stats: StreamStats,
}

impl MjpegStream {
    /// Create a new stream client. Fails fast on an absent or malformed URL.
    pub fn new(config: CameraConfig) -> Result<Self, StreamError> {
        let url = config.stream_url()?;

        // No overall request timeout: the response body never completes.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connection_timeout())
            .build()
            .map_err(|e| StreamError::ClientInit(e.to_string()))?;

        let extractor = JpegFrameExtractor::new(config.max_frame_bytes);

        Ok(Self {
            config,
            url,
            client,
            body: None,
            extractor,
            state: ConnectionState::Disconnected,
            frame_sequence: 0,
            stats: StreamStats::default(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Get current stream statistics.
    pub fn stats(&self) -> StreamStats {
        self.stats.clone()
    }

    /// Issue the stream request. Borrows only the client and URL so the
    /// `open` future stays `Send` while `self` holds a non-`Sync` body stream.
    async fn connect(
        client: &reqwest::Client,
        url: &Url,
        timeout: Duration,
    ) -> Result<BoxStream<'static, reqwest::Result<Bytes>>, StreamError> {
        let response = tokio::time::timeout(timeout, client.get(url.clone()).send())
            .await
            .map_err(|_| {
                StreamError::ConnectionFailed(format!("no response within {:?}", timeout))
            })?
            .map_err(|e| StreamError::ConnectionFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::ConnectionFailed(format!(
                "camera returned HTTP {}",
                status
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !content_type.starts_with("multipart/") {
            warn!(
                url = %url,
                content_type = %content_type,
                "Camera response is not multipart, frames are located by JPEG markers only"
            );
        }

        Ok(response.bytes_stream().boxed())
    }
}

#[async_trait]
impl FrameSource for MjpegStream {
    async fn open(&mut self) -> Result<(), StreamError> {
        let reopening = self.stats.stream_start.is_some();
        self.close();
        self.state = if reopening {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        };

        let timeout = self.config.connection_timeout();
        match Self::connect(&self.client, &self.url, timeout).await {
            Ok(body) => {
                self.body = Some(body);
                self.frame_sequence = 0;
                self.state = ConnectionState::Connected;
                self.stats.stream_start = Some(Instant::now());
                if reopening {
                    self.stats.reconnect_count += 1;
                }
                info!(url = %self.url, reconnect = reopening, "Connected to camera stream");
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Failed;
                Err(e)
            }
        }
    }

    async fn read_frame(&mut self) -> Result<RawFrame, StreamError> {
        let deadline = self.config.read_timeout();
        let body = self.body.as_mut().ok_or(StreamError::NotConnected)?;
        let extractor = &mut self.extractor;

        let data = tokio::time::timeout(deadline, async {
            loop {
                match extractor.next_frame() {
                    Ok(Some(frame)) => return Ok(frame),
                    Ok(None) => {}
                    Err(e) => return Err(StreamError::Decode(e)),
                }
                match body.next().await {
                    Some(Ok(chunk)) => extractor.push(&chunk),
                    Some(Err(e)) => return Err(StreamError::Read(e.to_string())),
                    None => return Err(StreamError::Ended),
                }
            }
        })
        .await
        .map_err(|_| StreamError::Timeout(deadline))??;

        let now = Instant::now();
        let sequence = self.frame_sequence;
        self.frame_sequence += 1;
        self.stats.frames_received += 1;
        self.stats.bytes_received += data.len() as u64;
        self.stats.last_frame_at = Some(now);

        debug!(sequence, bytes = data.len(), "Frame received");

        Ok(RawFrame {
            data,
            sequence,
            captured_at: now,
        })
    }

    fn close(&mut self) {
        if self.body.take().is_some() {
            debug!(url = %self.url, "Camera stream released");
        }
        self.extractor.clear();
        self.state = ConnectionState::Disconnected;
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}
