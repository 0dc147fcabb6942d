//! HTTP transport built on `reqwest`.
//!
//! Probes are plain GETs against a fixed liveness path with a per-request
//! deadline. Push channels are long-lived GETs against a path
//! parameterized by the channel name, consumed as newline-delimited
//! frames.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::Client;

use super::{FrameStream, Transport};
use crate::error::TransportError;

/// Production transport that talks to the backend over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    probe_path: String,
    stream_path: String,
}

impl HttpTransport {
    /// Create a new builder for configuring the transport.
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::default()
    }

    fn probe_url(&self) -> String {
        format!("{}{}", self.endpoint, self.probe_path)
    }

    fn stream_url(&self, name: &str) -> String {
        format!("{}{}/{}", self.endpoint, self.stream_path, name)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn probe(&self, timeout: Duration) -> Result<Duration, TransportError> {
        let started = Instant::now();

        let response = self
            .client
            .get(self.probe_url())
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| classify(err, timeout))?;

        if !response.status().is_success() {
            return Err(TransportError::Other(format!(
                "liveness endpoint returned status {}",
                response.status()
            )));
        }

        Ok(started.elapsed())
    }

    async fn open_stream(&self, name: &str) -> Result<FrameStream, TransportError> {
        let response = self
            .client
            .get(self.stream_url(name))
            .send()
            .await
            .map_err(|err| classify_stream(err))?;

        if !response.status().is_success() {
            return Err(TransportError::Other(format!(
                "stream endpoint returned status {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(classify_stream))
            .boxed();
        Ok(Box::pin(FrameSplitter::new(bytes)))
    }
}

/// Classify a reqwest error under a known probe deadline.
fn classify(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_connect() {
        TransportError::Unreachable(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

/// Classify a reqwest error on a stream, where no deadline applies.
fn classify_stream(err: reqwest::Error) -> TransportError {
    if err.is_connect() {
        TransportError::Unreachable(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

/// Builder for `HttpTransport`.
#[derive(Debug, Default)]
pub struct HttpTransportBuilder {
    endpoint: Option<String>,
    probe_path: Option<String>,
    stream_path: Option<String>,
}

impl HttpTransportBuilder {
    /// Set the backend base URL (e.g. "http://localhost:8080").
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the liveness probe path (default: "/api/health").
    pub fn probe_path(mut self, path: impl Into<String>) -> Self {
        self.probe_path = Some(path.into());
        self
    }

    /// Set the push-channel base path (default: "/api/streams").
    pub fn stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = Some(path.into());
        self
    }

    /// Build the transport.
    ///
    /// No global client timeout is configured: probes carry a per-request
    /// deadline and streams are long-lived by design.
    pub fn build(self) -> Result<HttpTransport, TransportError> {
        let client = Client::builder()
            .build()
            .map_err(|err| TransportError::Other(err.to_string()))?;

        Ok(HttpTransport {
            client,
            endpoint: self
                .endpoint
                .unwrap_or_else(|| "http://localhost:8080".to_string()),
            probe_path: self.probe_path.unwrap_or_else(|| "/api/health".to_string()),
            stream_path: self
                .stream_path
                .unwrap_or_else(|| "/api/streams".to_string()),
        })
    }
}

/// Reassembles a chunked byte stream into newline-delimited frames.
///
/// Blank lines are skipped; a trailing frame without a newline is
/// flushed when the underlying stream ends.
struct FrameSplitter<S> {
    inner: S,
    buffer: Vec<u8>,
    done: bool,
}

impl<S> FrameSplitter<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            done: false,
        }
    }
}

impl<S, B> Stream for FrameSplitter<S>
where
    S: Stream<Item = Result<B, TransportError>> + Unpin,
    B: AsRef<[u8]>,
{
    type Item = Result<String, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(pos) = this.buffer.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = this.buffer.drain(..=pos).collect();
                line.pop();
                let text = String::from_utf8_lossy(&line).trim().to_string();
                if text.is_empty() {
                    continue;
                }
                return Poll::Ready(Some(Ok(text)));
            }

            if this.done {
                if this.buffer.is_empty() {
                    return Poll::Ready(None);
                }
                let text = String::from_utf8_lossy(&this.buffer).trim().to_string();
                this.buffer.clear();
                if text.is_empty() {
                    return Poll::Ready(None);
                }
                return Poll::Ready(Some(Ok(text)));
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.buffer.extend_from_slice(chunk.as_ref()),
                Poll::Ready(Some(Err(err))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => this.done = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
