//! Transport abstraction for reaching the backend.
//!
//! The connectivity layer assumes an underlying transport that can
//! (1) perform a liveness probe with a timeout and (2) open a
//! unidirectional server-push channel identified by a name. The trait
//! keeps the health monitor and channel manager testable against mock
//! backends; `HttpTransport` is the production implementation.

mod http;

pub use http::{HttpTransport, HttpTransportBuilder};

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::TransportError;

/// Raw frames from a push channel, one structured message per item.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// The seam between the connectivity layer and the network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one liveness round-trip against the backend.
    ///
    /// Returns the elapsed time on success. Implementations must enforce
    /// the given deadline and report overruns as `TransportError::Timeout`.
    async fn probe(&self, timeout: Duration) -> Result<Duration, TransportError>;

    /// Open a named server-push channel.
    ///
    /// The returned stream yields newline-delimited frames until the
    /// connection drops; it has no deadline of its own.
    async fn open_stream(&self, name: &str) -> Result<FrameStream, TransportError>;
}
