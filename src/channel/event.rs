//! Inbound push-channel events.

use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// A structured message from a push channel.
///
/// Every event carries at minimum a `type` discriminator and a
/// timestamp; everything else is an opaque payload the consumer
/// interprets for itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Discriminator naming the kind of event (e.g. "analysis.updated").
    #[serde(rename = "type")]
    pub event_type: String,
    /// Server-side emission time, milliseconds since the Unix epoch.
    #[serde(rename = "timestamp")]
    pub timestamp_ms: u64,
    /// Remaining fields of the message, untouched.
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl StreamEvent {
    /// Parse one raw frame. Failures are recoverable per-message; the
    /// channel stays open.
    pub(crate) fn parse(frame: &str) -> Result<Self, ChannelError> {
        serde_json::from_str(frame).map_err(|err| ChannelError::MalformedPayload(err.to_string()))
    }
}
