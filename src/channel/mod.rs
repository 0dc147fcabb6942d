//! Managed server-push channels.
//!
//! The `ChannelManager` keeps zero or more named push subscriptions
//! alive, transparently recovering from transient drops with a bounded,
//! fixed-delay reconnect policy, so consumer code never implements
//! backoff itself. Each channel moves through an explicit state machine:
//!
//! ```text
//! Closed -> Connecting -> Open -> (Error -> ReconnectWait -> Connecting)* -> Closed
//! ```

mod event;
mod manager;

pub use event::StreamEvent;
pub use manager::{ChannelCallbacks, ChannelManager, ChannelState};
