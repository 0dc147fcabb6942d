//! Connectivity & synchronization layer for clients of an unreliable
//! backend.
//!
//! Three cooperating parts give every feature in an application a
//! single, consistent answer to "is the backend reachable, and what's
//! the latest data?" without each caller re-implementing retry,
//! backoff, or staleness logic:
//!
//! - [`HealthMonitor`] - a process-wide backend-health monitor that
//!   probes a liveness endpoint on a shared timer and gates all
//!   outbound calls through [`HealthMonitor::gated_request`].
//! - [`ChannelManager`] - opens, supervises, and automatically recovers
//!   long-lived named server-push subscriptions with a bounded,
//!   fixed-delay reconnect policy.
//! - [`TtlCache`] - a time-bounded cache that deduplicates and
//!   short-circuits repeated reads.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      feature code                          │
//! │   gated_request()      on_message()        get()/set()     │
//! └───────┬───────────────────┬───────────────────┬────────────┘
//!         │                   │                   │
//! ┌───────▼────────┐  ┌───────▼────────┐  ┌───────▼────────┐
//! │ HealthMonitor  │  │ ChannelManager │  │   TtlCache     │
//! │ probe / state  │  │ open / recover │  │ expiry / evict │
//! └───────┬────────┘  └───────┬────────┘  └────────────────┘
//!         │    Transport      │
//! ┌───────▼───────────────────▼────────┐
//! │      HttpTransport (reqwest)       │
//! └────────────────────────────────────┘
//! ```
//!
//! The monitor and the manager share one [`AuthSignal`]: probing only
//! runs while authenticated, and channels are refused (and their
//! reconnects abandoned) without it. [`Uplink`] assembles the whole
//! layer over one transport for the common case.

pub mod auth;
pub mod cache;
pub mod channel;
pub mod config;
pub mod error;
pub mod health;
pub mod session;
pub mod transport;

pub use auth::AuthSignal;
pub use cache::TtlCache;
pub use channel::{ChannelCallbacks, ChannelManager, ChannelState, StreamEvent};
pub use config::{CacheConfig, ChannelConfig, HealthConfig, UplinkConfig};
pub use error::{ChannelError, TransportError};
pub use health::{ConnectionState, HealthMonitor, Subscription};
pub use session::Uplink;
pub use transport::{FrameStream, HttpTransport, HttpTransportBuilder, Transport};
