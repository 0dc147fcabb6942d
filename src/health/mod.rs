//! Backend health monitoring.
//!
//! One `HealthMonitor` per process maintains the authoritative answer to
//! "can we talk to the backend right now", shared by every consumer, with
//! minimal probe traffic. Consumers observe read-only `ConnectionState`
//! snapshots through subscriptions and route their own calls through
//! `gated_request` instead of re-implementing retry or staleness logic.

mod monitor;
mod state;

pub use monitor::{HealthMonitor, Subscription};
pub use state::ConnectionState;
