//! Assembled connectivity layer.
//!
//! `Uplink` wires the health monitor and channel manager to one
//! transport and one authentication signal, so the embedding
//! application has a single object to construct, log in, log out, and
//! tear down. Feature code talks to the parts directly (`monitor()`,
//! `channels()`) and brings its own `TtlCache` instances per data
//! category.

use std::sync::Arc;

use tracing::info;

use crate::auth::AuthSignal;
use crate::channel::ChannelManager;
use crate::config::UplinkConfig;
use crate::error::TransportError;
use crate::health::HealthMonitor;
use crate::transport::{HttpTransport, Transport};

/// The connectivity layer as one unit.
///
/// # Example
///
/// ```no_run
/// use uplink::{ChannelCallbacks, Uplink, UplinkConfig};
///
/// # tokio_test::block_on(async {
/// let config = UplinkConfig {
///     endpoint: "http://localhost:8080".to_string(),
///     ..UplinkConfig::default()
/// };
/// let uplink = Uplink::new(config).unwrap();
///
/// uplink.monitor().start_periodic_check();
/// uplink.set_authenticated(true);
///
/// uplink
///     .channels()
///     .start_stream("analyses", ChannelCallbacks::new(|event| {
///         println!("got {}", event.event_type);
///     }));
///
/// // On logout: channels close, probing stops, state resets.
/// uplink.set_authenticated(false);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct Uplink {
    auth: AuthSignal,
    monitor: HealthMonitor,
    channels: ChannelManager,
}

impl Uplink {
    /// Build over the production HTTP transport.
    pub fn new(config: UplinkConfig) -> Result<Self, TransportError> {
        let transport = Arc::new(
            HttpTransport::builder()
                .endpoint(config.endpoint.clone())
                .build()?,
        );
        Ok(Self::with_transport(transport, config))
    }

    /// Build over a caller-supplied transport.
    pub fn with_transport(transport: Arc<dyn Transport>, config: UplinkConfig) -> Self {
        let auth = AuthSignal::new();
        let monitor = HealthMonitor::new(transport.clone(), auth.clone(), config.health);
        let channels = ChannelManager::new(transport, auth.clone(), config.channel);
        Self {
            auth,
            monitor,
            channels,
        }
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.channels
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    /// Feed the external authentication signal into the whole layer.
    ///
    /// Losing authentication closes every channel, stops periodic
    /// probing, and resets the connection state to its neutral
    /// suspended snapshot.
    pub fn set_authenticated(&self, authenticated: bool) {
        if authenticated {
            self.monitor.set_authenticated(true);
        } else {
            self.channels.close_all_streams();
            self.monitor.set_authenticated(false);
        }
    }

    /// Deterministic teardown for process exit. Idempotent.
    pub fn shutdown(&self) {
        info!("connectivity layer shutting down");
        self.channels.close_all_streams();
        self.monitor.set_authenticated(false);
    }
}
