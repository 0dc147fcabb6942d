//! The process-wide health monitor.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use super::state::ConnectionState;
use crate::auth::AuthSignal;
use crate::config::HealthConfig;
use crate::transport::Transport;

type Listener = Arc<dyn Fn(&ConnectionState) + Send + Sync>;

/// Process-wide backend-health monitor.
///
/// Owns the single authoritative `ConnectionState`, probes the backend's
/// liveness endpoint on a shared timer, and gates outbound requests on
/// the current reachability. Cloning is cheap; all clones share state.
///
/// Monitoring only runs while the authentication signal is true: probing
/// starts when authentication is gained (provided someone holds periodic
/// interest) and is torn down, with the state reset to a neutral
/// suspended snapshot, when it is lost.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use uplink::{AuthSignal, HealthConfig, HealthMonitor, HttpTransport};
///
/// # tokio_test::block_on(async {
/// let transport = Arc::new(HttpTransport::builder().build().unwrap());
/// let auth = AuthSignal::new();
/// let monitor = HealthMonitor::new(transport, auth.clone(), HealthConfig::default());
///
/// let _sub = monitor.subscribe(|state| {
///     println!("connected: {}", state.connected);
/// });
///
/// monitor.start_periodic_check();
/// monitor.set_authenticated(true);
/// # });
/// ```
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    transport: Arc<dyn Transport>,
    config: HealthConfig,
    auth: AuthSignal,
    state: Mutex<ConnectionState>,
    /// Single-flight guard for probes, independent of the snapshot's
    /// `probing` flag (which starts true before any probe has run).
    in_flight: AtomicBool,
    subscribers: Mutex<Vec<(u64, Listener)>>,
    next_subscriber: AtomicU64,
    timers: Mutex<TimerState>,
    last_activity: Mutex<tokio::time::Instant>,
    activity_ping: Notify,
}

/// Shared-timer bookkeeping: an explicit interest counter plus the stop
/// handle for the running timer tasks, if any.
struct TimerState {
    interest: usize,
    stop: Option<watch::Sender<bool>>,
}

impl HealthMonitor {
    /// Create a monitor over the given transport.
    ///
    /// The initial state is "unknown, first probe pending"; no timers run
    /// until periodic interest is registered and authentication is true.
    pub fn new(transport: Arc<dyn Transport>, auth: AuthSignal, config: HealthConfig) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                transport,
                config,
                auth,
                state: Mutex::new(ConnectionState::initial()),
                in_flight: AtomicBool::new(false),
                subscribers: Mutex::new(Vec::new()),
                next_subscriber: AtomicU64::new(0),
                timers: Mutex::new(TimerState {
                    interest: 0,
                    stop: None,
                }),
                last_activity: Mutex::new(tokio::time::Instant::now()),
                activity_ping: Notify::new(),
            }),
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().clone()
    }

    /// Perform one liveness probe and replace the shared state.
    ///
    /// Re-entrant calls while a probe is in flight are no-ops, so at most
    /// one probe runs at a time and state writes can never interleave
    /// out of order. Never returns an error: failures are captured into
    /// the state for consumers to act on.
    pub async fn check_health(&self) {
        self.inner.check_health().await;
    }

    /// Register interest in periodic probing.
    ///
    /// A single shared timer serves all interested parties; it starts
    /// when the count goes from zero to one (and authentication holds)
    /// and keeps running until the count returns to zero.
    pub fn start_periodic_check(&self) {
        let mut timers = self.inner.timers.lock();
        timers.interest += 1;
        if timers.interest == 1 && self.inner.auth.is_authenticated() {
            MonitorInner::spawn_timers(&self.inner, &mut timers);
        }
    }

    /// Release one unit of periodic interest; stops the shared timer when
    /// nobody is left.
    pub fn stop_periodic_check(&self) {
        let mut timers = self.inner.timers.lock();
        timers.interest = timers.interest.saturating_sub(1);
        if timers.interest == 0 {
            MonitorInner::halt_timers(&mut timers);
        }
    }

    /// Execute `producer` only if the backend is currently reachable and
    /// no probe is in flight; otherwise resolve immediately with
    /// `fallback`.
    ///
    /// Producer failures are caught and logged, and `fallback` is
    /// returned: callers of this gate never receive an error.
    pub async fn gated_request<T, E, F>(&self, producer: F, fallback: T) -> T
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if !self.inner.auth.is_authenticated() {
            debug!("request gated off: not authenticated");
            return fallback;
        }

        let open = {
            let state = self.inner.state.lock();
            state.connected && !state.probing
        };
        if !open {
            debug!("request gated off: backend unavailable or probe in flight");
            return fallback;
        }

        match producer.await {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "gated request failed; returning fallback");
                fallback
            }
        }
    }

    /// Record a user-interaction event, resetting the rolling idle timer.
    pub fn record_activity(&self) {
        *self.inner.last_activity.lock() = tokio::time::Instant::now();
        self.inner.activity_ping.notify_one();

        let snapshot = {
            let mut state = self.inner.state.lock();
            if state.inactive {
                state.inactive = false;
                Some(state.clone())
            } else {
                None
            }
        };
        if let Some(snapshot) = snapshot {
            self.inner.notify(&snapshot);
        }
    }

    /// Feed the external authentication signal into the monitor.
    ///
    /// Gaining authentication starts monitoring if periodic interest is
    /// held. Losing it stops all timers and resets the state to a neutral
    /// suspended snapshot: not monitoring is not the same as down.
    pub fn set_authenticated(&self, authenticated: bool) {
        let was = self.inner.auth.is_authenticated();
        self.inner.auth.set(authenticated);
        if authenticated == was {
            return;
        }

        if authenticated {
            let mut timers = self.inner.timers.lock();
            if timers.interest > 0 {
                MonitorInner::spawn_timers(&self.inner, &mut timers);
            }
        } else {
            {
                let mut timers = self.inner.timers.lock();
                MonitorInner::halt_timers(&mut timers);
            }
            let snapshot = {
                let mut state = self.inner.state.lock();
                *state = ConnectionState::suspended();
                state.clone()
            };
            info!("authentication lost; health monitoring suspended");
            self.inner.notify(&snapshot);
        }
    }

    /// Register an observer for state changes.
    ///
    /// Observers are invoked synchronously, in registration order, once
    /// per state mutation. Dropping the returned guard unsubscribes.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::new(listener);
        self.inner.subscribers.lock().push((id, listener));
        Subscription {
            monitor: Arc::downgrade(&self.inner),
            id,
        }
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("HealthMonitor")
            .field("state", &*state)
            .finish()
    }
}

impl MonitorInner {
    async fn check_health(&self) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("probe already in flight; skipping");
            return;
        }

        let snapshot = {
            let mut state = self.state.lock();
            state.probing = true;
            state.clone()
        };
        self.notify(&snapshot);

        let result = self.transport.probe(self.config.probe_timeout()).await;

        let snapshot = {
            let mut state = self.state.lock();
            state.probing = false;
            state.last_check = Some(SystemTime::now());
            match result {
                Ok(elapsed) => {
                    state.connected = true;
                    state.response_time = Some(elapsed);
                    state.error = None;
                    state.consecutive_failures = 0;
                }
                Err(err) => {
                    state.connected = false;
                    state.response_time = None;
                    state.error = Some(err.describe());
                    state.consecutive_failures += 1;
                    debug!(
                        failures = state.consecutive_failures,
                        error = %err,
                        "liveness probe failed"
                    );
                }
            }
            state.clone()
        };
        self.in_flight.store(false, Ordering::SeqCst);
        self.notify(&snapshot);
    }

    fn notify(&self, snapshot: &ConnectionState) {
        // Listeners are invoked outside the lock so they may call back
        // into the monitor.
        let listeners: Vec<Listener> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(snapshot);
        }
    }

    /// Spawn the periodic-probe and inactivity tasks. Caller holds the
    /// timer lock; no-op if the tasks are already running.
    fn spawn_timers(inner: &Arc<Self>, timers: &mut TimerState) {
        if timers.stop.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = watch::channel(false);

        let weak = Arc::downgrade(inner);
        let interval = inner.config.probe_interval();
        let mut probe_stop = stop_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.check_health().await;
                    }
                    changed = probe_stop.changed() => {
                        if changed.is_err() || *probe_stop.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        let weak = Arc::downgrade(inner);
        let mut idle_stop = stop_rx;
        tokio::spawn(async move {
            loop {
                let Some(inner) = weak.upgrade() else { break };
                let deadline = *inner.last_activity.lock() + inner.config.inactivity_timeout();
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        let snapshot = {
                            let mut state = inner.state.lock();
                            if state.inactive {
                                None
                            } else {
                                state.inactive = true;
                                Some(state.clone())
                            }
                        };
                        if let Some(snapshot) = snapshot {
                            debug!("user idle past inactivity timeout");
                            inner.notify(&snapshot);
                        }
                        // Re-arm only once activity resumes.
                        tokio::select! {
                            _ = inner.activity_ping.notified() => {}
                            changed = idle_stop.changed() => {
                                if changed.is_err() || *idle_stop.borrow() {
                                    return;
                                }
                            }
                        }
                    }
                    _ = inner.activity_ping.notified() => {}
                    changed = idle_stop.changed() => {
                        if changed.is_err() || *idle_stop.borrow() {
                            return;
                        }
                    }
                }
            }
        });

        timers.stop = Some(stop_tx);
        debug!("health monitoring timers started");
    }

    fn halt_timers(timers: &mut TimerState) {
        if let Some(stop) = timers.stop.take() {
            let _ = stop.send(true);
            debug!("health monitoring timers stopped");
        }
    }
}

/// Guard for a state-change subscription; drop to unsubscribe.
pub struct Subscription {
    monitor: Weak<MonitorInner>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.upgrade() {
            monitor.subscribers.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::error::TransportError;
    use crate::transport::FrameStream;

    /// Transport that replays scripted probe outcomes. An empty script
    /// means every probe succeeds.
    struct MockTransport {
        results: Mutex<VecDeque<Result<Duration, TransportError>>>,
        probe_delay: Duration,
        probes: AtomicU32,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                results: Mutex::new(VecDeque::new()),
                probe_delay: Duration::ZERO,
                probes: AtomicU32::new(0),
            }
        }

        fn with_delay(delay: Duration) -> Self {
            Self {
                probe_delay: delay,
                ..Self::new()
            }
        }

        fn script(self, results: Vec<Result<Duration, TransportError>>) -> Self {
            *self.results.lock() = results.into();
            self
        }

        fn probe_count(&self) -> u32 {
            self.probes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn probe(&self, _timeout: Duration) -> Result<Duration, TransportError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if !self.probe_delay.is_zero() {
                tokio::time::sleep(self.probe_delay).await;
            }
            self.results
                .lock()
                .pop_front()
                .unwrap_or(Ok(Duration::from_millis(12)))
        }

        async fn open_stream(&self, _name: &str) -> Result<FrameStream, TransportError> {
            Err(TransportError::Other("streams not supported".to_string()))
        }
    }

    fn monitor_with(transport: Arc<MockTransport>, config: HealthConfig) -> HealthMonitor {
        let auth = AuthSignal::new();
        auth.set(true);
        HealthMonitor::new(transport, auth, config)
    }

    fn fail(err: TransportError) -> Result<Duration, TransportError> {
        Err(err)
    }

    #[tokio::test]
    async fn successful_probe_updates_state() {
        let transport = Arc::new(MockTransport::new());
        let monitor = monitor_with(transport, HealthConfig::default());

        monitor.check_health().await;

        let state = monitor.state();
        assert!(state.connected);
        assert!(!state.probing);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.response_time, Some(Duration::from_millis(12)));
        assert!(state.error.is_none());
        assert!(state.last_check.is_some());
    }

    #[tokio::test]
    async fn consecutive_failures_increment_and_reset() {
        let transport = Arc::new(MockTransport::new().script(vec![
            fail(TransportError::Unreachable("refused".to_string())),
            fail(TransportError::Unreachable("refused".to_string())),
            Ok(Duration::from_millis(5)),
        ]));
        let monitor = monitor_with(transport, HealthConfig::default());

        monitor.check_health().await;
        assert_eq!(monitor.state().consecutive_failures, 1);
        assert!(!monitor.state().connected);

        monitor.check_health().await;
        assert_eq!(monitor.state().consecutive_failures, 2);

        monitor.check_health().await;
        assert_eq!(monitor.state().consecutive_failures, 0);
        assert!(monitor.state().connected);
    }

    #[tokio::test]
    async fn timeout_produces_expected_error_string() {
        let transport = Arc::new(
            MockTransport::new().script(vec![fail(TransportError::Timeout(
                Duration::from_millis(5000),
            ))]),
        );
        let monitor = monitor_with(transport, HealthConfig::default());

        monitor.check_health().await;

        let state = monitor.state();
        assert!(!state.connected);
        assert_eq!(state.error.as_deref(), Some("Timeout of connection (5s)"));
        assert_eq!(state.consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn probes_are_single_flight() {
        let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(50)));
        let monitor = monitor_with(transport.clone(), HealthConfig::default());

        let first = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.check_health().await })
        };
        // Let the first probe reach its in-flight sleep.
        tokio::time::sleep(Duration::from_millis(1)).await;

        // Re-entrant call is a no-op.
        monitor.check_health().await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        first.await.unwrap();

        assert_eq!(transport.probe_count(), 1);
        assert!(monitor.state().connected);
    }

    #[tokio::test]
    async fn gate_passes_producer_result_when_connected() {
        let transport = Arc::new(MockTransport::new());
        let monitor = monitor_with(transport, HealthConfig::default());
        monitor.check_health().await;

        let value = monitor
            .gated_request(async { Ok::<_, TransportError>(42) }, 0)
            .await;
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn gate_returns_fallback_before_first_probe() {
        let transport = Arc::new(MockTransport::new());
        let monitor = monitor_with(transport, HealthConfig::default());

        // Initial state: unknown, first probe pending. Gate stays closed.
        let value = monitor
            .gated_request(async { Ok::<_, TransportError>(42) }, -1)
            .await;
        assert_eq!(value, -1);
    }

    #[tokio::test]
    async fn gate_returns_fallback_when_disconnected() {
        let transport = Arc::new(
            MockTransport::new().script(vec![fail(TransportError::Unreachable(
                "refused".to_string(),
            ))]),
        );
        let monitor = monitor_with(transport, HealthConfig::default());
        monitor.check_health().await;

        let value = monitor
            .gated_request(async { Ok::<_, TransportError>(42) }, 7)
            .await;
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn gate_swallows_producer_errors() {
        let transport = Arc::new(MockTransport::new());
        let monitor = monitor_with(transport, HealthConfig::default());
        monitor.check_health().await;

        let value = monitor
            .gated_request(
                async { Err::<i32, _>(TransportError::Other("boom".to_string())) },
                99,
            )
            .await;
        assert_eq!(value, 99);
    }

    #[tokio::test]
    async fn gate_returns_fallback_when_unauthenticated() {
        let transport = Arc::new(MockTransport::new());
        let auth = AuthSignal::new();
        let monitor = HealthMonitor::new(transport, auth, HealthConfig::default());

        let value = monitor
            .gated_request(async { Ok::<_, TransportError>(1) }, 0)
            .await;
        assert_eq!(value, 0);
    }

    #[tokio::test]
    async fn subscribers_see_mutations_in_order() {
        let transport = Arc::new(MockTransport::new());
        let monitor = monitor_with(transport, HealthConfig::default());

        let seen: Arc<Mutex<Vec<ConnectionState>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = monitor.subscribe(move |state| sink.lock().push(state.clone()));

        monitor.check_health().await;

        let seen = seen.lock();
        // One notification when the probe starts, one when it completes.
        assert_eq!(seen.len(), 2);
        assert!(seen[0].probing);
        assert!(!seen[1].probing);
        assert!(seen[1].connected);
    }

    #[tokio::test]
    async fn listeners_fire_in_registration_order() {
        let transport = Arc::new(MockTransport::new());
        let monitor = monitor_with(transport, HealthConfig::default());

        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let first = log.clone();
        let _a = monitor.subscribe(move |_| first.lock().push("first"));
        let second = log.clone();
        let _b = monitor.subscribe(move |_| second.lock().push("second"));
        let third = log.clone();
        let _c = monitor.subscribe(move |_| third.lock().push("third"));

        monitor.check_health().await;

        // Two mutations (probe start, probe completion), each fanned out
        // in registration order.
        assert_eq!(
            log.lock().as_slice(),
            ["first", "second", "third", "first", "second", "third"]
        );
    }

    #[tokio::test]
    async fn dropped_subscription_stops_callbacks() {
        let transport = Arc::new(MockTransport::new());
        let monitor = monitor_with(transport, HealthConfig::default());

        let seen: Arc<Mutex<Vec<ConnectionState>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = monitor.subscribe(move |state| sink.lock().push(state.clone()));

        monitor.check_health().await;
        assert_eq!(seen.lock().len(), 2);

        drop(sub);
        monitor.check_health().await;
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_checks_run_on_the_shared_timer() {
        let transport = Arc::new(MockTransport::new());
        let monitor = monitor_with(transport.clone(), HealthConfig::default());

        monitor.start_periodic_check();
        // First tick is immediate, then every 5 s.
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(transport.probe_count() >= 3);

        monitor.stop_periodic_check();
        let settled = transport.probe_count();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.probe_count(), settled);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_is_reference_counted_by_interest() {
        let transport = Arc::new(MockTransport::new());
        let monitor = monitor_with(transport.clone(), HealthConfig::default());

        monitor.start_periodic_check();
        monitor.start_periodic_check();
        tokio::time::sleep(Duration::from_secs(6)).await;
        let after_two = transport.probe_count();
        assert!(after_two >= 2);

        // One consumer leaves; the other keeps the timer alive.
        monitor.stop_periodic_check();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(transport.probe_count() > after_two);

        // Last consumer leaves; the timer stops.
        monitor.stop_periodic_check();
        let settled = transport.probe_count();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.probe_count(), settled);
    }

    #[tokio::test(start_paused = true)]
    async fn monitoring_waits_for_authentication() {
        let transport = Arc::new(MockTransport::new());
        let auth = AuthSignal::new();
        let monitor = HealthMonitor::new(transport.clone(), auth, HealthConfig::default());

        monitor.start_periodic_check();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(transport.probe_count(), 0);

        monitor.set_authenticated(true);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(transport.probe_count() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn losing_authentication_suspends_and_resets() {
        let transport = Arc::new(MockTransport::new().script(vec![
            fail(TransportError::Unreachable("refused".to_string())),
            fail(TransportError::Unreachable("refused".to_string())),
        ]));
        let monitor = monitor_with(transport.clone(), HealthConfig::default());

        monitor.check_health().await;
        monitor.check_health().await;
        assert_eq!(monitor.state().consecutive_failures, 2);

        monitor.start_periodic_check();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let before = transport.probe_count();

        monitor.set_authenticated(false);

        let state = monitor.state();
        assert!(state.connected, "suspended state must not read as down");
        assert!(!state.probing);
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.error.is_none());

        // Polling has stopped.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.probe_count(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_flags_inactivity_and_activity_clears_it() {
        let transport = Arc::new(MockTransport::new());
        let config = HealthConfig {
            // Keep the probe timer quiet for the duration of the test.
            probe_interval_ms: 1_000_000,
            ..HealthConfig::default()
        };
        let monitor = monitor_with(transport, config);
        monitor.start_periodic_check();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(monitor.state().inactive);

        monitor.record_activity();
        assert!(!monitor.state().inactive);

        // The idle timer re-arms after activity.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(monitor.state().inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_preserves_inactive_flag() {
        let transport = Arc::new(MockTransport::new().script(vec![
            Ok(Duration::from_millis(5)),
            fail(TransportError::Unreachable("refused".to_string())),
        ]));
        let config = HealthConfig {
            probe_interval_ms: 1_000_000,
            ..HealthConfig::default()
        };
        let monitor = monitor_with(transport, config);
        monitor.start_periodic_check();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(monitor.state().inactive);

        monitor.check_health().await;
        let state = monitor.state();
        assert!(!state.connected);
        assert!(state.inactive, "failure must not clear the idle flag");
    }
}
