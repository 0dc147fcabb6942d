//! Shared authentication signal.
//!
//! The connectivity layer never performs authentication itself; it only
//! consumes the effect ("authenticated or not") as a process-wide boolean.
//! Both the health monitor and the channel manager hold a clone of the
//! same signal so their gating decisions always agree.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheap, cloneable "authenticated or not" flag.
///
/// All clones share the same underlying value.
///
/// # Example
///
/// ```
/// use uplink::AuthSignal;
///
/// let auth = AuthSignal::new();
/// assert!(!auth.is_authenticated());
///
/// auth.set(true);
/// assert!(auth.is_authenticated());
/// ```
#[derive(Debug, Clone, Default)]
pub struct AuthSignal(Arc<AtomicBool>);

impl AuthSignal {
    /// Create a new signal, initially unauthenticated.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the authentication state.
    pub fn set(&self, authenticated: bool) {
        self.0.store(authenticated, Ordering::SeqCst);
    }

    /// Returns whether the process is currently authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
