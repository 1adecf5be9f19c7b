//! Session configuration.

use std::time::Duration;

/// Default scan window used by the demos and `BleCentral::scan`.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(3);

/// When a session is reported as connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReadinessPolicy {
    /// Report ready as soon as the notify request for TX has been issued,
    /// without waiting for the stack to acknowledge it.
    #[default]
    Optimistic,
    /// Report ready only after the stack confirms notifications are on.
    AwaitNotifyAck,
}

/// Tunables for a [`Session`](crate::session::Session).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// How long a scan runs before it is stopped automatically.
    pub scan_timeout: Duration,
    /// Readiness gating.
    pub readiness: ReadinessPolicy,
    /// Warn when the link drops unexpectedly. Disconnections always reach
    /// the session.
    pub notify_on_disconnection: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            readiness: ReadinessPolicy::default(),
            notify_on_disconnection: true,
        }
    }
}

impl SessionConfig {
    /// Set the scan window.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the readiness policy.
    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    /// Set whether unexpected disconnection is reported.
    pub fn with_notify_on_disconnection(mut self, notify: bool) -> Self {
        self.notify_on_disconnection = notify;
        self
    }
}
