//! Per-process relay settings shared by every connection.

use std::time::Duration;

use framerelay_protocol::constants::{
    CAPABILITY_NOT_SET, DEFAULT_SNAPSHOT_PERIOD_SEC, STATUS_PERIOD, WS_MAX_MESSAGE_SIZE,
};

/// Default bound of the outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

/// Default time cleanup gives the sender to flush queued envelopes.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Relay configuration snapshot.
///
/// Captured once at startup and cloned into each connection; nothing in
/// here is re-read from the environment while a session runs.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Snapshot period used when `start` omits one or sends a non-positive value.
    pub default_snapshot_period_sec: u32,
    /// Cadence of periodic status envelopes.
    pub status_period: Duration,
    /// Reported as `gpu_visible` in every status report.
    pub capability: String,
    /// Outbound queue bound before droppable envelopes are evicted.
    pub outbound_capacity: usize,
    pub drain_timeout: Duration,
    pub max_message_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            default_snapshot_period_sec: DEFAULT_SNAPSHOT_PERIOD_SEC,
            status_period: STATUS_PERIOD,
            capability: CAPABILITY_NOT_SET.into(),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            max_message_size: WS_MAX_MESSAGE_SIZE,
        }
    }
}

impl RelayConfig {
    /// Returns the default snapshot period, never below one second.
    pub fn default_snapshot_period(&self) -> u32 {
        self.default_snapshot_period_sec.max(1)
    }

    /// Resolves the snapshot period requested by a `start` message.
    ///
    /// Absent or non-positive requests fall back to the default.
    pub fn resolve_snapshot_period(&self, requested: Option<i64>) -> u32 {
        match requested {
            Some(v) if v > 0 => u32::try_from(v).unwrap_or(u32::MAX),
            Some(v) => {
                tracing::warn!(
                    requested = v,
                    "non-positive snapshot period, using default"
                );
                self.default_snapshot_period()
            }
            None => self.default_snapshot_period(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.default_snapshot_period_sec, 3);
        assert_eq!(config.status_period, Duration::from_secs(1));
        assert_eq!(config.capability, "(not set)");
        assert_eq!(config.outbound_capacity, 1024);
    }

    #[test]
    fn resolve_requested_period() {
        let config = RelayConfig::default();
        assert_eq!(config.resolve_snapshot_period(Some(5)), 5);
        assert_eq!(config.resolve_snapshot_period(None), 3);
        assert_eq!(config.resolve_snapshot_period(Some(0)), 3);
        assert_eq!(config.resolve_snapshot_period(Some(-4)), 3);
        assert_eq!(config.resolve_snapshot_period(Some(i64::MAX)), u32::MAX);
    }

    #[test]
    fn zero_default_is_clamped() {
        let config = RelayConfig {
            default_snapshot_period_sec: 0,
            ..Default::default()
        };
        assert_eq!(config.resolve_snapshot_period(None), 1);
    }
}
