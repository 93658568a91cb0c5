//! Configuration for the sync outbox.

use std::time::Duration;

/// Configuration for the outbox and its auto-sync driver.
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Deadline handed to every remote send.
    pub send_timeout: Duration,
    /// Maximum entries sent per drain. `None` drains everything queued.
    pub max_items_per_drain: Option<usize>,
    /// Interval for periodic drains by the auto-sync driver.
    pub sync_interval: Option<Duration>,
    /// Poll interval while waiting for an in-flight drain to finish.
    pub drain_poll_interval: Duration,
    /// Whether the outbox starts online.
    pub start_online: bool,
}

impl OutboxConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self {
            send_timeout: Duration::from_secs(30),
            max_items_per_drain: None,
            sync_interval: None,
            drain_poll_interval: Duration::from_millis(25),
            start_online: true,
        }
    }

    /// Sets the send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Caps the entries sent per drain.
    pub fn with_max_items_per_drain(mut self, max: usize) -> Self {
        self.max_items_per_drain = Some(max.max(1));
        self
    }

    /// Sets the periodic drain interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Sets whether the outbox starts online.
    pub fn with_start_online(mut self, online: bool) -> Self {
        self.start_online = online;
        self
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = OutboxConfig::new()
            .with_send_timeout(Duration::from_secs(5))
            .with_max_items_per_drain(0)
            .with_sync_interval(Duration::from_secs(60))
            .with_start_online(false);

        assert_eq!(config.send_timeout, Duration::from_secs(5));
        assert_eq!(config.max_items_per_drain, Some(1));
        assert_eq!(config.sync_interval, Some(Duration::from_secs(60)));
        assert!(!config.start_online);
    }

    #[test]
    fn config_defaults() {
        let config = OutboxConfig::default();
        assert_eq!(config.send_timeout, Duration::from_secs(30));
        assert!(config.max_items_per_drain.is_none());
        assert!(config.start_online);
    }
}
