//! Configuration for messenger behavior.

use std::time::Duration;

use peerlink_core::EndpointAddress;

/// How the send loop shares the connection among channels with pending work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fairness {
    /// Drain a channel completely before moving to the next one.
    #[default]
    ChannelDrain,
    /// Send one message per channel, then move to the next one.
    RoundRobin,
}

/// Configuration for a channel scheduler and its channels.
#[derive(Clone, Debug)]
pub struct MessengerConfig {
    /// Maximum number of messages queued per channel
    pub channel_queue_capacity: usize,

    /// How long the background worker waits for new work before exiting
    pub worker_idle_timeout: Duration,

    /// Timeout for a single connection attempt
    pub connect_timeout: Duration,

    /// Delay before re-dialing a connection that was established before
    pub reconnect_delay: Duration,

    /// Scheduling policy among channels
    pub fairness: Fairness,

    /// Identity the remote peer must present, if known in advance.
    ///
    /// When unset, the first identity the transport reports is recorded and
    /// every later connection must match it.
    pub expected_peer: Option<EndpointAddress>,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            channel_queue_capacity: 100,
            worker_idle_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_millis(100),
            fairness: Fairness::ChannelDrain,
            expected_peer: None,
        }
    }
}

impl MessengerConfig {
    /// Create a new configuration with specified parameters.
    pub fn new(
        channel_queue_capacity: usize,
        worker_idle_timeout: Duration,
        connect_timeout: Duration,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            channel_queue_capacity: channel_queue_capacity.max(1),
            worker_idle_timeout,
            connect_timeout,
            reconnect_delay,
            fairness: Fairness::default(),
            expected_peer: None,
        }
    }

    /// Set the per-channel queue capacity (at least one message).
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.channel_queue_capacity = capacity.max(1);
        self
    }

    /// Set the worker idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.worker_idle_timeout = timeout;
        self
    }

    /// Set the connection attempt timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the delay applied before reconnecting.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the scheduling policy among channels.
    pub fn with_fairness(mut self, fairness: Fairness) -> Self {
        self.fairness = fairness;
        self
    }

    /// Require the remote peer to present this identity.
    pub fn with_expected_peer(mut self, peer: EndpointAddress) -> Self {
        self.expected_peer = Some(peer);
        self
    }

    /// Create a configuration for low-latency local networking.
    pub fn local_network() -> Self {
        Self {
            channel_queue_capacity: 50,
            worker_idle_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_millis(500),
            reconnect_delay: Duration::from_millis(10),
            fairness: Fairness::RoundRobin,
            expected_peer: None,
        }
    }

    /// Create a configuration for high-latency WAN networking.
    pub fn wan_network() -> Self {
        Self {
            channel_queue_capacity: 1000,
            worker_idle_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_millis(500),
            fairness: Fairness::ChannelDrain,
            expected_peer: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_never_zero() {
        assert_eq!(
            MessengerConfig::default()
                .with_queue_capacity(0)
                .channel_queue_capacity,
            1
        );
        let config = MessengerConfig::new(0, Duration::ZERO, Duration::ZERO, Duration::ZERO);
        assert_eq!(config.channel_queue_capacity, 1);
    }

    #[test]
    fn test_presets() {
        let local = MessengerConfig::local_network();
        let wan = MessengerConfig::wan_network();
        assert!(local.connect_timeout < wan.connect_timeout);
        assert_eq!(local.fairness, Fairness::RoundRobin);
        assert!(wan.expected_peer.is_none());
    }
}
