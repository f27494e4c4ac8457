//! Counters collected by a channel scheduler.

/// Snapshot of a scheduler's activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerMetrics {
    /// Total number of connection attempts made
    pub connection_attempts: u64,

    /// Total number of successful connections established
    pub connections_established: u64,

    /// Total number of connection failures, identity mismatches included
    pub connection_failures: u64,

    /// Connections rejected because the peer identity did not match
    pub identity_mismatches: u64,

    /// Messages accepted into a channel queue
    pub messages_queued: u64,

    /// Messages refused at enqueue time
    pub messages_rejected: u64,

    /// Messages handed to the transport successfully
    pub messages_sent: u64,

    /// Messages kept for a second attempt after a failed send
    pub messages_retried: u64,

    /// Messages dropped after their second failed send
    pub messages_bounced: u64,

    /// Messages failed because the connection failed or was shut down
    pub messages_failed: u64,

    /// Number of times the background worker was started
    pub worker_spawns: u64,

    /// Messages currently queued across all channels
    pub current_queue_size: usize,
}

impl SchedulerMetrics {
    /// Create an empty metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection attempt.
    pub fn record_connection_attempt(&mut self) {
        self.connection_attempts += 1;
    }

    /// Record a successful connection.
    pub fn record_connection_success(&mut self) {
        self.connections_established += 1;
    }

    /// Record a failed connection attempt.
    pub fn record_connection_failure(&mut self) {
        self.connection_failures += 1;
    }

    /// Record a connection dropped for presenting the wrong identity.
    pub fn record_identity_mismatch(&mut self) {
        self.identity_mismatches += 1;
        self.connection_failures += 1;
    }

    /// Record a message accepted into a queue.
    pub fn record_message_queued(&mut self) {
        self.messages_queued += 1;
        self.current_queue_size += 1;
    }

    /// Record a message refused at enqueue time.
    pub fn record_message_rejected(&mut self) {
        self.messages_rejected += 1;
    }

    /// Record a message sent.
    pub fn record_message_sent(&mut self) {
        self.messages_sent += 1;
        self.record_message_dequeued();
    }

    /// Record a failed send that will be retried once.
    pub fn record_message_retried(&mut self) {
        self.messages_retried += 1;
    }

    /// Record a message dropped after its second failed send.
    pub fn record_message_bounced(&mut self) {
        self.messages_bounced += 1;
        self.record_message_dequeued();
    }

    /// Record a message failed by a connection failure.
    pub fn record_message_failed(&mut self) {
        self.messages_failed += 1;
        self.record_message_dequeued();
    }

    /// Record a worker start.
    pub fn record_worker_spawn(&mut self) {
        self.worker_spawns += 1;
    }

    fn record_message_dequeued(&mut self) {
        self.current_queue_size = self.current_queue_size.saturating_sub(1);
    }

    /// Fraction of connection attempts that succeeded, as a percentage.
    pub fn connection_success_rate(&self) -> f64 {
        if self.connection_attempts == 0 {
            100.0
        } else {
            (self.connections_established as f64 / self.connection_attempts as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_size_tracks_outcomes() {
        let mut m = SchedulerMetrics::new();
        m.record_message_queued();
        m.record_message_queued();
        m.record_message_queued();
        m.record_message_sent();
        m.record_message_bounced();
        assert_eq!(m.current_queue_size, 1);
        m.record_message_failed();
        m.record_message_failed();
        assert_eq!(m.current_queue_size, 0);
    }

    #[test]
    fn test_connection_success_rate() {
        let mut m = SchedulerMetrics::new();
        assert_eq!(m.connection_success_rate(), 100.0);
        m.record_connection_attempt();
        m.record_connection_attempt();
        m.record_connection_success();
        m.record_identity_mismatch();
        assert_eq!(m.connection_success_rate(), 50.0);
        assert_eq!(m.connection_failures, 1);
    }
}
