//! Invariant tracking for scheduler delivery tests.
//!
//! Checks, from what the transport observed:
//! - No message is attempted more than twice
//! - No message is delivered twice
//! - Messages of one channel are delivered in enqueue order
//! - Only enqueued messages are delivered

use std::collections::{HashMap, HashSet};

/// Tracks enqueued messages and transport observations.
#[derive(Debug, Default, Clone)]
pub struct DeliveryInvariants {
    /// Enqueue order per channel label.
    pub enqueued: HashMap<String, Vec<String>>,
    /// Every body enqueued.
    pub known: HashSet<String>,
}

impl DeliveryInvariants {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `body` enqueued on `channel`.
    pub fn record_enqueued(&mut self, channel: &str, body: &str) {
        self.enqueued
            .entry(channel.to_string())
            .or_default()
            .push(body.to_string());
        self.known.insert(body.to_string());
    }

    /// Validate transport observations against what was enqueued.
    pub fn validate(&self, attempts: &[String], delivered: &[String]) {
        let mut attempt_counts: HashMap<&str, usize> = HashMap::new();
        for body in attempts {
            *attempt_counts.entry(body.as_str()).or_default() += 1;
        }
        for (body, count) in &attempt_counts {
            assert!(*count <= 2, "{body} attempted {count} times");
        }

        let mut seen = HashSet::new();
        for body in delivered {
            assert!(self.known.contains(body), "phantom delivery of {body}");
            assert!(seen.insert(body.as_str()), "duplicate delivery of {body}");
        }

        for (channel, order) in &self.enqueued {
            let observed: Vec<&String> = delivered.iter().filter(|b| order.contains(b)).collect();
            let expected: Vec<&String> = order.iter().filter(|b| seen.contains(b.as_str())).collect();
            assert_eq!(observed, expected, "channel {channel} delivered out of order");
        }
    }

    /// Validate that every enqueued message was delivered.
    pub fn validate_complete(&self, delivered: &[String]) {
        let delivered: HashSet<&str> = delivered.iter().map(String::as_str).collect();
        for body in &self.known {
            assert!(delivered.contains(body.as_str()), "{body} never delivered");
        }
    }
}
