//! Shared utilities for scheduler integration tests.
//!
//! Provides a scripted transport binding, scheduler construction helpers
//! and delivery invariant tracking.

#![allow(dead_code)]

pub mod invariants;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use peerlink_messenger::{
    ChannelScheduler, EndpointAddress, Message, MessageTarget, MessengerConfig, TransportBinding,
    TransportError, TransportResult,
};
use tokio::sync::{Semaphore, watch};

/// Upper bound for any wait in tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Initialize tracing for a test, ignoring repeated initialization.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Address every test scheduler dials.
pub fn destination() -> EndpointAddress {
    EndpointAddress::new("tcp", "10.0.0.2:9701")
}

/// Configuration with short timers suitable for tests.
pub fn fast_config() -> MessengerConfig {
    MessengerConfig::default()
        .with_idle_timeout(Duration::from_millis(200))
        .with_connect_timeout(Duration::from_secs(2))
        .with_reconnect_delay(Duration::ZERO)
}

/// Create a scheduler over `transport`.
pub fn scheduler(transport: &Arc<ScriptedTransport>, config: MessengerConfig) -> ChannelScheduler {
    ChannelScheduler::new(destination(), Arc::clone(transport) as Arc<dyn TransportBinding>, config)
        .expect("scheduler inside runtime")
}

/// A message delivered to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    /// Message body as UTF-8.
    pub body: String,
    /// Target the scheduler asked for.
    pub target: MessageTarget,
}

#[derive(Default)]
struct Script {
    gate_connects: bool,
    gate_sends: bool,
    connect_results: VecDeque<TransportResult<()>>,
    identity: Option<EndpointAddress>,
    identities: VecDeque<Option<EndpointAddress>>,
    fail_next_sends: usize,
    fail_every: Option<usize>,
    failing_bodies: Vec<String>,
    connected: bool,
    connect_attempts: usize,
    send_attempts: usize,
    attempts: Vec<String>,
    delivered: Vec<Delivered>,
    closes: usize,
}

/// Transport binding driven by a script instead of a network.
///
/// Connects succeed and sends are delivered unless told otherwise. Gated
/// operations block until released or until the connection is closed.
pub struct ScriptedTransport {
    script: Mutex<Script>,
    connect_gate: Semaphore,
    send_gate: Semaphore,
    closes: watch::Sender<u64>,
}

impl ScriptedTransport {
    /// Create a transport with an empty script.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Script::default()),
            connect_gate: Semaphore::new(0),
            send_gate: Semaphore::new(0),
            closes: watch::channel(0).0,
        })
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().expect("script lock")
    }

    /// Block connects until [`release_connects`](Self::release_connects).
    pub fn hold_connects(&self) {
        self.script().gate_connects = true;
    }

    /// Let `n` held connects through.
    pub fn release_connects(&self, n: usize) {
        self.connect_gate.add_permits(n);
    }

    /// Block sends until [`release_sends`](Self::release_sends).
    pub fn hold_sends(&self) {
        self.script().gate_sends = true;
    }

    /// Let `n` held sends through.
    pub fn release_sends(&self, n: usize) {
        self.send_gate.add_permits(n);
    }

    /// Queue the outcome of the next connects. Unscripted connects succeed.
    pub fn script_connects(&self, results: impl IntoIterator<Item = TransportResult<()>>) {
        self.script().connect_results.extend(results);
    }

    /// Queue the identity reported after each successful connect.
    pub fn script_identities(&self, identities: impl IntoIterator<Item = Option<EndpointAddress>>) {
        self.script().identities.extend(identities);
    }

    /// Fail the next `n` send attempts.
    pub fn fail_next_sends(&self, n: usize) {
        self.script().fail_next_sends = n;
    }

    /// Fail every `n`-th send attempt.
    pub fn fail_every(&self, n: usize) {
        self.script().fail_every = Some(n.max(1));
    }

    /// Fail every attempt to send a message with this body.
    pub fn fail_body(&self, body: &str) {
        self.script().failing_bodies.push(body.to_string());
    }

    /// Bodies of every send attempt, in order.
    pub fn attempts(&self) -> Vec<String> {
        self.script().attempts.clone()
    }

    /// Messages delivered, in order.
    pub fn delivered(&self) -> Vec<Delivered> {
        self.script().delivered.clone()
    }

    /// Bodies of messages delivered, in order.
    pub fn delivered_bodies(&self) -> Vec<String> {
        self.script().delivered.iter().map(|d| d.body.clone()).collect()
    }

    /// Number of connect calls.
    pub fn connect_attempts(&self) -> usize {
        self.script().connect_attempts
    }

    /// Number of `close_connection` calls.
    pub fn closes(&self) -> usize {
        self.script().closes
    }

    /// Wait until at least `n` send attempts were made.
    pub async fn wait_for_attempts(&self, n: usize) {
        tokio::time::timeout(WAIT, async {
            while self.script().attempts.len() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("send attempts in time");
    }

    /// Wait until at least `n` connects were started.
    pub async fn wait_for_connects(&self, n: usize) {
        tokio::time::timeout(WAIT, async {
            while self.script().connect_attempts < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("connect attempts in time");
    }

    /// Wait until the connection was closed at least once.
    pub async fn wait_for_close(&self) {
        tokio::time::timeout(WAIT, async {
            while self.script().closes == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("connection closed in time");
    }

    async fn pass(&self, gate: &Semaphore) -> TransportResult<()> {
        let mut closes = self.closes.subscribe();
        tokio::select! {
            permit = gate.acquire() => {
                permit.map_err(|_| TransportError::Closed)?.forget();
                Ok(())
            }
            _ = closes.changed() => Err(TransportError::Closed),
        }
    }
}

#[async_trait]
impl TransportBinding for ScriptedTransport {
    async fn connect(&self) -> TransportResult<()> {
        let gated = {
            let mut script = self.script();
            script.connect_attempts += 1;
            script.gate_connects
        };
        if gated {
            self.pass(&self.connect_gate).await?;
        }

        let mut script = self.script();
        let result = script.connect_results.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            script.connected = true;
            if let Some(identity) = script.identities.pop_front() {
                script.identity = identity;
            }
        }
        result
    }

    async fn send_one(&self, message: &Message, target: &MessageTarget) -> TransportResult<()> {
        let body = String::from_utf8_lossy(message.body()).into_owned();
        let gated = {
            let mut script = self.script();
            script.attempts.push(body.clone());
            script.gate_sends
        };
        if gated {
            self.pass(&self.send_gate).await?;
        }

        let mut script = self.script();
        script.send_attempts += 1;
        if !script.connected {
            return Err(TransportError::Closed);
        }
        if script.fail_next_sends > 0 {
            script.fail_next_sends -= 1;
            return Err(TransportError::SendFailed("scripted failure".into()));
        }
        if let Some(every) = script.fail_every {
            if script.send_attempts % every == 0 {
                return Err(TransportError::SendFailed("periodic failure".into()));
            }
        }
        if script.failing_bodies.contains(&body) {
            return Err(TransportError::SendFailed(format!("{body} is rejected")));
        }

        script.delivered.push(Delivered {
            body,
            target: target.clone(),
        });
        Ok(())
    }

    fn close_connection(&self) {
        let mut script = self.script();
        script.connected = false;
        script.closes += 1;
        self.closes.send_modify(|n| *n += 1);
    }

    fn logical_peer(&self) -> Option<EndpointAddress> {
        self.script().identity.clone()
    }
}
