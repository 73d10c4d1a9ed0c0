/*!
Mock transport for running the agent without a broker

Records every publish with a sequence number and the (virtual) instant it
reached the transport, the registered last will, and connect/disconnect
calls. The connect outcome is scriptable.
*/

use anyhow::Result;
use async_trait::async_trait;
use rpireport_agent::transport::{ConnectionState, Transport, TransportError, WillMessage};
use rumqttc::QoS;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub seq: u64,
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    pub at: Instant,
}

impl MockMessage {
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or("")
    }

    pub fn json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// What the mock broker answers to `connect`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Accept,
    Refuse(String),
    /// Never answers; the state stays `Connecting`
    Hang,
}

struct Inner {
    messages: Mutex<Vec<MockMessage>>,
    will: Mutex<Option<WillMessage>>,
    outcome: Mutex<ConnectOutcome>,
    state: watch::Sender<ConnectionState>,
    seq: AtomicU64,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

/// Transport double; clones share the same recording
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_outcome(ConnectOutcome::Accept)
    }

    pub fn with_outcome(outcome: ConnectOutcome) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                messages: Mutex::new(Vec::new()),
                will: Mutex::new(None),
                outcome: Mutex::new(outcome),
                state,
                seq: AtomicU64::new(0),
                connect_calls: AtomicUsize::new(0),
                disconnect_calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn set_outcome(&self, outcome: ConnectOutcome) {
        *self.inner.outcome.lock().unwrap() = outcome;
    }

    /// Simulates losing the broker after connecting
    pub fn drop_connection(&self) {
        log::info!("[MOCK] Connection dropped");
        self.inner.state.send_replace(ConnectionState::Disconnected);
    }

    pub fn restore_connection(&self) {
        log::info!("[MOCK] Connection restored");
        self.inner.state.send_replace(ConnectionState::Connected);
    }

    /// Simulates the broker refusing a reconnect after startup
    pub fn refuse_reconnect(&self, reason: &str) {
        log::info!("[MOCK] Reconnect refused: {}", reason);
        self.inner
            .state
            .send_replace(ConnectionState::Failed(reason.to_string()));
    }

    pub fn current_state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    /// Every publish in the order it reached the transport
    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.inner.messages.lock().unwrap().clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.inner
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parse the last message of a topic as JSON
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        match self.find_messages_by_topic(topic).last() {
            Some(last_msg) => Ok(Some(serde_json::from_slice(&last_msg.payload)?)),
            None => Ok(None),
        }
    }

    pub fn will(&self) -> Option<WillMessage> {
        self.inner.will.lock().unwrap().clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.inner.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Forget recorded messages, keep the connection state
    pub fn clear(&self) {
        self.inner.messages.lock().unwrap().clear();
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, will: WillMessage) -> Result<(), TransportError> {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);
        *self.inner.will.lock().unwrap() = Some(will);
        self.inner.state.send_replace(ConnectionState::Connecting);

        let outcome = self.inner.outcome.lock().unwrap().clone();
        match outcome {
            ConnectOutcome::Accept => {
                self.inner.state.send_replace(ConnectionState::Connected);
            }
            ConnectOutcome::Refuse(reason) => {
                self.inner.state.send_replace(ConnectionState::Failed(reason));
            }
            ConnectOutcome::Hang => {}
        }
        Ok(())
    }

    fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        if !self.current_state().is_connected() {
            return Err(TransportError::NotStarted);
        }

        let message = MockMessage {
            seq: self.inner.seq.fetch_add(1, Ordering::SeqCst),
            topic: topic.to_string(),
            payload,
            qos,
            retain,
            at: Instant::now(),
        };
        log::info!(
            "[MOCK] #{} published to {}: {} bytes",
            message.seq,
            message.topic,
            message.payload.len()
        );
        self.inner.messages.lock().unwrap().push(message);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.inner.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.state.send_replace(ConnectionState::Disconnected);
        Ok(())
    }
}
