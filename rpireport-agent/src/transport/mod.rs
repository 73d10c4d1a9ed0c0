//! Broker transport
//!
//! The scheduling core only talks to the broker through [`Transport`]:
//! - `connect` registers the last will and starts the connection
//! - `state` exposes the connection state as a watch channel
//! - `publish` hands a message to the client
//!
//! [`MqttTransport`] is the rumqttc implementation; tests plug in doubles.

pub mod mqtt;

use async_trait::async_trait;
use rumqttc::QoS;
use thiserror::Error;
use tokio::sync::watch;

use crate::topics::OFFLINE;

pub use mqtt::{MqttSettings, MqttTransport, TlsSettings};

/// Connection state, written only by the transport's connection driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Message the broker publishes for us if we vanish without a clean disconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillMessage {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

impl WillMessage {
    /// Retained `offline` marker on the status topic
    pub fn offline(status_topic: &str) -> Self {
        Self {
            topic: status_topic.to_string(),
            payload: OFFLINE.to_string(),
            qos: QoS::AtLeastOnce,
            retain: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport already started")]
    AlreadyStarted,

    #[error("transport not connected yet")]
    NotStarted,

    #[error("cannot read TLS file {path}: {source}")]
    Tls {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Persistent broker connection shared by every publisher
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Registers `will` and initiates the connection.
    ///
    /// Returns once the attempt is under way; the outcome is reported
    /// through [`Transport::state`].
    async fn connect(&self, will: WillMessage) -> Result<(), TransportError>;

    /// Subscribe to connection state changes
    fn state(&self) -> watch::Receiver<ConnectionState>;

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Clean disconnect; the broker does not fire the last will
    async fn disconnect(&self) -> Result<(), TransportError>;
}
