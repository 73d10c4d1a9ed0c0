//! Publisher: serialization plus hand-off to the transport
//!
//! `publish*` awaits the hand-off, `dispatch*` runs it on a detached task so
//! a slow network write never holds up a scheduler. Detached publishes are
//! best-effort: nothing waits for them at shutdown.

use rumqttc::QoS;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::transport::{ConnectionState, Transport, TransportError};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish to {topic} refused, broker connection is {state:?}")]
    NotConnected { topic: String, state: ConnectionState },

    #[error("failed to serialize payload for {topic}: {source}")]
    Serialize {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn Transport>,
    refused: Arc<AtomicU64>,
}

impl Publisher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            refused: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), PublishError> {
        let state = self.transport.state().borrow().clone();
        if !state.is_connected() {
            self.refused.fetch_add(1, Ordering::Relaxed);
            warn!("Publish to {} refused, connection state {:?}", topic, state);
            return Err(PublishError::NotConnected {
                topic: topic.to_string(),
                state,
            });
        }

        let payload = payload.into();
        let size = payload.len();
        self.transport.publish(topic, payload, qos, retain).await?;
        debug!("Published {} bytes to {} (retain={})", size, topic, retain);
        Ok(())
    }

    pub async fn publish_json<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        value: &T,
        qos: QoS,
        retain: bool,
    ) -> Result<(), PublishError> {
        let payload = to_json(topic, value)?;
        self.publish(topic, payload, qos, retain).await
    }

    /// Fire-and-forget publish
    pub fn dispatch(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        qos: QoS,
        retain: bool,
    ) -> JoinHandle<()> {
        let publisher = self.clone();
        let topic = topic.into();
        let payload = payload.into();

        tokio::spawn(async move {
            if let Err(e) = publisher.publish(&topic, payload, qos, retain).await {
                warn!("Detached publish to {} failed: {}", topic, e);
            }
        })
    }

    /// Serializes now, publishes on a detached task
    pub fn dispatch_json<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        value: &T,
        qos: QoS,
        retain: bool,
    ) -> Result<JoinHandle<()>, PublishError> {
        let payload = to_json(topic, value)?;
        Ok(self.dispatch(topic, payload, qos, retain))
    }

    /// Publishes refused because the connection was not up
    pub fn refused_count(&self) -> u64 {
        self.refused.load(Ordering::Relaxed)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state().borrow().clone()
    }
}

fn to_json<T: Serialize + ?Sized>(topic: &str, value: &T) -> Result<Vec<u8>, PublishError> {
    serde_json::to_vec(value).map_err(|source| PublishError::Serialize {
        topic: topic.to_string(),
        source,
    })
}
