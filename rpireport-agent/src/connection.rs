//! Connection supervisor
//!
//! Registers the offline last will, starts the transport and waits for the
//! broker's verdict. There is no retry: a failure is returned to `main`, which
//! exits with code 1 and leaves restarting to the init system.

use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::topics::{Topics, ONLINE};
use crate::transport::{ConnectionState, Transport, TransportError, WillMessage};

/// Upper bound on the wait for the first CONNACK
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("MQTT connection error: {0}")]
    Transport(#[from] TransportError),

    #[error("MQTT connection error: {0}")]
    Refused(String),

    #[error("no MQTT connection after {0:?}")]
    Timeout(Duration),

    #[error("MQTT transport stopped before connecting")]
    Closed,
}

pub struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl ConnectionSupervisor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Connect with the offline will on `topics.status`, then announce `online`
    pub async fn connect(&self, topics: &Topics) -> Result<(), ConnectError> {
        info!("Connecting to MQTT broker ...");
        self.transport
            .connect(WillMessage::offline(&topics.status))
            .await?;

        let mut state = self.transport.state();
        tokio::time::timeout(self.timeout, wait_for_verdict(&mut state))
            .await
            .map_err(|_| ConnectError::Timeout(self.timeout))??;

        self.transport
            .publish(&topics.status, ONLINE.as_bytes().to_vec(), QoS::AtMostOnce, false)
            .await?;
        info!("Connected, {} announced on {}", ONLINE, topics.status);
        Ok(())
    }
}

async fn wait_for_verdict(state: &mut watch::Receiver<ConnectionState>) -> Result<(), ConnectError> {
    loop {
        let current = state.borrow_and_update().clone();
        match current {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Failed(reason) => return Err(ConnectError::Refused(reason)),
            other => debug!("* Wait on MQTT connection, state={:?}", other),
        }

        if state.changed().await.is_err() {
            return Err(ConnectError::Closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_sees_later_connect() {
        let (tx, mut rx) = watch::channel(ConnectionState::Connecting);
        let waiter = tokio::spawn(async move { wait_for_verdict(&mut rx).await });

        tokio::task::yield_now().await;
        tx.send_replace(ConnectionState::Connected);

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_wait_reports_failure_reason() {
        let (_tx, mut rx) = watch::channel(ConnectionState::Failed("bad credentials".into()));
        let err = wait_for_verdict(&mut rx).await.unwrap_err();
        assert!(matches!(err, ConnectError::Refused(ref r) if r == "bad credentials"));
    }

    #[tokio::test]
    async fn test_wait_ends_when_driver_gone() {
        let (tx, mut rx) = watch::channel(ConnectionState::Connecting);
        drop(tx);
        assert!(matches!(wait_for_verdict(&mut rx).await, Err(ConnectError::Closed)));
    }
}
