//! rumqttc-backed transport
//!
//! The event loop runs on its own task from `connect` until shutdown and is
//! the only writer of the connection state. Until the first CONNACK any error
//! is final (`Failed`); afterwards the loop keeps polling, which makes
//! rumqttc reconnect.

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Incoming, LastWill,
    MqttOptions, Outgoing, QoS,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{ConnectionState, Transport, TransportError, WillMessage};

/// Request channel capacity between the client handle and the event loop
const CHANNEL_CAPACITY: usize = 10;

/// Pause before polling again after losing an established connection
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    pub credentials: Option<(String, String)>,
    pub tls: Option<TlsSettings>,
}

/// TLS material; without a CA the platform roots are used
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    pub ca_cert: Option<PathBuf>,
    pub certfile: Option<PathBuf>,
    pub keyfile: Option<PathBuf>,
}

impl TlsSettings {
    async fn transport(&self) -> Result<rumqttc::Transport, TransportError> {
        let Some(ca_path) = &self.ca_cert else {
            return Ok(rumqttc::Transport::tls_with_default_config());
        };

        let ca = read_pem(ca_path).await?;
        let client_auth = match (&self.certfile, &self.keyfile) {
            (Some(cert), Some(key)) => Some((read_pem(cert).await?, read_pem(key).await?)),
            _ => None,
        };

        Ok(rumqttc::Transport::tls(ca, client_auth, None))
    }
}

async fn read_pem(path: &Path) -> Result<Vec<u8>, TransportError> {
    tokio::fs::read(path).await.map_err(|source| TransportError::Tls {
        path: path.display().to_string(),
        source,
    })
}

/// MQTT transport over rumqttc
pub struct MqttTransport {
    settings: MqttSettings,
    client: Mutex<Option<AsyncClient>>,
    state: Arc<watch::Sender<ConnectionState>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    pub fn new(settings: MqttSettings) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            settings,
            client: Mutex::new(None),
            state: Arc::new(state),
            driver: Mutex::new(None),
        }
    }

    async fn options(&self, will: WillMessage) -> Result<MqttOptions, TransportError> {
        let mut options = MqttOptions::new(
            &self.settings.client_id,
            &self.settings.host,
            self.settings.port,
        );
        options.set_keep_alive(self.settings.keep_alive);
        options.set_clean_session(true);
        options.set_last_will(LastWill::new(will.topic, will.payload, will.qos, will.retain));

        if let Some((username, password)) = &self.settings.credentials {
            options.set_credentials(username, password);
        }
        if let Some(tls) = &self.settings.tls {
            options.set_transport(tls.transport().await?);
        }

        Ok(options)
    }

    fn client(&self) -> Result<AsyncClient, TransportError> {
        self.client.lock().clone().ok_or(TransportError::NotStarted)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, will: WillMessage) -> Result<(), TransportError> {
        if self.client.lock().is_some() {
            return Err(TransportError::AlreadyStarted);
        }

        let options = self.options(will).await?;
        let (client, eventloop) = AsyncClient::new(options, CHANNEL_CAPACITY);

        {
            let mut slot = self.client.lock();
            if slot.is_some() {
                return Err(TransportError::AlreadyStarted);
            }
            *slot = Some(client);
        }

        info!(
            "Connecting to MQTT broker {}:{} as {}",
            self.settings.host, self.settings.port, self.settings.client_id
        );
        self.state.send_replace(ConnectionState::Connecting);

        let handle = tokio::spawn(drive_event_loop(eventloop, self.state.clone()));
        *self.driver.lock() = Some(handle);
        Ok(())
    }

    fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.client()?.publish(topic, qos, retain, payload).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.client()?.disconnect().await?;
        Ok(())
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.driver.lock().take() {
            handle.abort();
        }
    }
}

/// Polls the event loop for the connection lifetime
async fn drive_event_loop(mut eventloop: EventLoop, state: Arc<watch::Sender<ConnectionState>>) {
    let mut established = false;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    established = true;
                    info!("* MQTT connection established");
                    state.send_replace(ConnectionState::Connected);
                } else {
                    let reason = format!("connection refused: {:?}", ack.code);
                    error!("MQTT {}", reason);
                    state.send_replace(ConnectionState::Failed(reason));
                    return;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent, stopping event loop");
                state.send_replace(ConnectionState::Disconnected);
                return;
            }
            Ok(event) => {
                debug!("MQTT event: {:?}", event);
            }
            Err(ConnectionError::ConnectionRefused(code)) => {
                let reason = format!("connection refused: {:?}", code);
                error!("MQTT {}", reason);
                state.send_replace(ConnectionState::Failed(reason));
                return;
            }
            Err(e) if !established => {
                error!("MQTT connection error: {}", e);
                state.send_replace(ConnectionState::Failed(e.to_string()));
                return;
            }
            Err(e) => {
                warn!("MQTT connection lost: {} (retrying in {:?})", e, RECONNECT_DELAY);
                state.send_replace(ConnectionState::Disconnected);
                tokio::time::sleep(RECONNECT_DELAY).await;
                state.send_replace(ConnectionState::Connecting);
            }
        }
    }
}
