//! Agent lifecycle: connect, announce, report, shut down
//!
//! Startup order is fixed: broker connection (offline will registered,
//! `online` published), heartbeat armed, discovery published and awaited,
//! then report cycle 0 inline and the periodic cadence. A connection failure
//! stops the sequence before anything else is published, and a broker
//! failure reported later stops both cadences and ends the run with an error.

use rumqttc::QoS;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectError, ConnectionSupervisor, DEFAULT_CONNECT_TIMEOUT};
use crate::discovery::{discovery_payloads, HostIdentity};
use crate::metrics::MetricsProvider;
use crate::notify;
use crate::publisher::{PublishError, Publisher};
use crate::scheduler::heartbeat::HeartbeatScheduler;
use crate::scheduler::report::{ReportScheduler, ReportSettings};
use crate::topics::Topics;
use crate::transport::{ConnectionState, Transport, WillMessage};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("discovery announcement failed: {0}")]
    Discovery(#[from] PublishError),
}

pub struct Agent {
    identity: HostIdentity,
    topics: Topics,
    settings: ReportSettings,
    transport: Arc<dyn Transport>,
    provider: Arc<dyn MetricsProvider>,
    connect_timeout: Duration,
}

impl Agent {
    pub fn new(
        identity: HostIdentity,
        topics: Topics,
        settings: ReportSettings,
        transport: Arc<dyn Transport>,
        provider: Arc<dyn MetricsProvider>,
    ) -> Self {
        Self {
            identity,
            topics,
            settings,
            transport,
            provider,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Runs the startup sequence and returns the live schedulers
    pub async fn start(self) -> Result<RunningAgent, AgentError> {
        let supervisor =
            ConnectionSupervisor::new(self.transport.clone()).with_timeout(self.connect_timeout);
        supervisor.connect(&self.topics).await?;
        notify::ready();

        let publisher = Publisher::new(self.transport.clone());
        let heartbeat = HeartbeatScheduler::start(publisher.clone(), self.topics.status.clone());

        info!("Announcing RPi Monitoring device to MQTT broker for auto-discovery ...");
        for (topic, config) in discovery_payloads(&self.identity, &self.topics) {
            if let Err(e) = publisher
                .publish_json(&topic, &config, QoS::AtLeastOnce, true)
                .await
            {
                heartbeat.stop().await;
                return Err(e.into());
            }
        }

        let report = ReportScheduler::start(
            self.provider.clone(),
            publisher.clone(),
            self.topics.values.clone(),
            self.settings.clone(),
        )
        .await;

        Ok(RunningAgent {
            heartbeat,
            report,
            publisher,
            transport: self.transport,
            topics: self.topics,
        })
    }

    /// Starts, then runs until `shutdown` resolves or the broker connection
    /// fails. `shutdown` is also honoured while startup is in progress.
    pub async fn run_until<S>(self, shutdown: S) -> Result<(), AgentError>
    where
        S: Future<Output = ()>,
    {
        let transport = self.transport.clone();
        tokio::pin!(shutdown);

        let running = tokio::select! {
            started = self.start() => started?,
            _ = &mut shutdown => {
                info!("Shutdown requested during startup");
                if let Err(e) = transport.disconnect().await {
                    debug!("Disconnect during startup: {}", e);
                }
                return Ok(());
            }
        };
        info!("Reporter running, MQTT topic {}", running.topics.values);

        tokio::select! {
            _ = &mut shutdown => {
                running.shutdown().await;
                Ok(())
            }
            err = broker_failure(transport.state()) => {
                error!("{}, stopping reporter", err);
                running.stop_cadences().await;
                Err(err.into())
            }
        }
    }
}

/// Resolves once the transport gives up on the broker
async fn broker_failure(mut state: watch::Receiver<ConnectionState>) -> ConnectError {
    loop {
        let current = state.borrow_and_update().clone();
        if let ConnectionState::Failed(reason) = current {
            return ConnectError::Refused(reason);
        }
        if state.changed().await.is_err() {
            return ConnectError::Closed;
        }
    }
}

/// Agent past startup, owning both cadences
pub struct RunningAgent {
    heartbeat: HeartbeatScheduler,
    report: ReportScheduler,
    publisher: Publisher,
    transport: Arc<dyn Transport>,
    topics: Topics,
}

impl RunningAgent {
    /// Stops both cadences, then publishes the offline marker the will would
    /// have carried, since a clean disconnect does not fire it
    pub async fn shutdown(self) {
        info!("Shutting down ...");
        self.stop_cadences().await;

        let will = WillMessage::offline(&self.topics.status);
        if let Err(e) = self
            .publisher
            .publish(&will.topic, will.payload.into_bytes(), will.qos, will.retain)
            .await
        {
            warn!("Offline marker not published: {}", e);
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!("Disconnect failed: {}", e);
        }
    }

    async fn stop_cadences(&self) {
        self.report.stop().await;
        self.heartbeat.stop().await;
    }

    pub fn heartbeat(&self) -> &HeartbeatScheduler {
        &self.heartbeat
    }

    pub fn report(&self) -> &ReportScheduler {
        &self.report
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.publisher.connection_state()
    }
}
