//! Liveness heartbeat
//!
//! Publishes `online` on the status topic at a fixed period, independent of
//! the report interval, so the hub can tell "device silent" from "metrics
//! stale". The publish is detached and the cadence re-arms right away.

use async_trait::async_trait;
use rumqttc::QoS;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::{Cadence, CadenceState, Firing};
use crate::publisher::Publisher;
use crate::topics::ONLINE;

/// Heartbeat period; deliberately not configurable
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);

struct Beat {
    publisher: Publisher,
    topic: String,
}

#[async_trait]
impl Firing for Beat {
    async fn fire(&mut self) {
        debug!("- SEND: yes, still alive -");
        let _ = self
            .publisher
            .dispatch(self.topic.as_str(), ONLINE, QoS::AtMostOnce, false);
    }
}

pub struct HeartbeatScheduler {
    cadence: Cadence,
}

impl HeartbeatScheduler {
    /// Starts the heartbeat; the first beat is one period from now
    pub fn start(publisher: Publisher, status_topic: impl Into<String>) -> Self {
        Self::start_with_period(publisher, status_topic, HEARTBEAT_PERIOD)
    }

    #[doc(hidden)]
    pub fn start_with_period(
        publisher: Publisher,
        status_topic: impl Into<String>,
        period: Duration,
    ) -> Self {
        let cadence = Cadence::new("heartbeat", period);
        cadence.arm(Beat {
            publisher,
            topic: status_topic.into(),
        });
        Self { cadence }
    }

    pub async fn stop(&self) {
        self.cadence.stop().await;
    }

    pub fn state(&self) -> CadenceState {
        self.cadence.state()
    }

    pub fn beats(&self) -> u64 {
        self.cadence.firings()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.cadence.next_deadline()
    }
}
