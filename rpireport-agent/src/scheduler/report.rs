//! Report cadence
//!
//! Cycle 0 runs inline inside `start()` (after discovery has been announced),
//! then the cadence fires every `interval` measured from the end of the
//! previous cycle. Each cycle refreshes the snapshot and hands the report to
//! the publisher without waiting for the network.

use async_trait::async_trait;
use chrono::Local;
use rumqttc::QoS;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use super::{Cadence, CadenceState, Firing};
use crate::metrics::{MetricsProvider, MetricsSnapshot};
use crate::publisher::Publisher;

/// Report interval bounds in minutes
pub const MIN_INTERVAL_MINUTES: u32 = 2;
pub const MAX_INTERVAL_MINUTES: u32 = 30;

#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub interval_minutes: u32,
    /// Test mode: report only on cycle 0, keep the cadence firing
    pub stall: bool,
    /// Published as `reporter` in every record
    pub reporter: String,
}

impl ReportSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_minutes) * 60)
    }
}

/// Values payload: `{"info": {...}}`
#[derive(Debug, Serialize)]
pub struct ReportEnvelope<'a> {
    pub info: ReportRecord<'a>,
}

#[derive(Debug, Serialize)]
pub struct ReportRecord<'a> {
    #[serde(flatten)]
    pub snapshot: &'a MetricsSnapshot,
    pub reporter: &'a str,
    pub report_interval: u32,
}

impl<'a> ReportEnvelope<'a> {
    pub fn new(snapshot: &'a MetricsSnapshot, settings: &'a ReportSettings) -> Self {
        Self {
            info: ReportRecord {
                snapshot,
                reporter: &settings.reporter,
                report_interval: settings.interval_minutes,
            },
        }
    }
}

struct ReportCycle {
    provider: Arc<dyn MetricsProvider>,
    publisher: Publisher,
    topic: String,
    settings: ReportSettings,
    cycle: u64,
}

#[async_trait]
impl Firing for ReportCycle {
    async fn fire(&mut self) {
        let cycle = self.cycle;
        self.cycle += 1;
        let now = Local::now().format("%H:%M:%S - %Y/%m/%d").to_string();

        if self.settings.stall && cycle > 0 {
            info!(">> Time to report! ({}) but SKIPPED (TEST: stall)", now);
            return;
        }
        info!(">> Time to report! ({}) cycle {}", now, cycle);

        let snapshot = self.provider.snapshot().await;
        let report = ReportEnvelope::new(&snapshot, &self.settings);

        match serde_json::to_string(&report) {
            Ok(json) => {
                info!("Publishing to MQTT topic \"{}\", Data:{}", self.topic, json);
                let _ = self
                    .publisher
                    .dispatch(self.topic.as_str(), json, QoS::AtLeastOnce, false);
            }
            Err(e) => warn!("Report cycle {} not published: {}", cycle, e),
        }
    }
}

pub struct ReportScheduler {
    cadence: Cadence,
}

impl ReportScheduler {
    /// Runs cycle 0 now, then arms the periodic cadence
    pub async fn start(
        provider: Arc<dyn MetricsProvider>,
        publisher: Publisher,
        values_topic: impl Into<String>,
        settings: ReportSettings,
    ) -> Self {
        let cadence = Cadence::new("report", settings.interval());
        let mut cycle = ReportCycle {
            provider,
            publisher,
            topic: values_topic.into(),
            settings,
            cycle: 0,
        };

        cadence.fire_now(&mut cycle).await;
        cadence.arm(cycle);
        Self { cadence }
    }

    pub async fn stop(&self) {
        self.cadence.stop().await;
    }

    pub fn state(&self) -> CadenceState {
        self.cadence.state()
    }

    /// Cycles run so far, stalled ones included
    pub fn cycles(&self) -> u64 {
        self.cadence.firings()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.cadence.next_deadline()
    }

    pub fn interval(&self) -> Duration {
        self.cadence.period()
    }
}
