/*!
Fixed-value metrics provider

Returns a canned snapshot, optionally after a delay so tests can model a
slow collection, and counts how often it was asked.
*/

use async_trait::async_trait;
use chrono::{Local, TimeZone};
use rpireport_agent::metrics::{CpuInfo, FilesystemUsage, InterfaceSummary, MemoryUsage};
use rpireport_agent::{HostIdentity, MetricsProvider, MetricsSnapshot};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Identity of a Raspberry Pi 3B+ used across scenario tests
pub fn sample_identity() -> HostIdentity {
    HostIdentity::from_parts(
        "pi3plus.home",
        "",
        "Raspberry Pi 3 Model B Plus Rev 1.3",
        "Raspbian GNU/Linux 10 (buster)",
        "5.10.103-v7+",
        "b8:27:eb:1a:f3:bc",
    )
}

/// Fully populated snapshot for `identity`
pub fn sample_snapshot(identity: &HostIdentity) -> MetricsSnapshot {
    let mut snapshot = MetricsSnapshot::empty(Local::now());
    snapshot.rpi_model = identity.model.clone();
    snapshot.ifaces = identity.connections.clone();
    snapshot.host_name = identity.hostname.clone();
    snapshot.fqdn = identity.fqdn.clone();
    snapshot.os_release = identity.os_release.clone();
    snapshot.os_kernel_version = identity.kernel_version.clone();
    snapshot.up_time = "3 days, 4:05".to_string();
    snapshot.load_1m = 0.12;
    snapshot.load_5m = 0.08;
    snapshot.load_15m = 0.05;
    snapshot.last_update = Local.with_ymd_and_hms(2020, 7, 22, 17, 8, 26).single();
    snapshot.filesystem = Some(FilesystemUsage {
        root_fs_total: 64,
        root_fs_used_percent: 17,
    });
    snapshot.memory = Some(MemoryUsage {
        memory_size: 926.08,
        memory_free: 101.42,
        memory_available: 612.9,
    });
    snapshot.cpu = Some(CpuInfo {
        cpu_vendor: "ARM".to_string(),
        cpu_model: "Cortex-A53".to_string(),
        cpu_architecture: "armv7l".to_string(),
        cpu_bogomips: 38.4,
        cpu_number_of_cores: 4,
    });
    snapshot.temperature_c = Some(48.3);
    snapshot.networking.insert(
        "wlan0".to_string(),
        InterfaceSummary {
            ip: Some("192.168.100.189".to_string()),
            mac: "b8:27:eb:4f:a6:e9".to_string(),
        },
    );
    snapshot
}

pub struct StaticMetrics {
    snapshot: MetricsSnapshot,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl StaticMetrics {
    pub fn new(snapshot: MetricsSnapshot) -> Self {
        Self {
            snapshot,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn sample() -> Self {
        Self::new(sample_snapshot(&sample_identity()))
    }

    /// Only identity fields; every collector came back empty
    pub fn degraded() -> Self {
        let identity = sample_identity();
        let mut snapshot = MetricsSnapshot::empty(Local::now());
        snapshot.host_name = identity.hostname;
        snapshot.fqdn = identity.fqdn;
        Self::new(snapshot)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Shared call counter, readable after the provider moved into the agent
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl MetricsProvider for StaticMetrics {
    async fn snapshot(&self) -> MetricsSnapshot {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut snapshot = self.snapshot.clone();
        snapshot.timestamp = Local::now();
        snapshot
    }
}
