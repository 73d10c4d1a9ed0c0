//! Metrics provider for the running host
//!
//! sysinfo covers uptime, load, memory and CPU; `df` and procfs/sysfs reads
//! cover the rest.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use sysinfo::System;
use tracing::debug;

use super::command;
use super::parse::{
    format_uptime, parse_bogomips, parse_millidegrees, parse_root_filesystem, round2,
};
use super::{CpuInfo, FilesystemUsage, MemoryUsage, MetricsProvider, MetricsSnapshot};
use crate::discovery::HostIdentity;
use crate::network::NetworkInfo;

const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";
const CPUINFO: &str = "/proc/cpuinfo";

/// Touched by `apt-get update` and by dpkg actions respectively
const APT_LISTS_DIR: &str = "/var/lib/apt/lists/partial";
const DPKG_LOCK: &str = "/var/lib/dpkg/lock";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

pub struct HostMetrics {
    identity: HostIdentity,
    cpu: Option<CpuInfo>,
    update_markers: Vec<PathBuf>,
    sys: Mutex<System>,
}

impl HostMetrics {
    /// CPU details do not change at runtime and are read once here
    pub async fn new(identity: HostIdentity, update_flag_filespec: Option<PathBuf>) -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        let cpu = collect_cpu(&sys).await;

        let mut update_markers = vec![PathBuf::from(APT_LISTS_DIR), PathBuf::from(DPKG_LOCK)];
        update_markers.extend(update_flag_filespec);

        Self {
            identity,
            cpu,
            update_markers,
            sys: Mutex::new(sys),
        }
    }

    fn memory(&self) -> Option<MemoryUsage> {
        let mut sys = self.sys.lock();
        sys.refresh_memory();
        memory_usage(sys.total_memory(), sys.free_memory(), sys.available_memory())
    }
}

#[async_trait]
impl MetricsProvider for HostMetrics {
    async fn snapshot(&self) -> MetricsSnapshot {
        debug!("Collecting host metrics...");

        let load = System::load_average();
        let networking = match NetworkInfo::discover() {
            Ok(network) => network.summaries(),
            Err(e) => {
                debug!("Interface enumeration failed: {:#}", e);
                Default::default()
            }
        };

        let mut snapshot = MetricsSnapshot::empty(Local::now());
        snapshot.rpi_model = self.identity.model.clone();
        snapshot.ifaces = self.identity.connections.clone();
        snapshot.host_name = self.identity.hostname.clone();
        snapshot.fqdn = self.identity.fqdn.clone();
        snapshot.os_release = self.identity.os_release.clone();
        snapshot.os_kernel_version = self.identity.kernel_version.clone();
        snapshot.up_time = format_uptime(System::uptime());
        snapshot.load_1m = round2(load.one);
        snapshot.load_5m = round2(load.five);
        snapshot.load_15m = round2(load.fifteen);
        snapshot.last_update = last_update(&self.update_markers).await;
        snapshot.filesystem = root_filesystem().await;
        snapshot.memory = self.memory();
        snapshot.cpu = self.cpu.clone();
        snapshot.temperature_c = temperature().await;
        snapshot.networking = networking;
        snapshot
    }
}

async fn collect_cpu(sys: &System) -> Option<CpuInfo> {
    let first = sys.cpus().first()?;
    let bogomips = match tokio::fs::read_to_string(CPUINFO).await {
        Ok(text) => parse_bogomips(&text),
        Err(_) => None,
    };

    Some(CpuInfo {
        cpu_vendor: first.vendor_id().trim().to_string(),
        cpu_model: first.brand().trim().to_string(),
        cpu_architecture: std::env::consts::ARCH.to_string(),
        cpu_bogomips: bogomips.unwrap_or(0.0),
        cpu_number_of_cores: sys.cpus().len(),
    })
}

fn memory_usage(total: u64, free: u64, available: u64) -> Option<MemoryUsage> {
    if total == 0 {
        return None;
    }
    Some(MemoryUsage {
        memory_size: round2(total as f64 / BYTES_PER_MB),
        memory_free: round2(free as f64 / BYTES_PER_MB),
        memory_available: round2(available as f64 / BYTES_PER_MB),
    })
}

async fn root_filesystem() -> Option<FilesystemUsage> {
    let output = command::stdout_of("df", &["-m"]).await?;
    let usage = parse_root_filesystem(&output);
    if usage.is_none() {
        debug!("No root filesystem row in df output");
    }
    usage
}

async fn temperature() -> Option<f64> {
    let raw = tokio::fs::read_to_string(THERMAL_ZONE).await.ok()?;
    parse_millidegrees(&raw)
}

/// Most recent modification time among the update markers
async fn last_update(markers: &[PathBuf]) -> Option<DateTime<Local>> {
    let mut latest: Option<DateTime<Local>> = None;
    for marker in markers {
        if let Some(modified) = modified_at(marker).await {
            latest = Some(latest.map_or(modified, |l| l.max(modified)));
        }
    }
    latest
}

async fn modified_at(path: &Path) -> Option<DateTime<Local>> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    meta.modified().ok().map(DateTime::<Local>::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_memory_in_megabytes() {
        let mem = memory_usage(1024 * 1024 * 1024, 512 * 1024 * 1024, 768 * 1024 * 1024).unwrap();
        assert_eq!(mem.memory_size, 1024.0);
        assert_eq!(mem.memory_free, 512.0);
        assert_eq!(mem.memory_available, 768.0);
    }

    #[test]
    fn test_memory_absent_without_total() {
        assert!(memory_usage(0, 0, 0).is_none());
    }

    #[tokio::test]
    async fn test_last_update_takes_newest_marker() {
        let dir = tempfile::tempdir().unwrap();
        let older = dir.path().join("older");
        let newer = dir.path().join("newer");
        std::fs::write(&older, b"").unwrap();
        std::fs::write(&newer, b"").unwrap();

        let past = SystemTime::now() - Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(&older)
            .unwrap()
            .set_modified(past)
            .unwrap();

        let markers = vec![older, dir.path().join("missing"), newer.clone()];
        let latest = last_update(&markers).await.unwrap();
        let expected = modified_at(&newer).await.unwrap();
        assert_eq!(latest, expected);
    }

    #[tokio::test]
    async fn test_last_update_none_when_no_marker_exists() {
        let markers = vec![PathBuf::from("/definitely/not/here")];
        assert!(last_update(&markers).await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_carries_identity() {
        let identity = HostIdentity::from_parts(
            "pi3plus.home",
            "",
            "Raspberry Pi 3 Model B Rev 1.2",
            "Raspbian",
            "5.10",
            "b8:27:eb:1a:f3:bc",
        );
        let metrics = HostMetrics::new(identity, None).await;
        let snapshot = metrics.snapshot().await;

        assert_eq!(snapshot.host_name, "pi3plus");
        assert_eq!(snapshot.fqdn, "pi3plus.home");
        assert_eq!(snapshot.rpi_model, "RPi 3 Model B r1.2");
        assert!(!snapshot.up_time.is_empty());
    }
}
