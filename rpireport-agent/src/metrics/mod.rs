//! Host metrics for the report cycle
//!
//! Provides:
//! - `MetricsSnapshot`: the record published under `info` each cycle
//! - `MetricsProvider`: on-demand snapshot source used by the scheduler
//! - `HostMetrics`: sysinfo + command based provider for the real host
//!
//! Collectors never fail a cycle: anything that cannot be read is published
//! empty or left out.

pub(crate) mod command;
mod host;
pub mod parse;

use async_trait::async_trait;
use chrono::{DateTime, Local, SecondsFormat};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

pub use host::HostMetrics;

/// On-demand source of host snapshots
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn snapshot(&self) -> MetricsSnapshot;
}

/// Host state captured at one instant
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    #[serde(serialize_with = "iso_seconds")]
    pub timestamp: DateTime<Local>,
    pub rpi_model: String,
    pub ifaces: String,
    pub host_name: String,
    pub fqdn: String,
    pub os_release: String,
    pub os_kernel_version: String,
    pub up_time: String,
    pub load_1m: f64,
    pub load_5m: f64,
    pub load_15m: f64,
    /// Empty string when undeterminable
    #[serde(serialize_with = "iso_seconds_or_empty")]
    pub last_update: Option<DateTime<Local>>,
    #[serde(flatten)]
    pub filesystem: Option<FilesystemUsage>,
    #[serde(flatten)]
    pub memory: Option<MemoryUsage>,
    #[serde(flatten)]
    pub cpu: Option<CpuInfo>,
    pub temperature_c: Option<f64>,
    pub networking: BTreeMap<String, InterfaceSummary>,
}

/// Root filesystem usage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilesystemUsage {
    /// GB, rounded up to the next power of two
    pub root_fs_total: u64,
    pub root_fs_used_percent: u8,
}

/// Memory figures in MB
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryUsage {
    pub memory_size: f64,
    pub memory_free: f64,
    pub memory_available: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuInfo {
    pub cpu_vendor: String,
    pub cpu_model: String,
    pub cpu_architecture: String,
    pub cpu_bogomips: f64,
    pub cpu_number_of_cores: usize,
}

/// IPv4 address and MAC of one interface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceSummary {
    #[serde(rename = "IP", skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub mac: String,
}

impl MetricsSnapshot {
    /// Snapshot with every field empty
    pub fn empty(timestamp: DateTime<Local>) -> Self {
        Self {
            timestamp,
            rpi_model: String::new(),
            ifaces: String::new(),
            host_name: String::new(),
            fqdn: String::new(),
            os_release: String::new(),
            os_kernel_version: String::new(),
            up_time: String::new(),
            load_1m: 0.0,
            load_5m: 0.0,
            load_15m: 0.0,
            last_update: None,
            filesystem: None,
            memory: None,
            cpu: None,
            temperature_c: None,
            networking: BTreeMap::new(),
        }
    }
}

fn iso_seconds<S: Serializer>(value: &DateTime<Local>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Secs, false))
}

fn iso_seconds_or_empty<S: Serializer>(
    value: &Option<DateTime<Local>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) => iso_seconds(value, serializer),
        None => serializer.serialize_str(""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_empty_sections_are_left_out() {
        let snapshot = MetricsSnapshot::empty(Local::now());
        let value = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(value["last_update"], "");
        assert!(value.get("root_fs_total").is_none());
        assert!(value.get("memory_size").is_none());
        assert!(value.get("cpu_model").is_none());
        assert!(value.get("host_name").is_some());
        assert!(value["temperature_c"].is_null());
    }

    #[test]
    fn test_timestamp_has_second_precision() {
        let at = Local.with_ymd_and_hms(2020, 7, 22, 17, 8, 26).unwrap();
        let mut snapshot = MetricsSnapshot::empty(at);
        snapshot.last_update = Some(at);
        let value = serde_json::to_value(&snapshot).unwrap();

        let stamp = value["timestamp"].as_str().unwrap();
        assert!(stamp.starts_with("2020-07-22T17:08:26"));
        assert!(!stamp.contains('.'));
        assert_eq!(value["last_update"], value["timestamp"]);
    }

    #[test]
    fn test_sections_are_flattened() {
        let mut snapshot = MetricsSnapshot::empty(Local::now());
        snapshot.filesystem = Some(FilesystemUsage {
            root_fs_total: 64,
            root_fs_used_percent: 17,
        });
        snapshot.cpu = Some(CpuInfo {
            cpu_vendor: "ARM".into(),
            cpu_model: "Cortex-A53".into(),
            cpu_architecture: "aarch64".into(),
            cpu_bogomips: 38.4,
            cpu_number_of_cores: 4,
        });
        let value = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(value["root_fs_total"], 64);
        assert_eq!(value["root_fs_used_percent"], 17);
        assert_eq!(value["cpu_number_of_cores"], 4);
        assert!(value.get("filesystem").is_none());
    }
}
