//! Network interface enumeration
//!
//! This module handles:
//! - Interface enumeration with IPv4 addresses and MACs
//! - Primary MAC selection with priority (Ethernet > WiFi > Other)
//! - Filtering of container/bridge interfaces created by Home Assistant

use anyhow::{Context, Result};
use if_addrs::{get_if_addrs, IfAddr};
use mac_address::MacAddress;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::metrics::InterfaceSummary;

/// Network interface information
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkInterface {
    pub name: String,
    pub mac: String,
    /// First IPv4 address, if any
    pub ip: Option<String>,
    #[serde(rename = "type")]
    pub interface_type: InterfaceType,
}

/// Interface type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    Ethernet,
    Wireless,
    Loopback,
    Other,
}

/// Enumerated interfaces and the MAC chosen to identify the host
#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkInfo {
    pub primary_mac: Option<String>,
    pub interfaces: Vec<NetworkInterface>,
}

/// Interfaces that belong to containers rather than the host
const IGNORED_PATTERNS: &[&str] = &["docker", "veth", "hassio"];

impl NetworkInfo {
    /// Enumerate host interfaces and determine the primary MAC
    pub fn discover() -> Result<Self> {
        debug!("Enumerating network interfaces...");

        let if_addrs = get_if_addrs().context("Failed to enumerate network interfaces")?;

        let mut by_name: BTreeMap<String, Option<String>> = BTreeMap::new();
        for if_addr in if_addrs {
            if if_addr.is_loopback() || is_ignored(&if_addr.name) {
                continue;
            }
            let ipv4 = match if_addr.addr {
                IfAddr::V4(v4) => Some(v4.ip.to_string()),
                IfAddr::V6(_) => None,
            };
            let slot = by_name.entry(if_addr.name).or_default();
            if slot.is_none() {
                *slot = ipv4;
            }
        }

        let mut interfaces = Vec::new();
        for (name, ip) in by_name {
            let Some(mac) = interface_mac(&name) else {
                continue;
            };
            let interface = NetworkInterface {
                interface_type: classify_interface(&name),
                mac: format_mac(&mac),
                name,
                ip,
            };
            debug!("Found interface: {} ({})", interface.name, interface.mac);
            interfaces.push(interface);
        }

        Ok(Self::from_interfaces(interfaces))
    }

    pub fn from_interfaces(interfaces: Vec<NetworkInterface>) -> Self {
        Self {
            primary_mac: select_primary_mac(&interfaces),
            interfaces,
        }
    }

    /// Per-interface record published under `networking`
    pub fn summaries(&self) -> BTreeMap<String, InterfaceSummary> {
        self.interfaces
            .iter()
            .map(|iface| {
                (
                    iface.name.clone(),
                    InterfaceSummary {
                        ip: iface.ip.clone(),
                        mac: iface.mac.clone(),
                    },
                )
            })
            .collect()
    }
}

fn interface_mac(interface_name: &str) -> Option<MacAddress> {
    match mac_address::mac_address_by_name(interface_name) {
        Ok(Some(mac)) => Some(mac),
        Ok(None) => {
            debug!("No MAC found for interface: {}", interface_name);
            None
        }
        Err(e) => {
            debug!("Error getting MAC for {}: {}", interface_name, e);
            None
        }
    }
}

/// Lowercase colon-separated form
pub fn format_mac(mac: &MacAddress) -> String {
    mac.bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn is_ignored(name: &str) -> bool {
    IGNORED_PATTERNS.iter().any(|pattern| name.contains(pattern))
}

/// Classify interface type based on name patterns
fn classify_interface(name: &str) -> InterfaceType {
    let name_lower = name.to_lowercase();

    if name_lower == "lo" || name_lower.starts_with("lo:") {
        return InterfaceType::Loopback;
    }

    if name_lower.starts_with("wlan")
        || name_lower.starts_with("wlp")
        || name_lower.starts_with("wlo")
        || name_lower.contains("wifi")
    {
        return InterfaceType::Wireless;
    }

    // Covers ens/enp/eno/enx as well
    if name_lower.starts_with("eth") || name_lower.starts_with("en") {
        return InterfaceType::Ethernet;
    }

    InterfaceType::Other
}

/// Ethernet first, then wireless, then whatever is left
fn select_primary_mac(interfaces: &[NetworkInterface]) -> Option<String> {
    for wanted in [InterfaceType::Ethernet, InterfaceType::Wireless] {
        if let Some(interface) = interfaces.iter().find(|i| i.interface_type == wanted) {
            debug!("Selected {:?} interface as primary: {}", wanted, interface.name);
            return Some(interface.mac.clone());
        }
    }

    let fallback = interfaces
        .iter()
        .find(|i| i.interface_type != InterfaceType::Loopback)?;
    debug!("No Ethernet/WiFi found, using first interface: {}", fallback.name);
    Some(fallback.mac.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    fn iface(name: &str, mac: &str, ip: Option<&str>) -> NetworkInterface {
        NetworkInterface {
            name: name.to_string(),
            mac: mac.to_string(),
            ip: ip.map(str::to_string),
            interface_type: classify_interface(name),
        }
    }

    #[test]
    fn test_interface_classification() {
        assert_eq!(classify_interface("eth0"), InterfaceType::Ethernet);
        assert_eq!(classify_interface("enp3s0"), InterfaceType::Ethernet);
        assert_eq!(classify_interface("wlan0"), InterfaceType::Wireless);
        assert_eq!(classify_interface("lo"), InterfaceType::Loopback);
        assert_eq!(classify_interface("br0"), InterfaceType::Other);
    }

    #[test]
    fn test_names_containing_lo_are_not_loopback() {
        assert_eq!(classify_interface("wlo1"), InterfaceType::Wireless);
        assert_eq!(classify_interface("vlock0"), InterfaceType::Other);
    }

    #[test]
    fn test_container_interfaces_ignored() {
        assert!(is_ignored("docker0"));
        assert!(is_ignored("veth1a2b3c"));
        assert!(is_ignored("hassio"));
        assert!(!is_ignored("eth0"));
    }

    #[test]
    fn test_primary_mac_prefers_ethernet() {
        let info = NetworkInfo::from_interfaces(vec![
            iface("wlan0", "b8:27:eb:4f:a6:e9", Some("192.168.100.189")),
            iface("eth0", "b8:27:eb:1a:f3:bc", None),
        ]);
        assert_eq!(info.primary_mac.as_deref(), Some("b8:27:eb:1a:f3:bc"));
    }

    #[test]
    fn test_primary_mac_falls_back() {
        let info = NetworkInfo::from_interfaces(vec![iface("br0", "02:42:ac:11:00:02", None)]);
        assert_eq!(info.primary_mac.as_deref(), Some("02:42:ac:11:00:02"));

        let empty = NetworkInfo::from_interfaces(Vec::new());
        assert!(empty.primary_mac.is_none());
    }

    struct LoudEvents(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for LoudEvents {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() <= tracing::Level::INFO {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_per_cycle_enumeration_stays_quiet() {
        let loud = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(LoudEvents(loud.clone()));

        tracing::subscriber::with_default(subscriber, || {
            for _ in 0..3 {
                let info = NetworkInfo::from_interfaces(vec![
                    iface("br0", "02:42:ac:11:00:02", None),
                    iface("wlan0", "b8:27:eb:4f:a6:e9", Some("192.168.100.189")),
                ]);
                let _ = info.summaries();
            }
            NetworkInfo::from_interfaces(Vec::new());
        });

        assert_eq!(loud.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_summaries_keyed_by_name() {
        let info = NetworkInfo::from_interfaces(vec![
            iface("wlan0", "b8:27:eb:4f:a6:e9", Some("192.168.100.189")),
            iface("eth0", "b8:27:eb:1a:f3:bc", None),
        ]);
        let value = serde_json::to_value(info.summaries()).unwrap();

        assert_eq!(value["wlan0"]["IP"], "192.168.100.189");
        assert_eq!(value["wlan0"]["mac"], "b8:27:eb:4f:a6:e9");
        assert!(value["eth0"].get("IP").is_none());
    }

    #[test]
    fn test_format_mac() {
        let mac = MacAddress::new([0xB8, 0x27, 0xEB, 0x1A, 0xF3, 0xBC]);
        assert_eq!(format_mac(&mac), "b8:27:eb:1a:f3:bc");
    }
}
