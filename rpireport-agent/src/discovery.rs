//! Host identification and Home Assistant discovery payloads
//!
//! This module handles:
//! - Hostname/FQDN resolution with an optional fallback domain
//! - Board model and connectivity summary from the device tree
//! - Unique id generation from the primary MAC
//! - The three entity configurations announced once at startup

use serde::Serialize;
use sysinfo::System;
use tracing::{debug, info, warn};

use crate::metrics::command;
use crate::network::{format_mac, NetworkInfo};
use crate::topics::{Topics, OFFLINE, ONLINE, PAYLOAD_WRAPPER};

const DEVICE_TREE_MODEL: &str = "/proc/device-tree/model";
const MANUFACTURER: &str = "Raspberry Pi (Trading) Ltd.";

/// Identity of the reporting host, resolved once at startup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostIdentity {
    /// Short hostname
    pub hostname: String,
    pub fqdn: String,
    /// Compacted board model, e.g. `RPi 3 Model B r1.2`
    pub model: String,
    /// Connectivity summary derived from the model
    pub connections: String,
    pub os_release: String,
    pub kernel_version: String,
    /// Primary MAC, colon separated, empty when none was found
    pub mac: String,
    pub unique_id: String,
}

impl HostIdentity {
    /// Resolve the identity of the running host
    pub async fn resolve(fallback_domain: &str) -> Self {
        info!("Starting host identification...");

        let raw_hostname = match command::stdout_of("hostname", &["-f"]).await {
            Some(out) if !out.trim().is_empty() => out.trim().to_string(),
            _ => hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string()),
        };

        let model_raw = match tokio::fs::read(DEVICE_TREE_MODEL).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).replace('\0', ""),
            Err(e) => {
                debug!("No device-tree model ({}): {}", DEVICE_TREE_MODEL, e);
                String::new()
            }
        };

        let network = NetworkInfo::discover().unwrap_or_else(|e| {
            warn!("Network discovery failed: {:#}", e);
            NetworkInfo::default()
        });
        match &network.primary_mac {
            Some(mac) => info!(
                "Selected primary MAC: {} from {} interfaces",
                mac,
                network.interfaces.len()
            ),
            None => warn!("No network interface with a MAC address found"),
        }
        let mac = network
            .primary_mac
            .or_else(|| {
                mac_address::get_mac_address()
                    .ok()
                    .flatten()
                    .map(|mac| format_mac(&mac))
            })
            .unwrap_or_default();

        let identity = Self::from_parts(
            &raw_hostname,
            fallback_domain,
            &model_raw,
            System::long_os_version().unwrap_or_default(),
            System::kernel_version().unwrap_or_default(),
            &mac,
        );

        info!(
            "Identification complete - Host: {}, FQDN: {}, Model: {}, Id: {}",
            identity.hostname, identity.fqdn, identity.model, identity.unique_id
        );
        identity
    }

    /// Derive an identity from raw host facts
    pub fn from_parts(
        raw_hostname: &str,
        fallback_domain: &str,
        model_raw: &str,
        os_release: impl Into<String>,
        kernel_version: impl Into<String>,
        mac: &str,
    ) -> Self {
        let (hostname, fqdn) = split_fqdn(raw_hostname, fallback_domain);
        let model = compact_model(model_raw.trim());
        let connections = connections_for_model(&model).to_string();

        Self {
            hostname,
            fqdn,
            connections,
            model,
            os_release: os_release.into(),
            kernel_version: kernel_version.into(),
            mac: mac.to_lowercase(),
            unique_id: unique_id(mac),
        }
    }
}

/// `(hostname, fqdn)` from `hostname -f` output
pub fn split_fqdn(raw: &str, fallback_domain: &str) -> (String, String) {
    let raw = raw.trim();
    match raw.split_once('.') {
        Some((short, _)) => (short.to_string(), raw.to_string()),
        None if !fallback_domain.is_empty() => {
            (raw.to_string(), format!("{}.{}", raw, fallback_domain))
        }
        None => (raw.to_string(), raw.to_string()),
    }
}

/// Shorter form of the device-tree model, same information
pub fn compact_model(raw: &str) -> String {
    raw.replace("Raspberry ", "R")
        .replace("i Model ", "i 1 Model ")
        .replace("Rev ", "r")
        .replace(" Plus ", "+")
}

/// Built-in connectivity of a (compacted) board model
pub fn connections_for_model(model: &str) -> &'static str {
    const ALL: &str = "Ethernet, Wireless, Bluetooth";

    if model.contains("Pi 3 ") {
        if model.contains(" A ") {
            "Wireless, Bluetooth"
        } else {
            ALL
        }
    } else if model.contains("Pi 2 ") {
        "Ethernet"
    } else if model.contains("Pi 1 ") {
        if model.contains(" A ") {
            ""
        } else {
            "Ethernet"
        }
    } else {
        ALL
    }
}

/// `RPi-<first 6 hex>Mon<remaining hex>` from a MAC address
pub fn unique_id(mac: &str) -> String {
    let basic: String = mac.to_lowercase().chars().filter(|c| *c != ':').collect();
    let split = basic
        .char_indices()
        .nth(6)
        .map(|(idx, _)| idx)
        .unwrap_or(basic.len());
    let (left, right) = basic.split_at(split);
    format!("RPi-{}Mon{}", left, right)
}

/// Capitalize the first letter of every alphabetic run, lowercase the rest
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_word = false;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if in_word {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(ch);
            in_word = false;
        }
    }
    out
}

/// One discovery configuration (Home Assistant abbreviated keys)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityConfig {
    pub name: String,
    pub uniq_id: String,
    #[serde(rename = "dev_cla", skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(rename = "stat_t")]
    pub state_topic: String,
    #[serde(rename = "val_tpl")]
    pub value_template: String,
    #[serde(rename = "~")]
    pub base_topic: String,
    #[serde(rename = "pl_avail")]
    pub payload_available: String,
    #[serde(rename = "pl_not_avail")]
    pub payload_not_available: String,
    #[serde(rename = "ic")]
    pub icon: String,
    #[serde(rename = "avty_t")]
    pub availability_topic: String,
    #[serde(rename = "json_attr_t", skip_serializing_if = "Option::is_none")]
    pub json_attributes_topic: Option<String>,
    #[serde(rename = "json_attr_tpl", skip_serializing_if = "Option::is_none")]
    pub json_attributes_template: Option<String>,
    #[serde(rename = "dev")]
    pub device: DeviceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceConfig {
    pub identifiers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
}

struct Entity {
    key: &'static str,
    title: &'static str,
    device_class: Option<&'static str>,
    unit: Option<&'static str>,
    field: &'static str,
    icon: &'static str,
    /// Owns the device record and exposes the whole payload as attributes
    primary: bool,
}

const ENTITIES: &[Entity] = &[
    Entity {
        key: "monitor",
        title: "RPi Monitor",
        device_class: Some("timestamp"),
        unit: None,
        field: "timestamp",
        icon: "mdi:raspberry-pi",
        primary: true,
    },
    Entity {
        key: "temperature",
        title: "RPi Temp",
        device_class: Some("temperature"),
        unit: Some("°C"),
        field: "temperature_c",
        icon: "mdi:thermometer",
        primary: false,
    },
    Entity {
        key: "disk_used",
        title: "RPi Used",
        device_class: None,
        unit: Some("%"),
        field: "root_fs_used_percent",
        icon: "mdi:sd",
        primary: false,
    },
];

/// Discovery topic and configuration for every entity, in announcement order
pub fn discovery_payloads(identity: &HostIdentity, topics: &Topics) -> Vec<(String, EntityConfig)> {
    ENTITIES
        .iter()
        .map(|entity| (topics.discovery(entity.key), entity_config(entity, identity, topics)))
        .collect()
}

fn entity_config(entity: &Entity, identity: &HostIdentity, topics: &Topics) -> EntityConfig {
    let values_rel = topics.values_relative();

    let device = if entity.primary {
        DeviceConfig {
            identifiers: vec![identity.unique_id.clone()],
            manufacturer: Some(MANUFACTURER.to_string()),
            name: Some(format!("RPi-{}", identity.fqdn)),
            model: Some(identity.model.clone()),
            sw_version: Some(format!("{} {}", identity.os_release, identity.kernel_version)),
        }
    } else {
        DeviceConfig {
            identifiers: vec![identity.unique_id.clone()],
            manufacturer: None,
            name: None,
            model: None,
            sw_version: None,
        }
    };

    EntityConfig {
        name: title_case(&format!("{} {}", entity.title, identity.hostname)),
        uniq_id: format!("{}_{}", identity.unique_id, entity.key),
        device_class: entity.device_class.map(str::to_string),
        unit_of_measurement: entity.unit.map(str::to_string),
        state_topic: values_rel.clone(),
        value_template: format!("{{{{ value_json.{}.{} }}}}", PAYLOAD_WRAPPER, entity.field),
        base_topic: topics.base.clone(),
        payload_available: ONLINE.to_string(),
        payload_not_available: OFFLINE.to_string(),
        icon: entity.icon.to_string(),
        availability_topic: topics.status_relative(),
        json_attributes_topic: entity.primary.then(|| values_rel.clone()),
        json_attributes_template: entity
            .primary
            .then(|| format!("{{{{ value_json.{} | tojson }}}}", PAYLOAD_WRAPPER)),
        device,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> HostIdentity {
        HostIdentity::from_parts(
            "pi3plus.home",
            "",
            "Raspberry Pi 3 Model B Plus Rev 1.3\0",
            "Raspbian GNU/Linux 10 (buster)",
            "5.10.103-v7+",
            "B8:27:EB:1A:F3:BC",
        )
    }

    fn topics() -> Topics {
        Topics::new("home/nodes", "rpi-pi3plus", "homeassistant")
    }

    #[test]
    fn test_split_fqdn() {
        assert_eq!(
            split_fqdn("pi3plus.home.lan\n", "ignored"),
            ("pi3plus".to_string(), "pi3plus.home.lan".to_string())
        );
        assert_eq!(
            split_fqdn("pi3plus", "home"),
            ("pi3plus".to_string(), "pi3plus.home".to_string())
        );
        assert_eq!(
            split_fqdn("pi3plus", ""),
            ("pi3plus".to_string(), "pi3plus".to_string())
        );
    }

    #[test]
    fn test_compact_model() {
        assert_eq!(
            compact_model("Raspberry Pi 3 Model B Plus Rev 1.3"),
            "RPi 3 Model B+r1.3"
        );
        assert_eq!(compact_model("Raspberry Pi Model B Rev 2"), "RPi 1 Model B r2");
        assert_eq!(compact_model("Raspberry Pi 4 Model B Rev 1.4"), "RPi 4 Model B r1.4");
    }

    #[test]
    fn test_connections_for_model() {
        assert_eq!(connections_for_model("RPi 3 Model A+r1.0"), "Ethernet, Wireless, Bluetooth");
        assert_eq!(connections_for_model("RPi 3 Model A r1.0"), "Wireless, Bluetooth");
        assert_eq!(connections_for_model("RPi 2 Model B r1.1"), "Ethernet");
        assert_eq!(connections_for_model("RPi 1 Model A r2"), "");
        assert_eq!(connections_for_model("RPi 1 Model B r2"), "Ethernet");
        assert_eq!(connections_for_model(""), "Ethernet, Wireless, Bluetooth");
    }

    #[test]
    fn test_unique_id_from_mac() {
        assert_eq!(unique_id("b8:27:eb:1a:f3:bc"), "RPi-b827ebMon1af3bc");
        assert_eq!(unique_id("B8:27:EB:1A:F3:BC"), "RPi-b827ebMon1af3bc");
        assert_eq!(unique_id(""), "RPi-Mon");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("RPi Monitor pi3plus"), "Rpi Monitor Pi3Plus");
        assert_eq!(title_case("rpi used my-pi"), "Rpi Used My-Pi");
    }

    #[test]
    fn test_identity_from_parts() {
        let id = identity();
        assert_eq!(id.hostname, "pi3plus");
        assert_eq!(id.fqdn, "pi3plus.home");
        assert_eq!(id.model, "RPi 3 Model B+r1.3");
        assert_eq!(id.connections, "Ethernet, Wireless, Bluetooth");
        assert_eq!(id.mac, "b8:27:eb:1a:f3:bc");
        assert_eq!(id.unique_id, "RPi-b827ebMon1af3bc");
    }

    #[test]
    fn test_payloads_in_fixed_order() {
        let payloads = discovery_payloads(&identity(), &topics());
        let topics: Vec<&str> = payloads.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(
            topics,
            vec![
                "homeassistant/sensor/rpi-pi3plus/monitor/config",
                "homeassistant/sensor/rpi-pi3plus/temperature/config",
                "homeassistant/sensor/rpi-pi3plus/disk_used/config",
            ]
        );
    }

    #[test]
    fn test_monitor_entity() {
        let payloads = discovery_payloads(&identity(), &topics());
        let value = serde_json::to_value(&payloads[0].1).unwrap();

        assert_eq!(value["name"], "Rpi Monitor Pi3Plus");
        assert_eq!(value["uniq_id"], "RPi-b827ebMon1af3bc_monitor");
        assert_eq!(value["dev_cla"], "timestamp");
        assert_eq!(value["stat_t"], "~/monitor");
        assert_eq!(value["val_tpl"], "{{ value_json.info.timestamp }}");
        assert_eq!(value["~"], "home/nodes/sensor/rpi-pi3plus");
        assert_eq!(value["avty_t"], "~/status");
        assert_eq!(value["pl_avail"], "online");
        assert_eq!(value["pl_not_avail"], "offline");
        assert_eq!(value["json_attr_t"], "~/monitor");
        assert_eq!(value["json_attr_tpl"], "{{ value_json.info | tojson }}");
        assert_eq!(value["dev"]["name"], "RPi-pi3plus.home");
        assert_eq!(value["dev"]["manufacturer"], "Raspberry Pi (Trading) Ltd.");
        assert_eq!(
            value["dev"]["sw_version"],
            "Raspbian GNU/Linux 10 (buster) 5.10.103-v7+"
        );
        assert!(value.get("unit_of_measurement").is_none());
    }

    #[test]
    fn test_secondary_entities_reference_published_fields() {
        let payloads = discovery_payloads(&identity(), &topics());

        let temp = serde_json::to_value(&payloads[1].1).unwrap();
        assert_eq!(temp["val_tpl"], "{{ value_json.info.temperature_c }}");
        assert_eq!(temp["unit_of_measurement"], "°C");
        assert!(temp.get("json_attr_t").is_none());
        assert_eq!(temp["dev"].as_object().unwrap().len(), 1);

        let disk = serde_json::to_value(&payloads[2].1).unwrap();
        assert_eq!(disk["val_tpl"], "{{ value_json.info.root_fs_used_percent }}");
        assert!(disk.get("dev_cla").is_none());
        assert_eq!(disk["ic"], "mdi:sd");
    }

    #[test]
    fn test_payloads_are_deterministic() {
        let render = || {
            discovery_payloads(&identity(), &topics())
                .iter()
                .map(|(_, config)| serde_json::to_vec(config).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(render(), render());
    }

    #[test]
    fn test_key_order_follows_hub_convention() {
        let payloads = discovery_payloads(&identity(), &topics());
        let json = serde_json::to_string(&payloads[0].1).unwrap();
        let name = json.find("\"name\"").unwrap();
        let uniq = json.find("\"uniq_id\"").unwrap();
        let dev = json.find("\"dev\"").unwrap();
        assert!(name < uniq && uniq < dev);
    }
}
