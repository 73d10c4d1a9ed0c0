//! MQTT topic layout shared by the status, values and discovery publishes

/// Availability payloads on the status topic
pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

/// Leaf of the values topic (`values` collides with Home Assistant templates)
pub const VALUES_LEAF: &str = "monitor";

/// Wrapper field holding the metrics record in every values payload
pub const PAYLOAD_WRAPPER: &str = "info";

/// Topics of one reporting device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// Device segment, e.g. `rpi-pi3plus`
    pub device: String,
    /// `<base_topic>/sensor/<device>`, published as `~` in discovery payloads
    pub base: String,
    /// Last will, online marker and heartbeat
    pub status: String,
    /// One JSON report per cycle
    pub values: String,
    pub discovery_prefix: String,
}

impl Topics {
    pub fn new(base_topic: &str, device: &str, discovery_prefix: &str) -> Self {
        let device = device.to_lowercase();
        let base = format!("{}/sensor/{}", base_topic.to_lowercase(), device);

        Self {
            status: format!("{}/status", base),
            values: format!("{}/{}", base, VALUES_LEAF),
            discovery_prefix: discovery_prefix.to_lowercase(),
            device,
            base,
        }
    }

    /// Discovery config topic for one entity
    pub fn discovery(&self, entity: &str) -> String {
        format!("{}/sensor/{}/{}/config", self.discovery_prefix, self.device, entity)
    }

    /// Values topic relative to `~`
    pub fn values_relative(&self) -> String {
        format!("~/{}", VALUES_LEAF)
    }

    /// Status topic relative to `~`
    pub fn status_relative(&self) -> String {
        "~/status".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_layout() {
        let topics = Topics::new("Home/Nodes", "RPi-Pi3Plus", "HomeAssistant");
        assert_eq!(topics.base, "home/nodes/sensor/rpi-pi3plus");
        assert_eq!(topics.status, "home/nodes/sensor/rpi-pi3plus/status");
        assert_eq!(topics.values, "home/nodes/sensor/rpi-pi3plus/monitor");
        assert_eq!(
            topics.discovery("disk_used"),
            "homeassistant/sensor/rpi-pi3plus/disk_used/config"
        );
    }

    #[test]
    fn test_relative_topics() {
        let topics = Topics::new("home/nodes", "rpi-x", "homeassistant");
        assert_eq!(topics.values_relative(), "~/monitor");
        assert_eq!(topics.status_relative(), "~/status");
    }
}
