//! Configuration loading and validation
//!
//! Handles:
//! - `config.toml` with `[daemon]` and `[mqtt]` sections
//! - `MQTT_*` environment overrides for broker access
//! - Validation before anything connects

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::scheduler::report::{ReportSettings, MAX_INTERVAL_MINUTES, MIN_INTERVAL_MINUTES};
use crate::topics::Topics;
use crate::transport::{MqttSettings, TlsSettings};
use crate::REPORTER;

pub const CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_SENSOR_NAME: &str = "rpi-reporter";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("failed to read {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("interval_in_minutes = {0} is outside 2..=30")]
    Interval(u32),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub daemon: DaemonConfig,
    pub mqtt: MqttConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub enabled: bool,
    pub interval_in_minutes: u32,
    /// Appended to the hostname when `hostname -f` has no domain
    pub fallback_domain: String,
    /// File touched by the user's update script, used for `last_update`
    pub update_flag_filespec: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_in_minutes: 5,
            fallback_domain: String::new(),
            update_flag_filespec: Some(PathBuf::from("/home/pi/bin/lastupd.date")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub hostname: String,
    pub port: u16,
    /// Seconds
    pub keepalive: u16,
    pub username: String,
    pub password: String,
    pub base_topic: String,
    pub sensor_name: String,
    pub discovery_prefix: String,
    pub tls: bool,
    pub tls_ca_cert: Option<PathBuf>,
    pub tls_keyfile: Option<PathBuf>,
    pub tls_certfile: Option<PathBuf>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 1883,
            keepalive: 60,
            username: String::new(),
            password: String::new(),
            base_topic: "home/nodes".to_string(),
            sensor_name: DEFAULT_SENSOR_NAME.to_string(),
            discovery_prefix: "homeassistant".to_string(),
            tls: false,
            tls_ca_cert: None,
            tls_keyfile: None,
            tls_certfile: None,
        }
    }
}

impl AgentConfig {
    /// Load `config.toml` from `config_dir`, applying environment overrides
    pub async fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(CONFIG_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::Missing(path))
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        Self::parse(&content, |key| std::env::var(key).ok())
    }

    /// Parse, override from `lookup`, normalize and validate
    pub fn parse<F>(content: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: AgentConfig = toml::from_str(content)?;
        config.apply_env(lookup)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MQTT_HOSTNAME") {
            self.mqtt.hostname = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.mqtt.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Validation(format!("MQTT_PORT={} is not a port", port)))?;
        }
        if let Some(username) = lookup("MQTT_USERNAME") {
            self.mqtt.username = username;
        }
        if let Some(password) = lookup("MQTT_PASSWORD") {
            self.mqtt.password = password;
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.mqtt.base_topic = self.mqtt.base_topic.trim().to_lowercase();
        self.mqtt.sensor_name = self.mqtt.sensor_name.trim().to_lowercase();
        self.mqtt.discovery_prefix = self.mqtt.discovery_prefix.trim().to_lowercase();
        self.daemon.fallback_domain = self.daemon.fallback_domain.trim().to_string();
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let interval = self.daemon.interval_in_minutes;
        if !(MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&interval) {
            return Err(ConfigError::Interval(interval));
        }

        let mqtt = &self.mqtt;
        if mqtt.hostname.trim().is_empty() {
            return Err(ConfigError::Validation("mqtt.hostname is empty".into()));
        }
        if mqtt.port == 0 {
            return Err(ConfigError::Validation("mqtt.port must be non-zero".into()));
        }
        if mqtt.keepalive < 5 {
            return Err(ConfigError::Validation(format!(
                "mqtt.keepalive = {} is below 5 seconds",
                mqtt.keepalive
            )));
        }
        for (key, value) in [
            ("mqtt.base_topic", &mqtt.base_topic),
            ("mqtt.sensor_name", &mqtt.sensor_name),
            ("mqtt.discovery_prefix", &mqtt.discovery_prefix),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Validation(format!("{} is empty", key)));
            }
        }
        if mqtt.tls && mqtt.tls_certfile.is_some() != mqtt.tls_keyfile.is_some() {
            return Err(ConfigError::Validation(
                "mqtt.tls_certfile and mqtt.tls_keyfile must be given together".into(),
            ));
        }
        Ok(())
    }

    /// Device segment of every topic; the default name becomes `rpi-<hostname>`
    pub fn sensor_name(&self, hostname: &str) -> String {
        if self.mqtt.sensor_name == DEFAULT_SENSOR_NAME {
            format!("rpi-{}", hostname).to_lowercase()
        } else {
            self.mqtt.sensor_name.clone()
        }
    }

    pub fn topics(&self, hostname: &str) -> Topics {
        Topics::new(
            &self.mqtt.base_topic,
            &self.sensor_name(hostname),
            &self.mqtt.discovery_prefix,
        )
    }

    pub fn report_settings(&self, stall: bool) -> ReportSettings {
        ReportSettings {
            interval_minutes: self.daemon.interval_in_minutes,
            stall,
            reporter: REPORTER.to_string(),
        }
    }

    pub fn mqtt_settings(&self, client_id: impl Into<String>) -> MqttSettings {
        let credentials = (!self.mqtt.username.is_empty())
            .then(|| (self.mqtt.username.clone(), self.mqtt.password.clone()));
        let tls = self.mqtt.tls.then(|| TlsSettings {
            ca_cert: self.mqtt.tls_ca_cert.clone(),
            certfile: self.mqtt.tls_certfile.clone(),
            keyfile: self.mqtt.tls_keyfile.clone(),
        });

        MqttSettings {
            client_id: client_id.into(),
            host: self.mqtt.hostname.clone(),
            port: self.mqtt.port,
            keep_alive: Duration::from_secs(u64::from(self.mqtt.keepalive)),
            credentials,
            tls,
        }
    }
}

/// `<config dir>/rpireport`, or the working directory when the platform has none
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("rpireport"))
        .unwrap_or_else(|| PathBuf::from("."))
}
