//! rpireport agent - single-board computer reporter
//!
//! Publishes host state to an MQTT broker for Home Assistant:
//! - One-time MQTT discovery announcement (retained)
//! - Report cycle at startup, then every configured interval
//! - 60s liveness heartbeat, offline marker through the last will
//! - Fail-fast broker connection (the init system restarts us), with
//!   systemd readiness and status notifications

pub mod agent;
pub mod config;
pub mod connection;
pub mod daemon;
pub mod discovery;
pub mod metrics;
pub mod network;
pub mod notify;
pub mod publisher;
pub mod scheduler;
pub mod topics;
pub mod transport;

pub use agent::{Agent, AgentError, RunningAgent};
pub use config::{AgentConfig, ConfigError};
pub use connection::{ConnectError, ConnectionSupervisor};
pub use daemon::RunOptions;
pub use discovery::HostIdentity;
pub use metrics::{MetricsProvider, MetricsSnapshot};
pub use publisher::{PublishError, Publisher};
pub use scheduler::heartbeat::HeartbeatScheduler;
pub use scheduler::report::{ReportScheduler, ReportSettings};
pub use scheduler::CadenceState;
pub use topics::Topics;
pub use transport::{ConnectionState, Transport, TransportError, WillMessage};

/// Reporter name published with every report
pub const REPORTER: &str = concat!("rpireport-agent v", env!("CARGO_PKG_VERSION"));
