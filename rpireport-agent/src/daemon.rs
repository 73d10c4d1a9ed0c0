//! Daemon startup: configuration, identity, transport, agent
//!
//! The transport is built through a factory that only runs once the
//! configuration has been accepted, so a rejected configuration never
//! reaches the broker.

use anyhow::{Context, Result};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::agent::{Agent, AgentError};
use crate::config::AgentConfig;
use crate::discovery::HostIdentity;
use crate::metrics::HostMetrics;
use crate::notify;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config_dir: PathBuf,
    /// Report on cycle 0 only
    pub stall: bool,
}

/// Runs the reporter until `shutdown` resolves.
///
/// `Ok` when stopped by `shutdown` or disabled in the configuration; any
/// configuration, connection or discovery failure is an `Err`.
pub async fn run<F, S>(options: RunOptions, make_transport: F, shutdown: S) -> Result<()>
where
    F: FnOnce(&AgentConfig) -> Arc<dyn Transport>,
    S: Future<Output = ()>,
{
    info!("Using configuration directory {}", options.config_dir.display());
    let config = match AgentConfig::load(&options.config_dir).await {
        Ok(config) => config,
        Err(e) => {
            notify::status(&format!("Configuration rejected: {}", e));
            return Err(e).context("Failed to load configuration");
        }
    };

    if !config.daemon.enabled {
        info!("Daemon disabled in configuration, exiting");
        return Ok(());
    }
    info!("Configuration accepted");
    notify::status("Configuration accepted");
    debug!("Configuration: {:?}", config.daemon);

    let identity = HostIdentity::resolve(&config.daemon.fallback_domain).await;
    let topics = config.topics(&identity.hostname);
    let transport = make_transport(&config);
    let metrics = Arc::new(
        HostMetrics::new(identity.clone(), config.daemon.update_flag_filespec.clone()).await,
    );

    let agent = Agent::new(
        identity,
        topics,
        config.report_settings(options.stall),
        transport,
        metrics,
    );

    if let Err(e) = agent.run_until(shutdown).await {
        if matches!(e, AgentError::Connect(_)) {
            notify::status("MQTT connection error, please check your settings");
        }
        return Err(e).context("Reporter stopped");
    }

    info!("Reporter stopped");
    Ok(())
}
