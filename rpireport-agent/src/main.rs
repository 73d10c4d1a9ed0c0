//! rpireport agent - reports Raspberry Pi host state to Home Assistant over MQTT
//!
//! Exit status: 0 on signal or when disabled in the configuration, 1 on any
//! startup failure (configuration, broker connection, discovery) and when the
//! broker connection fails later on.

use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rpireport_agent::config::default_config_dir;
use rpireport_agent::daemon;
use rpireport_agent::transport::{MqttTransport, Transport};
use rpireport_agent::{AgentConfig, RunOptions, REPORTER};

/// Raspberry Pi MQTT reporter daemon
#[derive(Parser, Debug)]
#[command(name = "rpireport-agent", version)]
#[command(about = "Publish Raspberry Pi host state to an MQTT broker", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// TEST: report only the first time
    #[arg(short, long)]
    stall: bool,

    /// Directory containing config.toml
    #[arg(short, long)]
    config_dir: Option<PathBuf>,
}

impl Cli {
    fn default_filter(&self) -> &'static str {
        if self.debug {
            "rpireport_agent=debug,rumqttc=info"
        } else if self.verbose {
            "rpireport_agent=info"
        } else {
            "rpireport_agent=warn"
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.default_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Handlers go in before anything can block on the broker
    let shutdown = match shutdown_signal() {
        Ok(shutdown) => shutdown,
        Err(e) => {
            error!("Failed to install signal handlers: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Banner goes out regardless of the log level
    eprintln!("{}", REPORTER);
    eprintln!("RPi Reporter MQTT daemon, publishing to Home Assistant discovery");
    if cli.stall {
        info!("TEST: Stall (no-re-reporting) enabled");
    }

    let options = RunOptions {
        config_dir: cli.config_dir.clone().unwrap_or_else(default_config_dir),
        stall: cli.stall,
    };
    let make_transport = |config: &AgentConfig| -> Arc<dyn Transport> {
        let client_id = format!("rpireport-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        Arc::new(MqttTransport::new(config.mqtt_settings(client_id)))
    };

    match daemon::run(options, make_transport, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Registers SIGINT and SIGTERM now; the future resolves on the first of them
#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Received SIGINT"),
            _ = terminate.recv() => info!("Received SIGTERM"),
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C");
    })
}
