//! Rebound server binary.

use std::{
    net::{IpAddr, SocketAddr},
    process::ExitCode,
    time::Duration,
};

use clap::Parser;
use rebound_core::{ChaosConfig, SystemEnv};
use rebound_server::{Server, ServerConfig, ServerError, ShutdownReason, ShutdownTrigger, wait_for_signal};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rebound-server", version, about = "WebSocket echo server with session tracking and chaos injection")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// Request path of the WebSocket endpoint
    #[arg(long, default_value = "/")]
    path: String,

    /// Largest accepted message in bytes
    #[arg(long, default_value_t = 1_048_576)]
    max_message_size: usize,

    /// Enable chaos injection
    #[arg(long)]
    chaos: bool,

    /// Chance per timer period that a connection is force-closed
    #[arg(long, default_value_t = 0.1)]
    disconnect_probability: f64,

    /// Chance per message that it fails with a simulated fault
    #[arg(long, default_value_t = 0.1)]
    error_probability: f64,

    /// Upper bound of the per-message chaos delay, in milliseconds
    #[arg(long, default_value_t = 2000)]
    max_latency_ms: u64,

    /// Period of the chaos disconnect timer, in milliseconds
    #[arg(long, default_value_t = 5000)]
    disconnect_interval_ms: u64,

    /// Seconds allowed for the whole shutdown sequence
    #[arg(long, default_value_t = 10)]
    shutdown_timeout_secs: u64,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind: SocketAddr::new(self.host, self.port),
            path: self.path,
            max_message_size: self.max_message_size,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            chaos: ChaosConfig {
                enabled: self.chaos,
                random_disconnect_probability: self.disconnect_probability,
                error_probability: self.error_probability,
                max_latency: Duration::from_millis(self.max_latency_ms),
                disconnect_interval: Duration::from_millis(self.disconnect_interval_ms),
            },
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let trigger = ShutdownTrigger::new();
    trigger.install_panic_hook();

    match run(args.into_config(), trigger.clone()).await {
        Ok(()) if !trigger.failed() => ExitCode::SUCCESS,
        Ok(()) => ExitCode::FAILURE,
        Err(error) => {
            error!(%error, "server failed");
            ExitCode::FAILURE
        },
    }
}

async fn run(config: ServerConfig, trigger: ShutdownTrigger) -> Result<(), ServerError> {
    config.validate()?;
    let listener = TcpListener::bind(config.bind)
        .await
        .map_err(|source| ServerError::Bind { addr: config.bind, source })?;
    let shutdown_timeout = config.shutdown_timeout;
    let server = Server::new(config, SystemEnv, listener)?;

    let signals = trigger.clone();
    tokio::spawn(async move {
        loop {
            match wait_for_signal().await {
                Ok(signal) => {
                    signals.trigger(ShutdownReason::Signal(signal));
                },
                Err(error) => {
                    signals.trigger(ShutdownReason::Fault(format!("signal handler: {error}")));
                    break;
                },
            }
        }
    });

    let token = trigger.token();
    let mut task = tokio::spawn(server.run(trigger.token()));

    let finished = tokio::select! {
        finished = &mut task => finished,
        () = token.cancelled() => {
            match tokio::time::timeout(shutdown_timeout, &mut task).await {
                Ok(finished) => finished,
                Err(_) => {
                    trigger.trigger(ShutdownReason::Fault("shutdown timed out".into()));
                    error!(?shutdown_timeout, "shutdown did not finish in time");
                    return Ok(());
                },
            }
        },
    };

    match finished {
        Ok(Ok(report)) => {
            info!(server_id = %report.session, connections = report.connections_notified, "shutdown complete");
            Ok(())
        },
        Ok(Err(error)) => {
            trigger.trigger(ShutdownReason::Fault(error.to_string()));
            Err(error)
        },
        Err(join_error) => {
            trigger.trigger(ShutdownReason::Fault(format!("server task: {join_error}")));
            Ok(())
        },
    }
}
