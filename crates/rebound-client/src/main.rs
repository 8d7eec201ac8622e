//! Rebound client binary.
//!
//! Reads lines from stdin and logs every event the client surfaces.

use std::{process::ExitCode, time::Duration};

use clap::Parser;
use rebound_client::{
    ClientConfig, ClientError, ClientHandle, ReconnectingClient, TcpConnector,
    commands::{self, Command},
};
use rebound_core::{ClientEvent, SystemEnv};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rebound-client", version, about = "Reconnecting client for the Rebound server")]
struct Args {
    /// Server endpoint
    #[arg(long, default_value = "ws://localhost:3000/")]
    url: String,

    /// Delay between reconnect attempts, in milliseconds
    #[arg(long, default_value_t = 3000)]
    reconnect_delay_ms: u64,

    /// Keep connections that announce the previous session again
    #[arg(long)]
    allow_duplicate_sessions: bool,

    /// Largest accepted message in bytes
    #[arg(long, default_value_t = 1_048_576)]
    max_message_size: usize,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> ClientConfig {
        ClientConfig {
            url: self.url,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            suppress_duplicate_sessions: !self.allow_duplicate_sessions,
            max_message_size: self.max_message_size,
            ..ClientConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let client = ReconnectingClient::new(args.into_config(), TcpConnector, SystemEnv);
    let (handle, mut events, task) = client.start();

    let logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => break,
        };

        match line {
            Ok(Some(line)) => {
                if !dispatch(&handle, &line).await {
                    break;
                }
            },
            Ok(None) => break,
            Err(error) => {
                error!(%error, "failed to read stdin");
                break;
            },
        }
    }

    handle.teardown();
    let stopped = task.await;
    let _ = logger.await;

    match stopped {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "client task failed");
            ExitCode::FAILURE
        },
    }
}

/// Run one input line. Returns false when the user asked to quit.
async fn dispatch(handle: &ClientHandle, line: &str) -> bool {
    match commands::parse(line) {
        Command::Quit => return false,
        Command::Help => info!("\n{}", commands::HELP),
        Command::Reconnect => {
            if let Err(error) = handle.reconnect() {
                warn!(%error, "reconnect failed");
            }
        },
        Command::Message { content } if content.is_empty() => {},
        Command::Message { content } => match handle.send(content).await {
            Ok(()) => {},
            Err(ClientError::NotConnected) => warn!("not connected, message dropped"),
            Err(error) => warn!(%error, "send failed"),
        },
        Command::Unknown { input } => warn!(input = %input, "unknown command, try /help"),
    }
    true
}

fn log_event(event: &ClientEvent) {
    match event {
        ClientEvent::SessionStarted { server_id } => info!(server_id = %server_id, "connected to new server session"),
        ClientEvent::SessionResumed { server_id } => info!(server_id = %server_id, "reconnected to same server session"),
        ClientEvent::Response { content, .. } => info!(content = %content, "response"),
        ClientEvent::Error { content } => warn!(content = %content, "server error"),
        ClientEvent::Notice { kind, content } => warn!(%kind, content = %content, "server notice"),
        ClientEvent::Unrecognized { frame } => warn!(?frame, "unrecognized frame"),
        ClientEvent::Disconnected { reason } => warn!(?reason, "disconnected"),
    }
}
