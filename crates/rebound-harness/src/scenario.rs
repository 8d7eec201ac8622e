//! Reusable simulated actors.
//!
//! [`ServerHost`] installs a Rebound server on a turmoil host. Each start of
//! the host (including every [`turmoil::Sim::bounce`]) draws its session from
//! the next seed, so restarts announce fresh, predictable sessions.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use rebound_client::{ClientConfig, ClientHandle, ReconnectingClient};
use rebound_core::{ClientEvent, SessionId};
use rebound_server::{Server, ServerConfig};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{SimConnector, SimEnv, SimListener};

/// Host name of the simulated server.
pub const SERVER_HOST: &str = "server";

/// Port the simulated server listens on.
pub const PORT: u16 = 3000;

/// Endpoint clients dial.
pub fn server_url() -> String {
    format!("ws://{SERVER_HOST}:{PORT}/")
}

/// Session a server started from `seed` announces.
pub fn session_for_seed(seed: u64) -> String {
    SessionId::generate(&SimEnv::with_seed(seed)).to_string()
}

/// Counters shared between a server host and the test body.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    starts: Arc<AtomicU64>,
    stops: Arc<AtomicU64>,
    notified: Arc<AtomicUsize>,
}

impl ServerStats {
    /// Times the host software started.
    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }

    /// Times a server run completed its shutdown.
    pub fn stops(&self) -> u64 {
        self.stops.load(Ordering::SeqCst)
    }

    /// Connections notified across all completed shutdowns.
    pub fn connections_notified(&self) -> usize {
        self.notified.load(Ordering::SeqCst)
    }
}

/// Builder for a simulated server host.
#[derive(Debug, Clone)]
pub struct ServerHost {
    config: ServerConfig,
    uptime: Option<Duration>,
    first_seed: u64,
}

impl ServerHost {
    /// Server with `config`, running until the host is crashed.
    pub fn new(config: ServerConfig) -> Self {
        Self { config, uptime: None, first_seed: 0 }
    }

    /// Shut down gracefully after `uptime` on every start.
    #[must_use]
    pub fn uptime(mut self, uptime: Duration) -> Self {
        self.uptime = Some(uptime);
        self
    }

    /// Seed of the first start; later starts count up from it.
    #[must_use]
    pub fn first_seed(mut self, seed: u64) -> Self {
        self.first_seed = seed;
        self
    }

    /// Register the host with `sim`.
    pub fn install(self, sim: &mut turmoil::Sim<'_>) -> ServerStats {
        let stats = ServerStats::default();
        let host_stats = stats.clone();

        sim.host(SERVER_HOST, move || {
            let stats = host_stats.clone();
            let config = self.config.clone();
            let uptime = self.uptime;
            let seed = self.first_seed + stats.starts.fetch_add(1, Ordering::SeqCst);

            async move {
                let listener = SimListener::bind(&format!("0.0.0.0:{PORT}")).await?;
                let server = Server::new(config, SimEnv::with_seed(seed), listener)?;
                tracing::info!(seed, server_id = %server.session(), "simulated server starting");

                let shutdown = CancellationToken::new();
                if let Some(uptime) = uptime {
                    let token = shutdown.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(uptime).await;
                        token.cancel();
                    });
                }

                let report = server.run(shutdown).await?;
                stats.notified.fetch_add(report.connections_notified, Ordering::SeqCst);
                stats.stops.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        stats
    }
}

/// Client config for simulation: dials [`server_url`] with `reconnect_delay`.
pub fn client_config(reconnect_delay: Duration) -> ClientConfig {
    ClientConfig { reconnect_delay, ..ClientConfig::new(server_url()) }
}

/// Start a client over the simulated network.
pub fn start_client(
    config: ClientConfig,
    seed: u64,
) -> (ClientHandle, mpsc::UnboundedReceiver<ClientEvent>, JoinHandle<()>) {
    ReconnectingClient::new(config, SimConnector, SimEnv::with_seed(seed)).start()
}

/// Next event within `within` of simulated time.
///
/// `None` if nothing surfaced in time or the client stopped.
pub async fn next_event(
    events: &mut mpsc::UnboundedReceiver<ClientEvent>,
    within: Duration,
) -> Option<ClientEvent> {
    tokio::time::timeout(within, events.recv()).await.ok().flatten()
}
