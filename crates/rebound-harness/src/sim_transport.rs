//! Turmoil-backed listener and connector.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use rebound_client::{ClientError, Connector};
use rebound_core::Listener;
use tokio_tungstenite::{
    WebSocketStream, client_async_with_config,
    tungstenite::{client::IntoClientRequest, protocol::WebSocketConfig},
};
use turmoil::net::{TcpListener, TcpStream};

/// Server-side listener on the simulated network.
pub struct SimListener(TcpListener);

impl SimListener {
    /// Bind on the current simulated host, e.g. `"0.0.0.0:3000"`.
    pub async fn bind(addr: &str) -> io::Result<Self> {
        TcpListener::bind(addr).await.map(Self)
    }
}

#[async_trait]
impl Listener for SimListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.0.accept().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.local_addr()
    }
}

/// Dials over the simulated network. Host names resolve through turmoil.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimConnector;

#[async_trait]
impl Connector for SimConnector {
    type Stream = TcpStream;

    async fn connect(
        &self,
        url: &str,
        config: WebSocketConfig,
    ) -> Result<WebSocketStream<TcpStream>, ClientError> {
        let request = url.into_client_request()?;
        let host = request
            .uri()
            .host()
            .ok_or_else(|| ClientError::Connect(format!("no host in {url}")))?
            .to_string();
        let port = request.uri().port_u16().unwrap_or(80);

        let target = format!("{host}:{port}");
        let stream = TcpStream::connect(target.as_str())
            .await
            .map_err(|error| ClientError::Connect(format!("{target}: {error}")))?;
        let (ws, _response) = client_async_with_config(request, stream, Some(config)).await?;
        Ok(ws)
    }
}
