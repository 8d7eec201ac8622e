//! Dialing abstraction.
//!
//! Production dials TCP through [`TcpConnector`]; simulation supplies its
//! own connector over a virtual network.

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async_with_config,
    tungstenite::protocol::WebSocketConfig,
};

use crate::error::ClientError;

/// Opens WebSocket connections to a server.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Underlying byte stream
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Dial `url` and complete the WebSocket handshake.
    async fn connect(
        &self,
        url: &str,
        config: WebSocketConfig,
    ) -> Result<WebSocketStream<Self::Stream>, ClientError>;
}

/// Dials over the host network.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Stream = MaybeTlsStream<TcpStream>;

    async fn connect(
        &self,
        url: &str,
        config: WebSocketConfig,
    ) -> Result<WebSocketStream<Self::Stream>, ClientError> {
        let (ws, response) = connect_async_with_config(url, Some(config), true).await?;
        tracing::debug!(url, status = %response.status(), "websocket handshake complete");
        Ok(ws)
    }
}
