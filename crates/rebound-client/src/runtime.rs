//! Reconnecting client runtime.
//!
//! [`ReconnectingClient`] owns the [`ClientConnection`] state machine and
//! executes its actions: dials go through the [`Connector`], reconnect
//! delays are cancellable sleeps from the [`Environment`], and surfaced
//! events are forwarded to the caller's channel. Callers interact through a
//! cloneable [`ClientHandle`].

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures_util::{SinkExt, StreamExt};
use rebound_core::{ClientAction, ClientConnection, ClientEvent, Environment};
use rebound_proto::Frame;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{
        self, Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{config::ClientConfig, connector::Connector, error::ClientError};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

#[derive(Debug)]
enum ClientCommand {
    Send { content: String, reply: oneshot::Sender<Result<(), ClientError>> },
    Reconnect,
}

/// Cloneable control surface of a running client.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<ClientCommand>,
    connected: Arc<AtomicBool>,
    stop: CancellationToken,
}

impl ClientHandle {
    /// Send a `message` frame on the current connection.
    ///
    /// Fails with [`ClientError::NotConnected`] while no surfaced connection
    /// is open; nothing is queued for later.
    pub async fn send(&self, content: impl Into<String>) -> Result<(), ClientError> {
        if self.stop.is_cancelled() {
            return Err(ClientError::Stopped);
        }
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let (reply, done) = oneshot::channel();
        self.commands
            .send(ClientCommand::Send { content: content.into(), reply })
            .map_err(|_| ClientError::Stopped)?;
        done.await.map_err(|_| ClientError::Stopped)?
    }

    /// Dial now instead of waiting for the reconnect delay.
    ///
    /// Ignored while an attempt is in flight or a connection is open.
    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.commands.send(ClientCommand::Reconnect).map_err(|_| ClientError::Stopped)
    }

    /// Close the connection and stop reconnecting. Idempotent.
    pub fn teardown(&self) {
        self.stop.cancel();
    }

    /// Whether a surfaced connection is open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Whether [`Self::teardown`] was called.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

/// Client runtime, generic over dialing and environment.
pub struct ReconnectingClient<C: Connector, E: Environment> {
    config: ClientConfig,
    connector: Arc<C>,
    env: E,
}

impl<C: Connector, E: Environment> ReconnectingClient<C, E> {
    /// Build a client. Nothing is dialed until [`Self::start`].
    pub fn new(config: ClientConfig, connector: C, env: E) -> Self {
        Self { config, connector: Arc::new(connector), env }
    }

    /// Spawn the runtime and dial the first connection.
    ///
    /// The event channel closes once the client is torn down and its last
    /// connection has closed.
    pub fn start(self) -> (ClientHandle, mpsc::UnboundedReceiver<ClientEvent>, JoinHandle<()>) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let stop = CancellationToken::new();

        let handle =
            ClientHandle { commands: commands_tx, connected: Arc::clone(&connected), stop: stop.clone() };

        let driver = Driver {
            conn: ClientConnection::new(self.config.reconnect()),
            config: self.config,
            connector: self.connector,
            env: self.env,
            commands,
            commands_open: true,
            events,
            connected,
            stop,
            link: None,
            close_reason: None,
            dial: None,
            reconnect: None,
            close_deadline: None,
        };
        let task = tokio::spawn(driver.run());
        (handle, events_rx, task)
    }
}

struct Driver<C: Connector, E: Environment> {
    conn: ClientConnection,
    config: ClientConfig,
    connector: Arc<C>,
    env: E,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    commands_open: bool,
    events: mpsc::UnboundedSender<ClientEvent>,
    connected: Arc<AtomicBool>,
    stop: CancellationToken,
    link: Option<WebSocketStream<C::Stream>>,
    close_reason: Option<String>,
    dial: Option<BoxFuture<Result<WebSocketStream<C::Stream>, ClientError>>>,
    reconnect: Option<BoxFuture<()>>,
    close_deadline: Option<BoxFuture<()>>,
}

impl<C: Connector, E: Environment> Driver<C, E> {
    async fn run(mut self) {
        let mut actions = self.conn.connect();

        loop {
            self.execute(actions).await;
            if self.conn.is_torn_down() && self.link.is_none() && self.dial.is_none() {
                break;
            }

            actions = tokio::select! {
                biased;

                () = self.stop.cancelled(), if !self.conn.is_torn_down() => {
                    info!("client teardown");
                    self.conn.teardown()
                },

                command = self.commands.recv(), if self.commands_open => match command {
                    Some(command) => self.on_command(command).await,
                    None => {
                        // Every handle dropped
                        self.commands_open = false;
                        self.conn.teardown()
                    },
                },

                result = poll_slot(&mut self.dial) => {
                    self.dial = None;
                    self.on_dial(result)
                },

                () = poll_slot(&mut self.reconnect) => {
                    self.reconnect = None;
                    self.conn.reconnect_due()
                },

                () = poll_slot(&mut self.close_deadline) => {
                    self.close_deadline = None;
                    debug!("server did not finish the close handshake");
                    self.drop_link();
                    self.conn.transport_closed(self.close_reason.take())
                },

                message = next_message(&mut self.link) => self.on_message(message),
            };
        }

        self.connected.store(false, Ordering::Release);
        debug!(attempts = self.conn.attempts(), "client stopped");
    }

    async fn execute(&mut self, actions: Vec<ClientAction>) {
        for action in actions {
            match action {
                ClientAction::Dial => {
                    self.reconnect = None;
                    let connector = Arc::clone(&self.connector);
                    let url = self.config.url.clone();
                    let ws_config = self.config.websocket_config();
                    info!(url = %url, attempt = self.conn.attempts(), "connecting");
                    self.dial = Some(Box::pin(async move { connector.connect(&url, ws_config).await }));
                },
                ClientAction::Close { code, reason } => self.close_link(code, reason).await,
                ClientAction::ScheduleReconnect { after } => {
                    let env = self.env.clone();
                    debug!(?after, "reconnect scheduled");
                    self.reconnect = Some(Box::pin(async move { env.sleep(after).await }));
                },
                ClientAction::CancelReconnect => {
                    self.reconnect = None;
                    if self.conn.is_torn_down() {
                        self.dial = None;
                    }
                },
                ClientAction::Surface(event) => self.surface(event),
            }
        }
    }

    fn surface(&mut self, event: ClientEvent) {
        match &event {
            ClientEvent::SessionStarted { .. } | ClientEvent::SessionResumed { .. } => {
                self.connected.store(true, Ordering::Release);
            },
            ClientEvent::Disconnected { .. } => self.connected.store(false, Ordering::Release),
            _ => {},
        }
        debug!(?event, "surfacing event");
        // Receiver may be gone; the client keeps its lifecycle regardless
        let _ = self.events.send(event);
    }

    async fn on_command(&mut self, command: ClientCommand) -> Vec<ClientAction> {
        match command {
            ClientCommand::Send { content, reply } => {
                let result = self.send_message(content).await;
                let _ = reply.send(result);
                Vec::new()
            },
            ClientCommand::Reconnect => {
                debug!("manual reconnect requested");
                self.conn.connect()
            },
        }
    }

    async fn send_message(&mut self, content: String) -> Result<(), ClientError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(ClientError::NotConnected);
        }
        let Some(ws) = self.link.as_mut() else {
            return Err(ClientError::NotConnected);
        };

        let bytes = Frame::message(content).to_bytes()?;
        ws.send(Message::Binary(bytes)).await?;
        Ok(())
    }

    fn on_dial(&mut self, result: Result<WebSocketStream<C::Stream>, ClientError>) -> Vec<ClientAction> {
        match result {
            Ok(ws) => match self.conn.handshake_complete() {
                Ok(actions) => {
                    debug!("transport open");
                    self.close_reason = None;
                    self.link = Some(ws);
                    actions
                },
                Err(error) => {
                    warn!(%error, "dropping unexpected transport");
                    Vec::new()
                },
            },
            Err(error) => self.conn.connect_failed(&error.to_string()),
        }
    }

    fn on_message(&mut self, message: Option<Result<Message, tungstenite::Error>>) -> Vec<ClientAction> {
        match message {
            Some(Ok(Message::Binary(payload))) => self.conn.handle_bytes(&payload),
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "server closing");
                self.close_reason = frame.map(|frame| frame.reason.to_string());
                // tungstenite answers the close; the server still has to drop TCP
                self.connected.store(false, Ordering::Release);
                if self.close_deadline.is_none() {
                    self.arm_close_deadline();
                }
                Vec::new()
            },
            Some(Ok(Message::Text(text))) => {
                warn!(text = %text, "ignoring text message");
                Vec::new()
            },
            Some(Ok(_)) => Vec::new(),
            Some(Err(error)) => {
                warn!(%error, "transport error");
                self.drop_link();
                self.conn.transport_closed(Some(error.to_string()))
            },
            None => {
                self.drop_link();
                self.conn.transport_closed(self.close_reason.take())
            },
        }
    }

    async fn close_link(&mut self, code: u16, reason: String) {
        let Some(ws) = self.link.as_mut() else {
            return;
        };

        debug!(code, reason = %reason, "closing transport");
        self.connected.store(false, Ordering::Release);
        let frame = CloseFrame { code: CloseCode::from(code), reason: reason.clone().into() };
        if let Err(error) = ws.close(Some(frame)).await {
            debug!(%error, "close failed");
        }
        self.close_reason = Some(reason);
        self.arm_close_deadline();
    }

    fn arm_close_deadline(&mut self) {
        let env = self.env.clone();
        let grace = self.config.close_grace;
        self.close_deadline = Some(Box::pin(async move { env.sleep(grace).await }));
    }

    fn drop_link(&mut self) {
        self.link = None;
        self.close_deadline = None;
        self.connected.store(false, Ordering::Release);
    }
}

/// Resolve the future in `slot`, or never if the slot is empty.
async fn poll_slot<T>(slot: &mut Option<BoxFuture<T>>) -> T {
    match slot {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn next_message<S>(link: &mut Option<WebSocketStream<S>>) -> Option<Result<Message, tungstenite::Error>>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    match link {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}
