//! Per-connection driver.
//!
//! Owns one [`ServerConnection`] and executes its actions against a
//! WebSocket. Inbound binary messages are screened by the chaos injector
//! concurrently, so one delayed message never blocks the ones behind it.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    future::BoxFuture,
    stream::{FuturesUnordered, SplitSink, SplitStream},
};
use rebound_core::{
    ChaosInjector, ChaosVerdict, ConnectionAction, ConnectionId, Environment, MessageFault,
    ServerConnection, SessionId,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, oneshot},
    time::{Instant, Interval, MissedTickBehavior, interval_at},
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{
        self, Message,
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tracing::{debug, info, warn};

use crate::{
    config::ServerConfig,
    registry::{ConnectionCommand, ConnectionHandle, ConnectionRegistry},
};

type Sink<S> = SplitSink<WebSocketStream<S>, Message>;
type Source<S> = SplitStream<WebSocketStream<S>>;

/// Everything a connection task shares with the server.
pub(crate) struct ConnectionContext<E> {
    pub id: ConnectionId,
    pub session: SessionId,
    pub env: E,
    pub injector: ChaosInjector,
    pub registry: Arc<ConnectionRegistry>,
    pub config: Arc<ServerConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// Close frame was attempted
    Closed,
    /// Transport write failed without a close
    Broken,
}

/// Next thing the driver does after waiting on its sources.
enum Step {
    Run(Vec<ConnectionAction>),
    Shutdown(oneshot::Sender<()>),
}

/// Drive one accepted stream until it closes.
pub(crate) async fn serve<S, E>(stream: S, peer: SocketAddr, ctx: ConnectionContext<E>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: Environment,
{
    let ws = match handshake(stream, &ctx.config).await {
        Ok(ws) => ws,
        Err(error) => {
            warn!(%peer, %error, "websocket handshake rejected");
            return;
        },
    };

    let (handle, commands) = ConnectionHandle::new(ctx.id);
    let registration = ctx.registry.register(handle);
    let draining = registration.is_none();
    info!(%peer, "connection opened");

    drive(ws, &ctx, commands, draining).await;
    drop(registration);
}

async fn handshake<S>(
    stream: S,
    config: &ServerConfig,
) -> Result<WebSocketStream<S>, tungstenite::Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let path = config.path.clone();
    let check_path = move |request: &Request, response: Response| {
        if request.uri().path() == path {
            return Ok(response);
        }
        let mut rejection: ErrorResponse =
            ErrorResponse::new(Some(format!("no endpoint at {}", request.uri().path())));
        *rejection.status_mut() = StatusCode::NOT_FOUND;
        Err(rejection)
    };

    tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        check_path,
        Some(config.websocket_config()),
    )
    .await
}

async fn drive<S, E>(
    ws: WebSocketStream<S>,
    ctx: &ConnectionContext<E>,
    mut commands: mpsc::UnboundedReceiver<ConnectionCommand>,
    draining: bool,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: Environment,
{
    let (mut sink, mut source) = ws.split();
    let mut conn = ServerConnection::new(ctx.id, ctx.session);
    let mut chaos_timer = ctx.injector.disconnect_interval().map(|period| {
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    });
    let mut screening: FuturesUnordered<BoxFuture<'static, (ChaosVerdict, Bytes)>> = FuturesUnordered::new();
    let mut acks: Vec<oneshot::Sender<()>> = Vec::new();
    let grace = ctx.config.close_grace;

    let mut actions = match conn.open() {
        Ok(actions) => actions,
        Err(error) => {
            warn!(%error, "connection could not open");
            return;
        },
    };
    if draining {
        debug!("registered after shutdown began");
        actions.extend(conn.shutdown());
    }
    let mut step = Step::Run(actions);

    loop {
        let flow = match step {
            Step::Run(actions) => tokio::select! {
                biased;

                flow = execute(&mut sink, actions) => flow,

                Some(ConnectionCommand::Shutdown { ack }) = commands.recv() => {
                    debug!("shutdown interrupted a pending send");
                    acks.push(ack);
                    shut_down(&mut sink, &mut conn, grace).await
                },
            },
            Step::Shutdown(ack) => {
                acks.push(ack);
                shut_down(&mut sink, &mut conn, grace).await
            },
        };

        match flow {
            Flow::Continue => {},
            Flow::Closed => {
                for ack in acks.drain(..) {
                    let _ = ack.send(());
                }
                await_close_reply(&mut source, grace).await;
                break;
            },
            // Dropped acks resolve the waiting broadcast
            Flow::Broken => break,
        }

        step = tokio::select! {
            biased;

            Some(command) = commands.recv() => match command {
                ConnectionCommand::Shutdown { ack } => Step::Shutdown(ack),
            },

            Some((verdict, payload)) = screening.next() => Step::Run(match verdict {
                ChaosVerdict::Deliver => conn.handle_message(&payload),
                ChaosVerdict::Fail => conn.handle_fault(&MessageFault::SimulatedFault),
            }),

            () = next_tick(&mut chaos_timer) => {
                Step::Run(conn.chaos_tick(ctx.injector.should_disconnect(&ctx.env)))
            },

            message = source.next() => match message {
                Some(Ok(Message::Binary(payload))) => {
                    screening.push(Box::pin(screen(ctx.env.clone(), ctx.injector.clone(), payload)));
                    Step::Run(Vec::new())
                },
                Some(Ok(Message::Text(_))) => Step::Run(conn.handle_fault(&MessageFault::TextMessage)),
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "peer closing");
                    conn.peer_closing();
                    Step::Run(Vec::new())
                },
                // ping and pong are answered by tungstenite
                Some(Ok(_)) => Step::Run(Vec::new()),
                Some(Err(error)) => {
                    warn!(%error, "transport error");
                    break;
                },
                None => break,
            },
        };
    }

    conn.transport_closed();
}

/// Send the shutdown notice and close, giving up after `grace`.
///
/// A peer that stopped reading would otherwise hold the whole server
/// shutdown on its full send buffer.
async fn shut_down<S>(sink: &mut Sink<S>, conn: &mut ServerConnection, grace: Duration) -> Flow
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let actions = conn.shutdown();
    if actions.is_empty() {
        // Already closing on its own
        return Flow::Closed;
    }
    match tokio::time::timeout(grace, execute(sink, actions)).await {
        Ok(flow) => flow,
        Err(_) => {
            warn!(?grace, "peer is not reading, dropping it");
            Flow::Broken
        },
    }
}

async fn execute<S>(sink: &mut Sink<S>, actions: Vec<ConnectionAction>) -> Flow
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut flow = Flow::Continue;
    for action in actions {
        match action {
            ConnectionAction::SendFrame(frame) => {
                let bytes = match frame.to_bytes() {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        warn!(%error, kind = ?frame.kind, "dropping unencodable frame");
                        continue;
                    },
                };
                if let Err(error) = sink.send(Message::Binary(bytes)).await {
                    debug!(%error, kind = ?frame.kind, "send failed");
                    flow = Flow::Broken;
                }
            },
            ConnectionAction::Close { code, reason } => {
                let close = CloseFrame { code: CloseCode::from(code), reason: reason.into() };
                if let Err(error) = sink.send(Message::Close(Some(close))).await {
                    debug!(%error, "close failed");
                }
                return Flow::Closed;
            },
        }
    }
    flow
}

async fn await_close_reply<S>(source: &mut Source<S>, grace: Duration)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let drained = tokio::time::timeout(grace, async {
        while let Some(Ok(_)) = source.next().await {}
    })
    .await;
    if drained.is_err() {
        debug!("peer did not finish the close handshake");
    }
}

fn screen<E: Environment>(
    env: E,
    injector: ChaosInjector,
    payload: Bytes,
) -> impl Future<Output = (ChaosVerdict, Bytes)> + Send {
    async move {
        let verdict = injector.screen_message(&env).await;
        (verdict, payload)
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        },
        None => std::future::pending().await,
    }
}
