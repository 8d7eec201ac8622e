//! Server integration tests over real loopback sockets.
//!
//! - Session announcement and message replies
//! - Error frames for text, malformed and unsupported messages
//! - Chaos at probability 0 and 1
//! - Shutdown broadcast and listener release
//! - Shutdown is not held up by a peer that stopped reading

use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use rebound_core::{ChaosConfig, SystemEnv};
use rebound_proto::{Frame, MessageKind};
use rebound_server::{ConnectionRegistry, Server, ServerConfig, ServerError, ShutdownReport};
use tokio::{net::TcpListener, task::JoinHandle, time::timeout};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message, http::StatusCode, protocol::frame::coding::CloseCode},
};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const STEP: Duration = Duration::from_secs(5);

struct Running {
    addr: SocketAddr,
    session: String,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
    task: JoinHandle<Result<ShutdownReport, ServerError>>,
}

impl Running {
    async fn stop(self) -> ShutdownReport {
        self.shutdown.cancel();
        timeout(STEP, self.task).await.unwrap().unwrap().unwrap()
    }
}

async fn start(config: ServerConfig) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(config, SystemEnv, listener).unwrap();
    let session = server.session().to_string();
    let registry = server.registry();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(server.run(shutdown.clone()));
    Running { addr, session, registry, shutdown, task }
}

fn chaos(error_probability: f64, random_disconnect_probability: f64) -> ServerConfig {
    ServerConfig {
        chaos: ChaosConfig {
            error_probability,
            random_disconnect_probability,
            max_latency: Duration::from_millis(20),
            disconnect_interval: Duration::from_millis(100),
            ..ChaosConfig::enabled()
        },
        ..ServerConfig::default()
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/")).await.unwrap();
    ws
}

async fn next_message(ws: &mut Client) -> Message {
    timeout(STEP, ws.next()).await.unwrap().unwrap().unwrap()
}

async fn next_frame(ws: &mut Client) -> Frame {
    match next_message(ws).await {
        Message::Binary(bytes) => Frame::decode(&bytes).unwrap().into_frame(),
        other => panic!("expected binary frame, got {other:?}"),
    }
}

async fn send(ws: &mut Client, frame: &Frame) {
    ws.send(Message::Binary(frame.to_bytes().unwrap())).await.unwrap();
}

async fn connect_and_greet(addr: SocketAddr) -> Client {
    let mut ws = connect(addr).await;
    let info = next_frame(&mut ws).await;
    assert_eq!(info.message_kind(), Some(MessageKind::ServerInfo));
    ws
}

#[tokio::test]
async fn server_info_is_first_frame() {
    let server = start(ServerConfig::default()).await;
    let mut ws = connect(server.addr).await;

    let info = next_frame(&mut ws).await;
    assert_eq!(info.message_kind(), Some(MessageKind::ServerInfo));
    assert_eq!(info.server_id.as_deref(), Some(server.session.as_str()));
    assert_eq!(info.content, None);

    server.stop().await;
}

#[tokio::test]
async fn every_connection_sees_the_same_session() {
    let server = start(ServerConfig::default()).await;
    let mut a = connect(server.addr).await;
    let mut b = connect(server.addr).await;

    let first = next_frame(&mut a).await;
    let second = next_frame(&mut b).await;
    assert_eq!(first.server_id, second.server_id);

    server.stop().await;
}

#[tokio::test]
async fn message_gets_response_with_session() {
    let server = start(ServerConfig::default()).await;
    let mut ws = connect_and_greet(server.addr).await;

    send(&mut ws, &Frame::message("ping")).await;
    let reply = next_frame(&mut ws).await;

    assert_eq!(reply.message_kind(), Some(MessageKind::Response));
    assert_eq!(reply.server_id.as_deref(), Some(server.session.as_str()));
    assert_eq!(reply.content, Some(format!("Server {} received: ping", server.session)));

    server.stop().await;
}

#[tokio::test]
async fn text_message_gets_error() {
    let server = start(ServerConfig::default()).await;
    let mut ws = connect_and_greet(server.addr).await;

    ws.send(Message::text("hello")).await.unwrap();
    let reply = next_frame(&mut ws).await;
    assert_eq!(reply.message_kind(), Some(MessageKind::Error));
    assert!(reply.content.unwrap().contains("Text messages"));

    server.stop().await;
}

#[tokio::test]
async fn malformed_message_gets_error_and_connection_survives() {
    let server = start(ServerConfig::default()).await;
    let mut ws = connect_and_greet(server.addr).await;

    ws.send(Message::binary(vec![0x02, 0x00, 0x00, 0x00, 0x09, b'x'])).await.unwrap();
    let reply = next_frame(&mut ws).await;
    assert_eq!(reply.message_kind(), Some(MessageKind::Error));
    assert!(reply.content.unwrap().starts_with("Failed to decode message"));

    send(&mut ws, &Frame::message("still here")).await;
    let reply = next_frame(&mut ws).await;
    assert_eq!(reply.message_kind(), Some(MessageKind::Response));

    server.stop().await;
}

#[tokio::test]
async fn unsupported_kind_gets_error() {
    let server = start(ServerConfig::default()).await;
    let mut ws = connect_and_greet(server.addr).await;

    send(&mut ws, &Frame::server_info("not-yours")).await;
    let reply = next_frame(&mut ws).await;
    assert_eq!(reply.message_kind(), Some(MessageKind::Error));
    assert_eq!(reply.content.as_deref(), Some("Unsupported message type: server_info"));

    server.stop().await;
}

#[tokio::test]
async fn wrong_path_is_not_found() {
    let server = start(ServerConfig::default()).await;

    match connect_async(format!("ws://{}/elsewhere", server.addr)).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        },
        other => panic!("expected 404, got {other:?}"),
    }
    assert!(server.registry.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn certain_chaos_failure_errors_every_message() {
    let server = start(chaos(1.0, 0.0)).await;
    let mut ws = connect_and_greet(server.addr).await;

    for n in 0..3 {
        send(&mut ws, &Frame::message(format!("m{n}"))).await;
        let reply = next_frame(&mut ws).await;
        assert_eq!(reply.message_kind(), Some(MessageKind::Error));
        assert_eq!(reply.content.as_deref(), Some("Simulated processing failure"));
    }

    server.stop().await;
}

#[tokio::test]
async fn zero_chaos_failure_answers_every_message() {
    let server = start(chaos(0.0, 0.0)).await;
    let mut ws = connect_and_greet(server.addr).await;

    send(&mut ws, &Frame::message("a")).await;
    send(&mut ws, &Frame::message("b")).await;

    // Latency may reorder the two replies
    let mut replies = Vec::new();
    for _ in 0..2 {
        let reply = next_frame(&mut ws).await;
        assert_eq!(reply.message_kind(), Some(MessageKind::Response));
        replies.push(reply.content.unwrap());
    }
    replies.sort();
    assert!(replies[0].ends_with("received: a"));
    assert!(replies[1].ends_with("received: b"));

    server.stop().await;
}

#[tokio::test]
async fn chaos_disconnect_sends_notice_then_closes() {
    let server = start(chaos(0.0, 1.0)).await;
    let mut ws = connect_and_greet(server.addr).await;

    let notice = next_frame(&mut ws).await;
    assert_eq!(notice.message_kind(), Some(MessageKind::Chaos));

    match next_message(&mut ws).await {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Normal);
            assert_eq!(frame.reason.as_str(), "chaos disconnect");
        },
        other => panic!("expected close, got {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn shutdown_notifies_every_client() {
    let server = start(ServerConfig::default()).await;
    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(connect_and_greet(server.addr).await);
    }
    assert_eq!(server.registry.len(), 3);

    let addr = server.addr;
    let session = server.session.clone();
    server.shutdown.cancel();

    for ws in &mut clients {
        let notice = next_frame(ws).await;
        assert_eq!(notice.message_kind(), Some(MessageKind::Shutdown));
        assert_eq!(notice.server_id.as_deref(), Some(session.as_str()));
        assert_eq!(notice.content, Some(format!("Server {session} is shutting down")));

        match next_message(ws).await {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, CloseCode::Normal);
                assert_eq!(frame.reason.as_str(), "server shutdown");
            },
            other => panic!("expected close, got {other:?}"),
        }
    }

    let report = timeout(STEP, server.task).await.unwrap().unwrap().unwrap();
    assert_eq!(report.connections_notified, 3);
    assert_eq!(report.session.to_string(), session);

    assert!(connect_async(format!("ws://{addr}/")).await.is_err());
}

#[tokio::test]
async fn shutdown_drops_a_peer_that_stopped_reading() {
    let server = start(ServerConfig { close_grace: Duration::from_millis(200), ..ServerConfig::default() }).await;

    // Floods responses into a socket nobody reads until the server blocks
    let mut stalled = connect_and_greet(server.addr).await;
    let flood = tokio::spawn(async move {
        let big = Frame::message("x".repeat(512 * 1024)).to_bytes().unwrap();
        for _ in 0..64 {
            if stalled.send(Message::Binary(big.clone())).await.is_err() {
                break;
            }
        }
        std::future::pending::<()>().await;
        drop(stalled);
    });
    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut healthy = connect_and_greet(server.addr).await;
    server.shutdown.cancel();

    assert_eq!(next_frame(&mut healthy).await.message_kind(), Some(MessageKind::Shutdown));
    assert!(matches!(next_message(&mut healthy).await, Message::Close(Some(_))));

    let report = timeout(STEP, server.task).await.unwrap().unwrap().unwrap();
    assert_eq!(report.connections_notified, 2);
    flood.abort();
}

#[tokio::test]
async fn shutdown_with_no_clients_completes() {
    let server = start(ServerConfig::default()).await;
    let report = server.stop().await;
    assert_eq!(report.connections_notified, 0);
}

#[tokio::test]
async fn invalid_chaos_config_is_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ServerConfig {
        chaos: ChaosConfig { error_probability: 2.0, ..ChaosConfig::enabled() },
        ..ServerConfig::default()
    };
    assert!(matches!(Server::new(config, SystemEnv, listener), Err(ServerError::Chaos(_))));
}
