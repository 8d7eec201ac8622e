//! Fault-triggered shutdown.
//!
//! - A panic on any task starts the broadcast once and marks the run failed
//! - An unrecoverable accept error notifies clients, then surfaces as an error
//! - Descriptor exhaustion pauses accepting instead of stopping the server

use std::{io, net::SocketAddr, time::Duration};

use async_trait::async_trait;
use futures_util::StreamExt;
use rebound_core::{Listener, SystemEnv};
use rebound_proto::{Frame, MessageKind};
use rebound_server::{Server, ServerConfig, ServerError, ShutdownReason, ShutdownTrigger};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{Mutex, mpsc},
    time::timeout,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, protocol::frame::coding::CloseCode},
};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const STEP: Duration = Duration::from_secs(5);

/// Real loopback listener that can be made to fail on demand.
struct FaultyListener {
    inner: TcpListener,
    faults: Mutex<mpsc::UnboundedReceiver<io::Error>>,
}

impl FaultyListener {
    async fn bind() -> (Self, mpsc::UnboundedSender<io::Error>) {
        let inner = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (inject, faults) = mpsc::unbounded_channel();
        (Self { inner, faults: Mutex::new(faults) }, inject)
    }
}

#[async_trait]
impl Listener for FaultyListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let mut faults = self.faults.lock().await;
        tokio::select! {
            Some(error) = faults.recv() => Err(error),
            accepted = self.inner.accept() => accepted,
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

async fn connect_and_greet(addr: SocketAddr) -> Client {
    let (mut ws, _) = connect_async(format!("ws://{addr}/")).await.unwrap();
    assert_eq!(next_frame(&mut ws).await.message_kind(), Some(MessageKind::ServerInfo));
    ws
}

async fn next_frame(ws: &mut Client) -> Frame {
    match timeout(STEP, ws.next()).await.unwrap().unwrap().unwrap() {
        Message::Binary(bytes) => Frame::decode(&bytes).unwrap().into_frame(),
        other => panic!("expected binary frame, got {other:?}"),
    }
}

async fn expect_shutdown(ws: &mut Client) {
    assert_eq!(next_frame(ws).await.message_kind(), Some(MessageKind::Shutdown));
    match timeout(STEP, ws.next()).await.unwrap().unwrap().unwrap() {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Normal),
        other => panic!("expected close, got {other:?}"),
    }
}

#[tokio::test]
async fn panic_anywhere_shuts_the_server_down_once() {
    let trigger = ShutdownTrigger::new();
    trigger.install_panic_hook();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(ServerConfig::default(), SystemEnv, listener).unwrap();
    let task = tokio::spawn(server.run(trigger.token()));
    let mut ws = connect_and_greet(addr).await;

    let crashed = tokio::spawn(async { panic!("worker crashed") });
    assert!(crashed.await.unwrap_err().is_panic());

    assert!(trigger.token().is_cancelled());
    assert!(trigger.failed());
    assert!(matches!(trigger.reason(), Some(ShutdownReason::Fault(fault)) if fault.contains("worker crashed")));

    expect_shutdown(&mut ws).await;
    let report = timeout(STEP, task).await.unwrap().unwrap().unwrap();
    assert_eq!(report.connections_notified, 1);

    // Another panic is only counted
    let again = tokio::spawn(async { panic!("second crash") });
    assert!(again.await.unwrap_err().is_panic());
    assert_eq!(trigger.late_faults(), 1);
    assert!(matches!(trigger.reason(), Some(ShutdownReason::Fault(fault)) if fault.contains("worker crashed")));
}

#[tokio::test]
async fn fatal_accept_error_notifies_clients_then_fails() {
    let (listener, inject) = FaultyListener::bind().await;
    let addr = listener.local_addr().unwrap();
    let server = Server::new(ServerConfig::default(), SystemEnv, listener).unwrap();
    let task = tokio::spawn(server.run(CancellationToken::new()));

    let mut clients = vec![connect_and_greet(addr).await, connect_and_greet(addr).await];
    inject.send(io::Error::other("listener closed")).unwrap();

    for ws in &mut clients {
        expect_shutdown(ws).await;
    }
    let result = timeout(STEP, task).await.unwrap().unwrap();
    assert!(matches!(result, Err(ServerError::Accept(_))), "got {result:?}");
    assert!(connect_async(format!("ws://{addr}/")).await.is_err());
}

#[cfg(unix)]
#[tokio::test]
async fn descriptor_exhaustion_keeps_accepting() {
    const EMFILE: i32 = 24;

    let (listener, inject) = FaultyListener::bind().await;
    let addr = listener.local_addr().unwrap();
    let server = Server::new(ServerConfig::default(), SystemEnv, listener).unwrap();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(server.run(shutdown.clone()));

    inject.send(io::Error::from_raw_os_error(EMFILE)).unwrap();
    inject.send(io::Error::from_raw_os_error(EMFILE)).unwrap();
    let mut ws = connect_and_greet(addr).await;
    assert!(!task.is_finished());

    shutdown.cancel();
    expect_shutdown(&mut ws).await;
    let report = timeout(STEP, task).await.unwrap().unwrap().unwrap();
    assert_eq!(report.connections_notified, 1);
}
