//! Graceful shutdown broadcast under simulation.
//!
//! Every connected client gets exactly one `shutdown` notice carrying the
//! session, followed by a close, before the server run completes.

use std::time::Duration;

use rebound_core::ClientEvent;
use rebound_harness::{
    ServerHost,
    scenario::{client_config, next_event, session_for_seed, start_client},
};
use rebound_proto::MessageKind;
use rebound_server::ServerConfig;

const CLIENTS: u64 = 3;

#[test]
fn every_client_gets_one_shutdown_notice() -> turmoil::Result {
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(60)).build();
    let stats = ServerHost::new(ServerConfig::default())
        .uptime(Duration::from_secs(3))
        .first_seed(30)
        .install(&mut sim);

    for n in 0..CLIENTS {
        sim.client(format!("client-{n}"), async move {
            let (handle, mut events, task) = start_client(client_config(Duration::from_secs(3)), n);
            let session = session_for_seed(30);

            assert_eq!(
                next_event(&mut events, Duration::from_secs(2)).await,
                Some(ClientEvent::SessionStarted { server_id: session.clone() })
            );
            assert_eq!(
                next_event(&mut events, Duration::from_secs(5)).await,
                Some(ClientEvent::Notice {
                    kind: MessageKind::Shutdown,
                    content: format!("Server {session} is shutting down"),
                })
            );
            let closed = next_event(&mut events, Duration::from_secs(5)).await;
            assert!(matches!(&closed, Some(ClientEvent::Disconnected { reason: Some(reason) }) if reason == "server shutdown"), "got {closed:?}");

            handle.teardown();
            task.await?;
            // Nothing surfaced after the close
            assert_eq!(events.recv().await, None);
            Ok(())
        });
    }

    sim.run()?;
    assert_eq!(stats.stops(), 1);
    assert_eq!(stats.connections_notified(), CLIENTS as usize);
    Ok(())
}
