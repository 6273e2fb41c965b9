//! End-to-end tests: two `NetworkCore`s talking over the WebSocket
//! providers on loopback.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tidewire::prelude::*;
use tidewire::protocol::PROTOCOL_VERSION;
use tidewire::transport::TransportError;

// =========================================================================
// Helpers
// =========================================================================

/// Finds a port nobody listens on by binding and dropping a listener.
fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("should bind")
        .local_addr()
        .expect("bound address")
        .port()
}

fn local_net(client: ClientConfig) -> NetworkCore {
    NetworkBuilder::new()
        .server_config(ServerConfig {
            name: "Test Harbor".into(),
            bind_host: "127.0.0.1".into(),
            ..ServerConfig::default()
        })
        .client_config(ClientConfig {
            connect_timeout: Duration::from_secs(2),
            ..client
        })
        .build()
        .expect("runtime is current")
}

/// Ticks both cores until `done` holds. Returns whether it did before
/// the deadline, along with every failure reported meanwhile.
async fn pump(
    server: &mut NetworkCore,
    client: &mut NetworkCore,
    mut done: impl FnMut(&NetworkCore, &NetworkCore) -> bool,
) -> (bool, Vec<Failure>) {
    let mut failures = Vec::new();
    for _ in 0..300 {
        failures.extend(server.update());
        failures.extend(client.update());
        if done(server, client) {
            return (true, failures);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    (false, failures)
}

/// A hosting server core that records every joined connection and then
/// runs `on_join` for it.
fn hosting(
    port: u16,
    mut on_join: impl FnMut(ConnectionId, &mut NetContext) + 'static,
) -> (NetworkCore, Rc<RefCell<Vec<ConnectionId>>>) {
    let mut server = local_net(ClientConfig::default());
    let joined: Rc<RefCell<Vec<ConnectionId>>> = Rc::default();
    let log = joined.clone();
    server.on_server::<Connect>(move |id, _, ctx| {
        log.borrow_mut().push(id);
        on_join(id, ctx);
    });
    server.host(port).expect("should host");
    (server, joined)
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_client_joins_and_exchanges_packets() {
    let port = free_port();
    let (mut server, joined) = hosting(port, |_, _| {});
    server.on_server::<Invoke>(|id, invoke, ctx| {
        let reply = Invoke {
            method: invoke.method + 1,
            payload: invoke.payload,
        };
        ctx.send_to(id, reply, DeliveryMode::Reliable);
    });

    let mut client = local_net(ClientConfig::default());
    let replies: Rc<RefCell<Vec<Invoke>>> = Rc::default();
    let log = replies.clone();
    client.on_client::<Invoke>(move |invoke, _| log.borrow_mut().push(invoke));

    let connected = Rc::new(Cell::new(false));
    let flag = connected.clone();
    client
        .connect("127.0.0.1", port, move |net| {
            flag.set(true);
            net.set_client_loaded(true);
        })
        .unwrap();
    assert!(client.is_client());

    let (ok, failures) =
        pump(&mut server, &mut client, |_, _| connected.get() && joined.borrow().len() == 1).await;
    assert!(ok, "client should join, failures: {failures:?}");
    assert_eq!(server.connections().len(), 1);

    client.send(
        Invoke {
            method: 1,
            payload: vec![9, 8],
        },
        DeliveryMode::Reliable,
    );
    let (ok, _) = pump(&mut server, &mut client, |_, _| !replies.borrow().is_empty()).await;
    assert!(ok, "reply should arrive");
    assert_eq!(
        replies.borrow()[0],
        Invoke {
            method: 2,
            payload: vec![9, 8]
        }
    );
}

#[tokio::test]
async fn test_packets_before_loading_are_deferred() {
    let port = free_port();
    let (mut server, _joined) = hosting(port, |id, ctx| {
        ctx.send_to(
            id,
            Invoke {
                method: 7,
                payload: vec![],
            },
            DeliveryMode::Reliable,
        );
    });

    let mut client = local_net(ClientConfig::default());
    let invokes: Rc<RefCell<Vec<u16>>> = Rc::default();
    let log = invokes.clone();
    client.on_client::<Invoke>(move |invoke, _| log.borrow_mut().push(invoke.method));
    client.connect("127.0.0.1", port, |_| {}).unwrap();

    let (ok, _) = pump(&mut server, &mut client, |_, client| client_pending_len(client) == 1).await;
    assert!(ok, "invoke should be queued while loading");
    assert!(invokes.borrow().is_empty());

    client.set_client_loaded(true);
    assert_eq!(*invokes.borrow(), vec![7]);
    assert_eq!(client_pending_len(&client), 0);
}

fn client_pending_len(net: &NetworkCore) -> usize {
    net.router().pending().len()
}

#[tokio::test]
async fn test_world_stream_is_reassembled() {
    let port = free_port();
    let world: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
    let payload = world.clone();
    let (mut server, _joined) = hosting(port, move |id, ctx| {
        ctx.send_stream(
            id,
            &WorldStream {
                data: payload.clone(),
            },
        );
    });

    let mut client = local_net(ClientConfig::default());
    let received: Rc<RefCell<Option<Vec<u8>>>> = Rc::default();
    let slot = received.clone();
    client.on_client::<WorldStream>(move |stream, _| *slot.borrow_mut() = Some(stream.data));
    client.connect("127.0.0.1", port, |_| {}).unwrap();

    let (ok, _) = pump(&mut server, &mut client, |_, _| received.borrow().is_some()).await;
    assert!(ok, "world should arrive");
    assert_eq!(received.borrow().as_deref(), Some(world.as_slice()));
    assert!(client.router().client_streams().is_empty());
}

#[tokio::test]
async fn test_kick_reaches_client_before_disconnect() {
    let port = free_port();
    let (mut server, _joined) = hosting(port, |id, ctx| ctx.kick(id, KickReason::Banned));

    let mut client = local_net(ClientConfig::default());
    let seen: Rc<RefCell<Vec<PacketKind>>> = Rc::default();
    let log = seen.clone();
    client.on_client::<Kick>(move |kick, _| {
        assert_eq!(kick.reason, KickReason::Banned);
        log.borrow_mut().push(PacketKind::Kick);
    });
    let log = seen.clone();
    client.on_client::<Disconnect>(move |_, ctx| {
        log.borrow_mut().push(PacketKind::Disconnect);
        ctx.disconnect();
    });
    client.connect("127.0.0.1", port, |_| {}).unwrap();

    let (ok, _) = pump(&mut server, &mut client, |_, _| seen.borrow().len() == 2).await;
    assert!(ok, "kick and disconnect should arrive");
    assert_eq!(*seen.borrow(), vec![PacketKind::Kick, PacketKind::Disconnect]);
    assert!(!client.is_active());

    let (ok, _) = pump(&mut server, &mut client, |server, _| server.connections().is_empty()).await;
    assert!(ok, "server should drop the kicked connection");
}

#[tokio::test]
async fn test_close_server_kicks_with_server_close() {
    let port = free_port();
    let (mut server, joined) = hosting(port, |_, _| {});

    let mut client = local_net(ClientConfig::default());
    let reasons: Rc<RefCell<Vec<KickReason>>> = Rc::default();
    let log = reasons.clone();
    client.on_client::<Kick>(move |kick, _| log.borrow_mut().push(kick.reason));
    client.connect("127.0.0.1", port, |_| {}).unwrap();

    let (ok, _) = pump(&mut server, &mut client, |_, _| joined.borrow().len() == 1).await;
    assert!(ok);

    server.close_server();
    assert!(!server.is_active());

    let (ok, _) = pump(&mut server, &mut client, |_, _| !reasons.borrow().is_empty()).await;
    assert!(ok, "client should be told the server closed");
    assert_eq!(*reasons.borrow(), vec![KickReason::ServerClose]);
}

#[tokio::test]
async fn test_refused_connection_is_host_unreachable() {
    let port = free_port();
    let mut idle = local_net(ClientConfig::default());
    let mut client = local_net(ClientConfig::default());
    client.connect("127.0.0.1", port, |_| {}).unwrap();

    let (ok, failures) = pump(&mut idle, &mut client, |_, client| !client.is_active()).await;
    assert!(ok, "failure should end the session");
    let kinds: Vec<_> = failures.iter().map(|f| f.kind.clone()).collect();
    assert_eq!(kinds, vec![FailureKind::HostUnreachable]);
}

#[tokio::test]
async fn test_port_zero_is_invalid_address() {
    let mut client = local_net(ClientConfig::default());
    client.connect("127.0.0.1", 0, |_| {}).unwrap();
    assert!(!client.is_active());

    let failures = client.update();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::InvalidAddress);
}

#[tokio::test]
async fn test_second_connect_is_refused() {
    let port = free_port();
    let (mut server, joined) = hosting(port, |_, _| {});
    let mut client = local_net(ClientConfig::default());
    client.connect("127.0.0.1", port, |_| {}).unwrap();

    let err = client.connect("127.0.0.1", port, |_| {}).unwrap_err();
    assert!(matches!(err, NetError::AlreadyConnected));
    assert!(client.is_client());

    let (ok, _) = pump(&mut server, &mut client, |_, _| joined.borrow().len() == 1).await;
    assert!(ok, "the first attempt should still join");
}

#[tokio::test]
async fn test_ping_host_reports_host_info() {
    let port = free_port();
    let (mut server, _joined) = hosting(port, |_, _| {});
    let mut client = local_net(ClientConfig::default());

    let found: Arc<Mutex<Option<Host>>> = Arc::default();
    let slot = Arc::clone(&found);
    client.ping_host(
        "127.0.0.1",
        port,
        move |host| *slot.lock().unwrap() = Some(host),
        |e| panic!("ping failed: {e}"),
    );

    let (ok, _) = pump(&mut server, &mut client, |_, _| found.lock().unwrap().is_some()).await;
    assert!(ok, "ping should answer");
    let host = found.lock().unwrap().clone().unwrap();
    assert_eq!(host.name, "Test Harbor");
    assert_eq!(host.address, "127.0.0.1");
    assert_eq!(host.port, port);
    assert_eq!(host.version, PROTOCOL_VERSION);
    assert_eq!(host.players, 0);
    assert!(server.connections().is_empty(), "a query is not a player");
}

#[tokio::test]
async fn test_ping_host_failure_reaches_callback() {
    let port = free_port();
    let mut idle = local_net(ClientConfig::default());
    let mut client = local_net(ClientConfig::default());

    let failed: Arc<Mutex<Option<TransportError>>> = Arc::default();
    let slot = Arc::clone(&failed);
    client.ping_host(
        "127.0.0.1",
        port,
        |host| panic!("nothing should answer, got {host:?}"),
        move |e| *slot.lock().unwrap() = Some(e),
    );

    let (ok, _) = pump(&mut idle, &mut client, |_, _| failed.lock().unwrap().is_some()).await;
    assert!(ok);
    assert!(matches!(
        failed.lock().unwrap().as_ref(),
        Some(TransportError::ConnectFailed(_))
    ));
}

#[tokio::test]
async fn test_discovery_finds_hosting_server() {
    let port = free_port();
    let (mut server, _joined) = hosting(port, |_, _| {});
    let dead_port = free_port();
    let mut client = local_net(
        ClientConfig::default()
            .discover("127.0.0.1", port)
            .discover("127.0.0.1", dead_port),
    );

    let hosts: Arc<Mutex<Vec<Host>>> = Arc::default();
    let done = Arc::new(AtomicBool::new(false));
    let sink = Arc::clone(&hosts);
    let finished = Arc::clone(&done);
    client.discover_servers(
        move |host| sink.lock().unwrap().push(host),
        move || finished.store(true, Ordering::SeqCst),
    );

    let (ok, _) = pump(&mut server, &mut client, |_, _| done.load(Ordering::SeqCst)).await;
    assert!(ok, "discovery should finish");
    let hosts = hosts.lock().unwrap();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].port, port);
}

#[tokio::test]
async fn test_client_disconnect_reaches_server() {
    let port = free_port();
    let (mut server, joined) = hosting(port, |_, _| {});
    let left: Rc<RefCell<Vec<ConnectionId>>> = Rc::default();
    let log = left.clone();
    server.on_server::<Disconnect>(move |id, _, _| log.borrow_mut().push(id));

    let mut client = local_net(ClientConfig::default());
    client.connect("127.0.0.1", port, |_| {}).unwrap();
    let (ok, _) = pump(&mut server, &mut client, |_, _| joined.borrow().len() == 1).await;
    assert!(ok);

    client.disconnect();
    assert!(!client.is_active());

    let (ok, _) = pump(&mut server, &mut client, |_, _| !left.borrow().is_empty()).await;
    assert!(ok, "server should see the client leave");
    assert_eq!(*left.borrow(), *joined.borrow());
    assert!(server.connections().is_empty());
}
