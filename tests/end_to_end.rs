//! Integration-level coverage of the reverse-RPC fabric's end-to-end scenarios: a direct call
//! against a local session, locator fan-out over real loopback TCP connections, and a streaming
//! call bridged through to an inbound client connection.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use fabric_rpc::{
    bridge,
    clock::LogicalClock,
    connpool::{HasNodeConnResponse, TcpConnPool},
    dispatcher::{router::SubstreamRouter, Dispatcher},
    locator::{Locator, LocatorError},
    peer::{PeerServer, StaticPeerDirectory},
    registry::{NodeConnRegistry, RpcContext},
    session::{Session, YamuxSession},
    worker_id::WorkerId,
};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct EchoArgs {
    msg: String,
}

/// Wraps one end of a loopback TCP connection in a server-mode Yamux session and the other end
/// in a client-mode one, mimicking a worker dialing in.
async fn yamux_pair() -> (Arc<YamuxSession>, Arc<YamuxSession>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (accept, connect) = tokio::join!(listener.accept(), TcpStream::connect(addr));
    let (server_socket, _) = accept.unwrap();
    let worker_socket = connect.unwrap();

    let server = YamuxSession::spawn(server_socket);
    let worker = YamuxSession::spawn_with_mode(worker_socket, yamux::Mode::Client);
    (server, worker)
}

/// Minimal `Status.HasNodeConn` server: accepts one connection, reads one length-delimited
/// msgpack request frame, ignores its contents, and replies with a scripted response.
async fn spawn_has_node_conn_server(response: HasNodeConnResponse) -> SocketAddr {
    use futures::{SinkExt, StreamExt};

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(socket, LengthDelimitedCodec::new());
        let _request = framed.next().await;
        let encoded = rmp_serde::to_vec_named(&response).unwrap();
        let _ = framed.send(encoded.into()).await;
    });
    addr
}

/// A `Status.HasNodeConn` listener that accepts a connection and hangs up without responding,
/// simulating a peer RPC failure.
async fn spawn_failing_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        drop(socket);
    });
    addr
}

fn peer(id: &str, addr: SocketAddr, is_self: bool) -> PeerServer {
    PeerServer { id: id.to_string(), addr, major_version: 1, region: "eu".to_string(), is_self }
}

/// S1 — Direct call: a server holding a session to worker W invokes a unary `Echo` RPC and gets
/// back exactly what it sent, via one substream opened and closed on W's session.
#[tokio::test]
async fn s1_direct_call() {
    let (server_session, worker_session) = yamux_pair().await;

    let router = Arc::new(SubstreamRouter::new());
    router.register_unary(
        "Echo",
        Arc::new(|payload: Vec<u8>| Box::pin(async move { payload }) as BoxFuture<'static, Vec<u8>>),
    );
    tokio::spawn(router.serve(worker_session as Arc<dyn Session>));

    let dispatcher = Dispatcher::new(Duration::from_secs(2));
    let args = EchoArgs { msg: "hi".to_string() };
    let response: EchoArgs =
        dispatcher.node_rpc(server_session.as_ref() as &dyn Session, "Echo", &args).await.unwrap();
    assert_eq!(response, args);
}

/// S2 — Indirect call via locator: S2 holds the session for W, S1 does not. S1's locator must
/// return S2 and must not have queried itself.
#[tokio::test]
async fn s2_indirect_call_via_locator() {
    let s2_addr = spawn_has_node_conn_server(HasNodeConnResponse { connected: true, established_at: 42 }).await;

    let directory = Arc::new(StaticPeerDirectory::new(
        vec![
            peer("s1", "127.0.0.1:1".parse().unwrap(), false),
            peer("s2", s2_addr, false),
        ],
        "s1",
    ));
    let conn_pool = Arc::new(TcpConnPool::new(Duration::from_secs(2)));
    let locator = Locator::new(directory, conn_pool, "eu".to_string(), Duration::from_secs(2));

    let winner = locator.server_with_worker_conn(&WorkerId::new("w").unwrap()).await.unwrap();
    assert_eq!(winner.id, "s2");
}

/// S3 — Tie-break by time: both peers report `connected=true`; the one with the larger
/// `established_at` wins.
#[tokio::test]
async fn s3_tie_break_by_time() {
    let s2_addr = spawn_has_node_conn_server(HasNodeConnResponse { connected: true, established_at: 100 }).await;
    let s3_addr = spawn_has_node_conn_server(HasNodeConnResponse { connected: true, established_at: 150 }).await;

    let directory = Arc::new(StaticPeerDirectory::new(
        vec![peer("s2", s2_addr, false), peer("s3", s3_addr, false)],
        "s1",
    ));
    let conn_pool = Arc::new(TcpConnPool::new(Duration::from_secs(2)));
    let locator = Locator::new(directory, conn_pool, "eu".to_string(), Duration::from_secs(2));

    let winner = locator.server_with_worker_conn(&WorkerId::new("w").unwrap()).await.unwrap();
    assert_eq!(winner.id, "s3");
}

/// S4 — All peers error: the locator must return the aggregated error, never `ErrNoNodeConn`.
#[tokio::test]
async fn s4_all_peers_error() {
    let p1_addr = spawn_failing_server().await;
    let p2_addr = spawn_failing_server().await;

    let directory = Arc::new(StaticPeerDirectory::new(
        vec![peer("p1", p1_addr, false), peer("p2", p2_addr, false)],
        "s1",
    ));
    let conn_pool = Arc::new(TcpConnPool::new(Duration::from_secs(2)));
    let locator = Locator::new(directory, conn_pool, "eu".to_string(), Duration::from_secs(2));

    let err = locator.server_with_worker_conn(&WorkerId::new("w").unwrap()).await.unwrap_err();
    assert!(matches!(err, LocatorError::Aggregate(_)));
}

/// S5 — No peer holds the session: every peer answers `connected=false`; the locator returns
/// `ErrNoNodeConn`, not an aggregated error.
#[tokio::test]
async fn s5_no_peer_holds_session() {
    let p1_addr = spawn_has_node_conn_server(HasNodeConnResponse { connected: false, established_at: 0 }).await;
    let p2_addr = spawn_has_node_conn_server(HasNodeConnResponse { connected: false, established_at: 0 }).await;

    let directory = Arc::new(StaticPeerDirectory::new(
        vec![peer("p1", p1_addr, false), peer("p2", p2_addr, false)],
        "s1",
    ));
    let conn_pool = Arc::new(TcpConnPool::new(Duration::from_secs(2)));
    let locator = Locator::new(directory, conn_pool, "eu".to_string(), Duration::from_secs(2));

    let err = locator.server_with_worker_conn(&WorkerId::new("w").unwrap()).await.unwrap_err();
    assert!(matches!(err, LocatorError::NoNodeConn));
}

/// S6 — Streaming bridge: a caller opens a streaming call to worker W; the resulting substream
/// is bridged to an inbound "client" connection. Bytes flow client -> worker and back, and the
/// bridge returns once both sides are closed.
#[tokio::test]
async fn s6_streaming_bridge() {
    let (server_session, worker_session) = yamux_pair().await;

    let router = Arc::new(SubstreamRouter::new());
    router.register_stream(
        "Tail",
        Arc::new(|mut substream| {
            Box::pin(async move {
                let mut buf = [0u8; 3];
                if substream.read_exact(&mut buf).await.is_ok() {
                    let _ = substream.write_all(&buf).await;
                }
                let _ = substream.shutdown().await;
            }) as BoxFuture<'static, ()>
        }),
    );
    tokio::spawn(router.serve(worker_session as Arc<dyn Session>));

    let dispatcher = Dispatcher::new(Duration::from_secs(2));
    let worker_substream =
        dispatcher.node_streaming_rpc(server_session.as_ref() as &dyn Session, "Tail").await.unwrap();

    // The inbound "client" connection the caller is bridging through to the worker.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (accept, connect) = tokio::join!(listener.accept(), TcpStream::connect(addr));
    let (client_server_side, _) = accept.unwrap();
    let mut client = connect.unwrap();

    let bridge_task = tokio::spawn(bridge::bridge(Box::pin(client_server_side), worker_substream));

    client.write_all(b"ABC").await.unwrap();
    let mut buf = [0u8; 3];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ABC");

    drop(client);
    tokio::time::timeout(Duration::from_secs(2), bridge_task).await.unwrap().unwrap();
}

/// Registry stale-remove guard (Invariant 12), exercised against real yamux-backed sessions
/// rather than a stub, to confirm session identity comparison works against the concrete type
/// the rest of this suite uses.
#[tokio::test]
async fn registry_survives_stale_remove_against_real_sessions() {
    let (old_session, _old_worker) = yamux_pair().await;
    let (new_session, _new_worker) = yamux_pair().await;

    let registry = NodeConnRegistry::new(Box::new(LogicalClock::new()));
    let w = WorkerId::new("w1").unwrap();

    let old_ctx = RpcContext::new(Some(w.clone()), old_session.clone() as Arc<dyn Session>);
    registry.add(&old_ctx);
    registry.add(&RpcContext::new(Some(w.clone()), new_session.clone() as Arc<dyn Session>));

    registry.remove(&old_ctx);

    let state = registry.get(&w).expect("newer session must survive a stale remove");
    assert!(Arc::ptr_eq(&state.session, &(new_session as Arc<dyn Session>)));
}
