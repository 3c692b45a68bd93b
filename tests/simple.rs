use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use oncrpc::client::{ClientError, SimpleRpcClient};
use oncrpc::auth::Principal;
use oncrpc::server::{RpcTcp, RpcTcpListener, SimpleRpcServer, SimpleServiceRegistry};
use oncrpc::xdr::rpc::{accept_body, call_body, opaque_auth, reply_body, rpc_body, rpc_msg};
use oncrpc::xdr::{self, Serialize};

const PROG: u32 = 200_100;
const VERS: u32 = 2;
const PROC_INCR: u32 = 1;
const PROC_WHOAMI: u32 = 2;

fn test_registry() -> Arc<SimpleServiceRegistry> {
    let registry = Arc::new(SimpleServiceRegistry::new());
    registry.register(PROG, VERS, PROC_INCR, |v: u32, _p: &Principal| v + 1);
    registry.register(PROG, VERS, PROC_WHOAMI, |_: (), p: &Principal| match p {
        Principal::Anonymous => 0_u32,
        Principal::Unix(cred) => cred.uid,
    });
    registry
}

async fn spawn_udp_server(registry: Arc<SimpleServiceRegistry>) -> String {
    let server = SimpleRpcServer::bind("127.0.0.1:0", registry).await.expect("bind udp");
    let addr = server.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = server.handle_forever().await;
    });
    addr.to_string()
}

fn fast_client() -> SimpleRpcClient {
    SimpleRpcClient::new().with_timeouts(Duration::from_millis(500), Duration::from_secs(3))
}

#[tokio::test]
async fn udp_echo_round_trip() {
    let host = spawn_udp_server(test_registry()).await;
    let mut client = fast_client();

    let result: u32 = client.call(&host, PROG, VERS, PROC_INCR, &41_u32).await.expect("call");
    assert_eq!(result, 42);
}

#[tokio::test]
async fn ping_succeeds_without_registration() {
    let host = spawn_udp_server(Arc::new(SimpleServiceRegistry::new())).await;
    let mut client = fast_client();

    client.call::<(), ()>(&host, PROG, VERS, 0, &()).await.expect("ping");
}

#[tokio::test]
async fn unix_credential_reaches_the_handler() {
    let host = spawn_udp_server(test_registry()).await;
    let mut client = fast_client();

    let cred = oncrpc::auth::UnixCredential {
        stamp: 1,
        machine_name: b"testbox".to_vec(),
        uid: 1042,
        gid: 100,
        groups: vec![100],
    };
    client.set_credential(cred.to_opaque_auth().expect("encode credential"));

    let uid: u32 = client.call(&host, PROG, VERS, PROC_WHOAMI, &()).await.expect("call");
    assert_eq!(uid, 1042);
}

#[tokio::test]
async fn sequential_calls_reuse_cached_transport() {
    let host = spawn_udp_server(test_registry()).await;
    let mut client = fast_client();

    let _: u32 = client.call(&host, PROG, VERS, PROC_INCR, &1_u32).await.expect("first call");
    let first_addr = client.cached_local_addr().expect("cached transport");
    let _: u32 = client.call(&host, PROG, VERS, PROC_INCR, &2_u32).await.expect("second call");
    let second_addr = client.cached_local_addr().expect("cached transport");

    assert_eq!(first_addr, second_addr, "same triple must reuse the transport");
}

#[tokio::test]
async fn call_to_different_host_replaces_transport() {
    let host_a = spawn_udp_server(test_registry()).await;
    let host_b = spawn_udp_server(test_registry()).await;
    let mut client = fast_client();

    let _: u32 = client.call(&host_a, PROG, VERS, PROC_INCR, &1_u32).await.expect("call a");
    let addr_a = client.cached_local_addr().expect("cached transport");
    let _: u32 = client.call(&host_b, PROG, VERS, PROC_INCR, &2_u32).await.expect("call b");
    let addr_b = client.cached_local_addr().expect("cached transport");

    assert_ne!(addr_a, addr_b, "different host must get a fresh transport");
}

#[tokio::test]
async fn unresolvable_host_leaves_cache_invalid() {
    let mut client = fast_client();
    let err = client
        .call::<u32, u32>("name.that.does.not.resolve.invalid:12345", PROG, VERS, PROC_INCR, &1)
        .await
        .expect_err("resolution must fail");
    assert!(matches!(err, ClientError::CantResolve(_)), "unexpected error: {err}");
    assert!(client.cached_local_addr().is_none());
}

#[tokio::test]
async fn re_registration_replaces_previous_handler() {
    let registry = test_registry();
    registry.register(PROG, VERS, PROC_INCR, |v: u32, _p: &Principal| v + 100);

    let host = spawn_udp_server(registry).await;
    let mut client = fast_client();

    let result: u32 = client.call(&host, PROG, VERS, PROC_INCR, &1_u32).await.expect("call");
    assert_eq!(result, 101, "newest registration must win");
}

#[tokio::test]
async fn unknown_program_reported_to_client() {
    let host = spawn_udp_server(test_registry()).await;
    let mut client = fast_client();

    let err = client
        .call::<u32, u32>(&host, PROG + 1, VERS, PROC_INCR, &1)
        .await
        .expect_err("unknown program must fail");
    assert!(matches!(err, ClientError::ProgUnavail), "unexpected error: {err}");
    // The failed call forces a reconnect on the next one
    assert!(client.cached_local_addr().is_none());
}

#[tokio::test]
async fn version_mismatch_reports_supported_range() {
    let host = spawn_udp_server(test_registry()).await;
    let mut client = fast_client();

    let err = client
        .call::<u32, u32>(&host, PROG, VERS + 1, PROC_INCR, &1)
        .await
        .expect_err("bad version must fail");
    match err {
        ClientError::ProgMismatch { low, high } => {
            assert_eq!(low, VERS);
            assert_eq!(high, VERS);
        }
        other => panic!("expected ProgMismatch, got {other}"),
    }
}

#[tokio::test]
async fn registry_binds_portmap_entries_to_server_port() {
    let registry = test_registry();
    let server = SimpleRpcServer::bind("127.0.0.1:0", registry.clone()).await.expect("bind udp");
    let port = server.local_addr().expect("local addr").port();

    assert_eq!(registry.lookup_port(PROG, VERS), Some(port));
    assert_eq!(registry.lookup_port(PROG + 1, VERS), None);
}

#[test]
#[should_panic(expected = "never registered")]
fn unregistered_procedure_is_fatal() {
    let registry = test_registry();
    let call = call_body {
        rpcvers: 2,
        prog: PROG,
        vers: VERS,
        proc: 99,
        cred: opaque_auth::default(),
        verf: opaque_auth::default(),
    };
    let mut input = Cursor::new(Vec::new());
    let mut output = Vec::new();
    let _ = registry.dispatch(
        1,
        &call,
        opaque_auth::default(),
        &mut input,
        &mut output,
        &Principal::Anonymous,
    );
}

#[tokio::test]
async fn tcp_transport_answers_ping() {
    let listener = RpcTcpListener::bind("127.0.0.1:0", test_registry()).await.expect("bind tcp");
    let port = listener.get_listen_port();
    tokio::spawn(async move {
        let _ = listener.handle_forever().await;
    });

    let mut socket = TcpStream::connect(("127.0.0.1", port)).await.expect("connect");
    let xid = 77;
    let call = call_body {
        rpcvers: 2,
        prog: PROG,
        vers: VERS,
        proc: 0,
        cred: opaque_auth::default(),
        verf: opaque_auth::default(),
    };
    let msg = rpc_msg { xid, body: rpc_body::CALL(call) };
    let mut buf = Vec::new();
    msg.serialize(&mut buf).expect("serialize call");

    let header = (1_u32 << 31) | (buf.len() as u32);
    socket.write_all(&header.to_be_bytes()).await.expect("write header");
    socket.write_all(&buf).await.expect("write body");

    let mut reply_header = [0_u8; 4];
    socket.read_exact(&mut reply_header).await.expect("read reply header");
    let reply_header = u32::from_be_bytes(reply_header);
    assert!(reply_header & (1 << 31) != 0, "single-fragment reply expected");
    let len = (reply_header & ((1 << 31) - 1)) as usize;
    let mut reply_buf = vec![0_u8; len];
    socket.read_exact(&mut reply_buf).await.expect("read reply body");

    let reply = xdr::deserialize::<rpc_msg>(&mut Cursor::new(reply_buf)).expect("deserialize");
    assert_eq!(reply.xid, xid);
    assert!(matches!(
        reply.body,
        rpc_body::REPLY(reply_body::MSG_ACCEPTED(ref accepted))
            if matches!(accepted.reply_data, accept_body::SUCCESS)
    ));
}
