use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::time::timeout;

use oncrpc::auth::{Principal, SvcAuthenticator};
use oncrpc::protocol::rpc::{Context, SocketMessageHandler, TransactionTracker, MAX_RPC_RECORD_LENGTH};
use oncrpc::server::SimpleServiceRegistry;
use oncrpc::xdr::rpc::{auth_flavor, auth_stat, call_body, opaque_auth, rejected_reply, reply_body, rpc_body, rpc_msg, accept_body};
use oncrpc::xdr::{self, Serialize};

const ECHO_PROG: u32 = 200_001;
const ECHO_VERS: u32 = 3;
const ECHO_PROC: u32 = 1;

fn test_registry() -> Arc<SimpleServiceRegistry> {
    let registry = Arc::new(SimpleServiceRegistry::new());
    registry.register(ECHO_PROG, ECHO_VERS, ECHO_PROC, |v: u32, _p: &Principal| v + 1);
    registry
}

fn test_context() -> Context {
    Context {
        local_port: 0,
        client_addr: "127.0.0.1:1234".to_string(),
        principal: Principal::default(),
        authenticator: Arc::new(SvcAuthenticator::new()),
        registry: test_registry(),
        transaction_tracker: Arc::new(TransactionTracker::new(Duration::from_secs(60))),
    }
}

fn call_message(xid: u32, prog: u32, vers: u32, proc: u32, cred: opaque_auth) -> Vec<u8> {
    let call = call_body {
        rpcvers: 2,
        prog,
        vers,
        proc,
        cred,
        verf: opaque_auth::default(),
    };
    let msg = rpc_msg { xid, body: rpc_body::CALL(call) };
    let mut buf = Vec::new();
    msg.serialize(&mut buf).expect("serialize rpc_msg");
    buf
}

async fn send_record(socksend: &mut DuplexStream, buf: &[u8]) {
    let fragment_header = (1_u32 << 31) | (buf.len() as u32);
    socksend
        .write_all(&fragment_header.to_be_bytes())
        .await
        .expect("write fragment header");
    socksend.write_all(buf).await.expect("write fragment body");
}

async fn recv_reply(
    msgrecv: &mut tokio::sync::mpsc::UnboundedReceiver<Result<Vec<u8>, anyhow::Error>>,
) -> Vec<u8> {
    timeout(Duration::from_secs(1), msgrecv.recv())
        .await
        .expect("response timeout")
        .expect("response channel closed")
        .expect("response error")
}

#[tokio::test]
async fn rejects_oversized_rpc_fragment() {
    let (mut handler, mut socksend, _msgrecv) = SocketMessageHandler::new(&test_context());

    let oversized = MAX_RPC_RECORD_LENGTH + 1;
    let fragment_header = (1_u32 << 31) | (oversized as u32);
    socksend
        .write_all(&fragment_header.to_be_bytes())
        .await
        .expect("write fragment header");

    let err = handler.read().await.expect_err("expected oversize error");
    assert!(
        err.to_string().contains("exceeds max"),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn replies_to_ping() {
    let xid = 7;
    let msg = call_message(xid, ECHO_PROG, ECHO_VERS, 0, opaque_auth::default());

    let (mut handler, mut socksend, mut msgrecv) = SocketMessageHandler::new(&test_context());
    send_record(&mut socksend, &msg).await;
    handler.read().await.expect("handler read");

    let response = recv_reply(&mut msgrecv).await;
    let reply = xdr::deserialize::<rpc_msg>(&mut Cursor::new(response))
        .expect("deserialize reply");
    assert_eq!(reply.xid, xid);
    match reply.body {
        rpc_body::REPLY(reply_body::MSG_ACCEPTED(accepted)) => {
            assert!(matches!(accepted.reply_data, accept_body::SUCCESS));
        }
        other => panic!("expected MSG_ACCEPTED, got {:?}", other),
    }
}

#[tokio::test]
async fn echoes_through_registered_procedure() {
    let xid = 11;
    let mut msg = call_message(xid, ECHO_PROG, ECHO_VERS, ECHO_PROC, opaque_auth::default());
    41_u32.serialize(&mut msg).expect("serialize args");

    let (mut handler, mut socksend, mut msgrecv) = SocketMessageHandler::new(&test_context());
    send_record(&mut socksend, &msg).await;
    handler.read().await.expect("handler read");

    let response = recv_reply(&mut msgrecv).await;
    let mut cursor = Cursor::new(response);
    let reply = xdr::deserialize::<rpc_msg>(&mut cursor).expect("deserialize reply");
    assert_eq!(reply.xid, xid);
    assert!(matches!(
        reply.body,
        rpc_body::REPLY(reply_body::MSG_ACCEPTED(ref accepted))
            if matches!(accepted.reply_data, accept_body::SUCCESS)
    ));
    let result = xdr::deserialize::<u32>(&mut cursor).expect("deserialize result");
    assert_eq!(result, 42);
}

#[tokio::test]
async fn returns_prog_mismatch_for_unsupported_version() {
    let xid = 42;
    let msg = call_message(xid, ECHO_PROG, ECHO_VERS + 1, ECHO_PROC, opaque_auth::default());

    let (mut handler, mut socksend, mut msgrecv) = SocketMessageHandler::new(&test_context());
    send_record(&mut socksend, &msg).await;
    handler.read().await.expect("handler read");

    let response = recv_reply(&mut msgrecv).await;
    let reply = xdr::deserialize::<rpc_msg>(&mut Cursor::new(response))
        .expect("deserialize reply");
    assert_eq!(reply.xid, xid);
    match reply.body {
        rpc_body::REPLY(reply_body::MSG_ACCEPTED(accepted)) => match accepted.reply_data {
            accept_body::PROG_MISMATCH(info) => {
                assert_eq!(info.low, ECHO_VERS);
                assert_eq!(info.high, ECHO_VERS);
            }
            other => panic!("expected PROG_MISMATCH, got {:?}", other),
        },
        other => panic!("expected MSG_ACCEPTED, got {:?}", other),
    }
}

#[tokio::test]
async fn returns_prog_unavail_for_unknown_program() {
    let xid = 13;
    let msg = call_message(xid, ECHO_PROG + 1, 1, ECHO_PROC, opaque_auth::default());

    let (mut handler, mut socksend, mut msgrecv) = SocketMessageHandler::new(&test_context());
    send_record(&mut socksend, &msg).await;
    handler.read().await.expect("handler read");

    let response = recv_reply(&mut msgrecv).await;
    let reply = xdr::deserialize::<rpc_msg>(&mut Cursor::new(response))
        .expect("deserialize reply");
    assert_eq!(reply.xid, xid);
    assert!(matches!(
        reply.body,
        rpc_body::REPLY(reply_body::MSG_ACCEPTED(ref accepted))
            if matches!(accepted.reply_data, accept_body::PROG_UNAVAIL)
    ));
}

#[tokio::test]
async fn denies_malformed_unix_credential() {
    let xid = 21;
    // Declares 1000 groups; the decoder must reject this outright.
    let mut body = Vec::new();
    for word in [0_u32, 0, 1000, 1000, 1000] {
        body.extend_from_slice(&word.to_be_bytes());
    }
    let cred = opaque_auth { flavor: auth_flavor::AUTH_UNIX, body };
    let msg = call_message(xid, ECHO_PROG, ECHO_VERS, ECHO_PROC, cred);

    let (mut handler, mut socksend, mut msgrecv) = SocketMessageHandler::new(&test_context());
    send_record(&mut socksend, &msg).await;
    handler.read().await.expect("handler read");

    let response = recv_reply(&mut msgrecv).await;
    let reply = xdr::deserialize::<rpc_msg>(&mut Cursor::new(response))
        .expect("deserialize reply");
    assert_eq!(reply.xid, xid);
    match reply.body {
        rpc_body::REPLY(reply_body::MSG_DENIED(rejected_reply::AUTH_ERROR(stat))) => {
            assert_eq!(stat, auth_stat::AUTH_BADCRED);
        }
        other => panic!("expected AUTH_ERROR denial, got {:?}", other),
    }
}

#[tokio::test]
async fn denies_unhandled_auth_flavor() {
    let xid = 23;
    let cred = opaque_auth { flavor: auth_flavor::AUTH_DES, body: Vec::new() };
    let msg = call_message(xid, ECHO_PROG, ECHO_VERS, ECHO_PROC, cred);

    let (mut handler, mut socksend, mut msgrecv) = SocketMessageHandler::new(&test_context());
    send_record(&mut socksend, &msg).await;
    handler.read().await.expect("handler read");

    let response = recv_reply(&mut msgrecv).await;
    let reply = xdr::deserialize::<rpc_msg>(&mut Cursor::new(response))
        .expect("deserialize reply");
    match reply.body {
        rpc_body::REPLY(reply_body::MSG_DENIED(rejected_reply::AUTH_ERROR(stat))) => {
            assert_eq!(stat, auth_stat::AUTH_REJECTEDCRED);
        }
        other => panic!("expected AUTH_ERROR denial, got {:?}", other),
    }
}

#[tokio::test]
async fn suppresses_retransmissions() {
    let xid = 55;
    let msg = call_message(xid, ECHO_PROG, ECHO_VERS, 0, opaque_auth::default());

    let (mut handler, mut socksend, mut msgrecv) = SocketMessageHandler::new(&test_context());
    send_record(&mut socksend, &msg).await;
    handler.read().await.expect("first read");
    let _ = recv_reply(&mut msgrecv).await;

    // The identical record again: recognized as a retransmission, no reply.
    send_record(&mut socksend, &msg).await;
    handler.read().await.expect("second read");
    let second = timeout(Duration::from_millis(300), msgrecv.recv()).await;
    assert!(second.is_err(), "retransmission must not produce a reply");
}
