//! Connection-cached call helper for simple RPC clients.
//!
//! [`SimpleRpcClient`] is for programs that make occasional synchronous
//! calls and do not want to manage a persistent client handle themselves.
//! The helper keeps exactly one cached UDP transport, keyed by
//! (program, version, host): consecutive calls against the same triple
//! reuse the socket, a call against a different triple drops the old
//! transport before creating the new one. The single-entry cache is a
//! deliberate design limit inherited from the classic `rpc_call`
//! interface, not an oversight.
//!
//! The helper is not internally synchronized; it takes `&mut self` and a
//! caller that shares one instance across tasks must wrap it in a
//! `tokio::sync::Mutex`.

use std::fmt;
use std::io::Cursor;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::protocol::xdr::rpc::{
    accept_body, auth_stat, call_body, opaque_auth, rejected_reply, reply_body, rpc_body, rpc_msg,
};
use crate::protocol::xdr::{deserialize, Deserialize, Serialize};

/// Per-attempt retransmit timeout.
pub const RETRY_TIMEOUT: Duration = Duration::from_secs(5);
/// Total per-call timeout across all retransmissions.
pub const TOTAL_TIMEOUT: Duration = Duration::from_secs(25);

/// Largest reply datagram the client will accept.
const MAX_UDP_MESSAGE: usize = 65507;

/// Why a simple call failed.
#[derive(Debug)]
pub enum ClientError {
    /// Hostname resolution produced no usable address
    CantResolve(String),
    /// Socket creation or send/receive failure
    Io(std::io::Error),
    /// No matching reply arrived within the total call timeout
    Timeout,
    /// The reply arrived but its result body could not be decoded
    CantDecode(std::io::Error),
    /// The server denied the call over an RPC version mismatch
    RpcVersionMismatch,
    /// The server denied the call with an authentication error
    AuthError(auth_stat),
    /// The requested program is not available on the server
    ProgUnavail,
    /// The requested program version is not supported; carries the
    /// server's supported range
    ProgMismatch { low: u32, high: u32 },
    /// The requested procedure is not available
    ProcUnavail,
    /// The server could not decode the call arguments
    GarbageArgs,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::CantResolve(host) => write!(f, "cannot resolve host {host}"),
            ClientError::Io(e) => write!(f, "transport failure: {e}"),
            ClientError::Timeout => write!(f, "call timed out"),
            ClientError::CantDecode(e) => write!(f, "cannot decode reply: {e}"),
            ClientError::RpcVersionMismatch => write!(f, "server rejected RPC version"),
            ClientError::AuthError(stat) => write!(f, "authentication failed: {stat:?}"),
            ClientError::ProgUnavail => write!(f, "program unavailable"),
            ClientError::ProgMismatch { low, high } => {
                write!(f, "program version mismatch, server supports {low}..={high}")
            }
            ClientError::ProcUnavail => write!(f, "procedure unavailable"),
            ClientError::GarbageArgs => write!(f, "server could not decode arguments"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(e)
    }
}

/// The one cached transport, keyed by (program, version, host).
struct CachedTransport {
    prog: u32,
    vers: u32,
    host: String,
    socket: UdpSocket,
}

/// A synchronous-style RPC call helper with a single-entry transport cache.
///
/// Owned by the caller; no process-wide state. See the module docs for the
/// cache and concurrency contract.
pub struct SimpleRpcClient {
    cache: Option<CachedTransport>,
    next_xid: u32,
    retry_timeout: Duration,
    total_timeout: Duration,
    credential: opaque_auth,
}

impl Default for SimpleRpcClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleRpcClient {
    pub fn new() -> Self {
        // Seed the xid from the clock so retries after a restart do not
        // collide with the server's retransmission window.
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(1);
        Self {
            cache: None,
            next_xid: seed,
            retry_timeout: RETRY_TIMEOUT,
            total_timeout: TOTAL_TIMEOUT,
            credential: opaque_auth::default(),
        }
    }

    /// Overrides the default 5 s retransmit / 25 s total timeouts.
    pub fn with_timeouts(mut self, retry: Duration, total: Duration) -> Self {
        self.retry_timeout = retry;
        self.total_timeout = total;
        self
    }

    /// Sets the credential attached to every outgoing call. Defaults to
    /// AUTH_NONE.
    pub fn set_credential(&mut self, credential: opaque_auth) {
        self.credential = credential;
    }

    /// The local address of the cached transport, if one is live.
    ///
    /// Two calls that reuse the same transport observe the same local
    /// address; a cache replacement binds a fresh socket.
    pub fn cached_local_addr(&self) -> Option<std::net::SocketAddr> {
        self.cache.as_ref().and_then(|c| c.socket.local_addr().ok())
    }

    /// Makes one call to `proc` of (`prog`, `vers`) at `host` ("host:port").
    ///
    /// Reuses the cached transport when the (program, version, host) triple
    /// matches the previous call, otherwise tears the old transport down
    /// and creates a new one. The request is retransmitted every
    /// retry-timeout until a matching reply arrives or the total timeout
    /// elapses. On any failure after transport setup the cache entry is
    /// invalidated so the next call reconnects from scratch.
    pub async fn call<Req, Resp>(
        &mut self,
        host: &str,
        prog: u32,
        vers: u32,
        proc: u32,
        args: &Req,
    ) -> Result<Resp, ClientError>
    where
        Req: Serialize,
        Resp: Deserialize + Default,
    {
        self.ensure_transport(host, prog, vers).await?;

        let xid = self.next_xid;
        self.next_xid = self.next_xid.wrapping_add(1);

        let request = match self.encode_call(xid, prog, vers, proc, args) {
            Ok(request) => request,
            Err(e) => {
                self.cache = None;
                return Err(ClientError::Io(e));
            }
        };

        match self.exchange::<Resp>(xid, &request).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                // Force a reconnect on the next call
                self.cache = None;
                Err(e)
            }
        }
    }

    /// Reuses or (re)creates the cached transport for the given triple.
    async fn ensure_transport(
        &mut self,
        host: &str,
        prog: u32,
        vers: u32,
    ) -> Result<(), ClientError> {
        if let Some(cache) = &self.cache {
            if cache.prog == prog && cache.vers == vers && cache.host == host {
                trace!("reusing cached transport to {}", host);
                return Ok(());
            }
            debug!("replacing cached transport {} with {}", cache.host, host);
        }
        // Closing the previous socket before opening the next one keeps the
        // cache at a single live transport.
        self.cache = None;

        let addr = lookup_host(host)
            .await
            .map_err(|_| ClientError::CantResolve(host.to_string()))?
            .next()
            .ok_or_else(|| ClientError::CantResolve(host.to_string()))?;
        let socket = match addr {
            std::net::SocketAddr::V4(_) => UdpSocket::bind("0.0.0.0:0").await?,
            std::net::SocketAddr::V6(_) => UdpSocket::bind("[::]:0").await?,
        };
        socket.connect(addr).await?;
        self.cache = Some(CachedTransport { prog, vers, host: host.to_string(), socket });
        Ok(())
    }

    fn encode_call<Req: Serialize>(
        &self,
        xid: u32,
        prog: u32,
        vers: u32,
        proc: u32,
        args: &Req,
    ) -> std::io::Result<Vec<u8>> {
        let msg = rpc_msg {
            xid,
            body: rpc_body::CALL(call_body {
                rpcvers: 2,
                prog,
                vers,
                proc,
                cred: self.credential.clone(),
                verf: opaque_auth::default(),
            }),
        };
        let mut buf = Vec::new();
        msg.serialize(&mut buf)?;
        args.serialize(&mut buf)?;
        Ok(buf)
    }

    /// Sends the request and waits for the matching reply, retransmitting
    /// on the per-attempt timeout until the total deadline passes.
    async fn exchange<Resp>(&mut self, xid: u32, request: &[u8]) -> Result<Resp, ClientError>
    where
        Resp: Deserialize + Default,
    {
        let cache = self.cache.as_ref().expect("transport must exist during exchange");
        let deadline = Instant::now() + self.total_timeout;
        let mut buf = vec![0_u8; MAX_UDP_MESSAGE];

        loop {
            if Instant::now() >= deadline {
                return Err(ClientError::Timeout);
            }
            cache.socket.send(request).await?;

            let attempt_deadline = Instant::now() + self.retry_timeout;
            loop {
                let remaining = attempt_deadline
                    .min(deadline)
                    .saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                let len = match timeout(remaining, cache.socket.recv(&mut buf)).await {
                    Ok(result) => result?,
                    Err(_) => break,
                };
                let mut cursor = Cursor::new(&buf[..len]);
                let reply = match deserialize::<rpc_msg>(&mut cursor) {
                    Ok(reply) => reply,
                    Err(e) => {
                        // Not a reply we can attribute; keep waiting
                        warn!("ignoring undecodable datagram: {:?}", e);
                        continue;
                    }
                };
                if reply.xid != xid {
                    trace!("ignoring reply with stale xid {} != {}", reply.xid, xid);
                    continue;
                }
                return decode_reply(reply, &mut cursor);
            }
        }
    }
}

/// Maps a matched reply message to the call result.
fn decode_reply<Resp>(
    reply: rpc_msg,
    cursor: &mut Cursor<&[u8]>,
) -> Result<Resp, ClientError>
where
    Resp: Deserialize + Default,
{
    let rpc_body::REPLY(body) = reply.body else {
        return Err(ClientError::CantDecode(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "received a CALL in response to a CALL",
        )));
    };
    match body {
        reply_body::MSG_ACCEPTED(accepted) => match accepted.reply_data {
            accept_body::SUCCESS => {
                deserialize::<Resp>(cursor).map_err(ClientError::CantDecode)
            }
            accept_body::PROG_UNAVAIL => Err(ClientError::ProgUnavail),
            accept_body::PROG_MISMATCH(info) => {
                Err(ClientError::ProgMismatch { low: info.low, high: info.high })
            }
            accept_body::PROC_UNAVAIL => Err(ClientError::ProcUnavail),
            accept_body::GARBAGE_ARGS => Err(ClientError::GarbageArgs),
        },
        reply_body::MSG_DENIED(rejected_reply::RPC_MISMATCH(_)) => {
            Err(ClientError::RpcVersionMismatch)
        }
        reply_body::MSG_DENIED(rejected_reply::AUTH_ERROR(stat)) => {
            Err(ClientError::AuthError(stat))
        }
    }
}
