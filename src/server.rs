//! Server-side helpers for trivially simple RPC services.
//!
//! A simple service registers one handler per (program, version, procedure)
//! tuple on a [`SimpleServiceRegistry`] and never writes its own dispatch
//! function: the registry's universal dispatch decodes the request, invokes
//! the handler with the authenticated caller principal, and encodes the
//! reply. The registry can be served over UDP ([`SimpleRpcServer`], one
//! datagram per message) and over TCP ([`RpcTcpListener`], record-marked
//! stream framing), both funneling into the same dispatch loop.
//!
//! Dispatching a procedure that was never registered for a known
//! program/version is treated as a programming error and panics by design;
//! this helper targets toy servers where a missing registration is a bug in
//! the program, not a runtime condition. The panic never applies to
//! attacker-controlled inputs: unknown programs, versions, flavors and
//! malformed arguments all produce protocol-level error replies.

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{debug, error, info, trace};

use crate::protocol::auth::{Principal, SvcAuthenticator};
use crate::protocol::rpc::{self, handle_rpc, Context, TransactionTracker};
use crate::protocol::xdr::rpc::{call_body, opaque_auth};
use crate::protocol::xdr::{self, deserialize, Deserialize, Serialize};

/// Largest UDP datagram the server will receive or send.
const MAX_UDP_MESSAGE: usize = 65507;

/// How long completed transactions are remembered for retransmission
/// suppression.
const TRANSACTION_RETENTION: Duration = Duration::from_secs(60);

/// Local stand-in for the port mapper registry.
///
/// Maps (program, version) pairs to the port their service listens on.
/// A real deployment would forward these bindings to rpcbind; here the
/// table only records what this process registered.
#[derive(Debug, Default)]
pub struct PortmapTable {
    table: HashMap<(u32, u32), u16>,
}

impl PortmapTable {
    /// Removes any binding for (prog, vers). Returns true if one existed.
    pub fn unset(&mut self, prog: u32, vers: u32) -> bool {
        self.table.remove(&(prog, vers)).is_some()
    }

    /// Records a binding for (prog, vers).
    pub fn set(&mut self, prog: u32, vers: u32, port: u16) {
        self.table.insert((prog, vers), port);
    }

    /// Looks up the port bound for (prog, vers).
    pub fn lookup(&self, prog: u32, vers: u32) -> Option<u16> {
        self.table.get(&(prog, vers)).copied()
    }
}

/// Type-erased per-procedure dispatch function.
///
/// Decodes the request from the input stream, invokes the user handler and
/// writes the full reply message (header and result) to the output stream.
type ProcedureFn = Box<
    dyn Fn(u32, opaque_auth, &mut dyn Read, &mut dyn Write, &Principal) -> io::Result<()>
        + Send
        + Sync,
>;

struct ServiceEntry {
    prog: u32,
    vers: u32,
    proc: u32,
    dispatch: ProcedureFn,
}

/// A registry of simple RPC procedures with a universal dispatch function.
///
/// Entries are added or replaced at registration time and linear-scanned on
/// every call; nothing is ever removed. The registry lives for the process
/// lifetime and is shared across transports and connections, so access is
/// guarded by a read-write lock: registration takes the write side,
/// dispatch only ever reads.
#[derive(Default)]
pub struct SimpleServiceRegistry {
    entries: RwLock<Vec<ServiceEntry>>,
    portmap: RwLock<PortmapTable>,
    local_port: AtomicU16,
}

impl SimpleServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for one (program, version, procedure) tuple.
    ///
    /// The request type is decoded from the call arguments; a decode failure
    /// produces a GARBAGE_ARGS reply. The handler receives the decoded
    /// request and the authenticated caller principal, and its return value
    /// is encoded as the reply result.
    ///
    /// Re-registering a tuple replaces the previous handler; subsequent
    /// calls dispatch to the newest registration.
    ///
    /// Any previous port-mapper binding for (prog, vers) is dropped and the
    /// pair is re-bound to the port of the transport currently serving this
    /// registry.
    ///
    /// Procedure 0 never needs to be registered: the dispatch loop answers
    /// it as the protocol-mandated no-op ping.
    pub fn register<Req, Resp, F>(&self, prog: u32, vers: u32, proc: u32, handler: F)
    where
        Req: Deserialize + Default,
        Resp: Serialize,
        F: Fn(Req, &Principal) -> Resp + Send + Sync + 'static,
    {
        let dispatch: ProcedureFn = Box::new(move |xid, verf, mut input, mut output, principal| {
            let args = match deserialize::<Req>(&mut input) {
                Ok(args) => args,
                Err(e) => {
                    debug!("cannot decode arguments for xid {}: {:?}", xid, e);
                    return xdr::rpc::garbage_args_reply_message(xid).serialize(&mut output);
                }
            };
            let result = handler(args, principal);
            xdr::rpc::success_reply_message(xid, verf).serialize(&mut output)?;
            result.serialize(&mut output)
        });

        {
            let mut portmap = self.portmap.write().expect("unable to lock portmap table");
            portmap.unset(prog, vers);
            portmap.set(prog, vers, self.local_port.load(Ordering::Relaxed));
        }

        let mut entries = self.entries.write().expect("unable to lock registry");
        let entry = ServiceEntry { prog, vers, proc, dispatch };
        match entries.iter_mut().find(|e| e.prog == prog && e.vers == vers && e.proc == proc) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    /// Records the port of the transport serving this registry and refreshes
    /// every existing port-mapper binding to point at it.
    pub fn set_local_port(&self, port: u16) {
        self.local_port.store(port, Ordering::Relaxed);
        let entries = self.entries.read().expect("unable to lock registry");
        let mut portmap = self.portmap.write().expect("unable to lock portmap table");
        for entry in entries.iter() {
            portmap.unset(entry.prog, entry.vers);
            portmap.set(entry.prog, entry.vers, port);
        }
    }

    /// Looks up the local port-mapper binding for (prog, vers).
    pub fn lookup_port(&self, prog: u32, vers: u32) -> Option<u16> {
        self.portmap.read().expect("unable to lock portmap table").lookup(prog, vers)
    }

    /// Universal dispatch function, invoked by the call-dispatch loop for
    /// every authenticated call.
    ///
    /// Procedure 0 is the protocol-mandated no-op ping and always succeeds
    /// with an empty reply, registered or not. Unknown programs and version
    /// mismatches produce the corresponding accepted-reply errors. A known
    /// (program, version) with an unregistered procedure panics: in a
    /// simple server that is a missing registration, not a runtime
    /// condition.
    ///
    /// # Panics
    ///
    /// If `call` names a registered program and version but an unregistered
    /// procedure.
    pub fn dispatch(
        &self,
        xid: u32,
        call: &call_body,
        verf: opaque_auth,
        input: &mut dyn Read,
        mut output: &mut dyn Write,
        principal: &Principal,
    ) -> Result<(), anyhow::Error> {
        if call.proc == 0 {
            trace!("ping prog:{} vers:{} xid:{}", call.prog, call.vers, xid);
            xdr::rpc::success_reply_message(xid, verf).serialize(&mut output)?;
            return Ok(());
        }

        let entries = self.entries.read().expect("unable to lock registry");

        let entry = entries
            .iter()
            .find(|e| e.prog == call.prog && e.vers == call.vers && e.proc == call.proc);
        if let Some(entry) = entry {
            trace!("dispatch prog:{} vers:{} proc:{} xid:{}", call.prog, call.vers, call.proc, xid);
            (entry.dispatch)(xid, verf, input, output, principal)?;
            return Ok(());
        }

        let mut versions = entries.iter().filter(|e| e.prog == call.prog).map(|e| e.vers);
        let Some(first_vers) = versions.next() else {
            debug!("Unknown RPC program number {}", call.prog);
            xdr::rpc::prog_unavail_reply_message(xid).serialize(&mut output)?;
            return Ok(());
        };
        let (low, high) = versions
            .fold((first_vers, first_vers), |(lo, hi), v| (lo.min(v), hi.max(v)));
        if !entries.iter().any(|e| e.prog == call.prog && e.vers == call.vers) {
            debug!(
                "Unsupported version {} for program {} (supported {}..={})",
                call.vers, call.prog, low, high
            );
            xdr::rpc::prog_mismatch_reply_message(xid, low, high).serialize(&mut output)?;
            return Ok(());
        }

        panic!(
            "procedure {} of program {} version {} was never registered",
            call.proc, call.prog, call.vers
        );
    }
}

/// Builds the per-message context shared by both transports.
fn make_context(
    local_port: u16,
    client_addr: String,
    registry: &Arc<SimpleServiceRegistry>,
    authenticator: &Arc<SvcAuthenticator>,
    transaction_tracker: &Arc<TransactionTracker>,
) -> Context {
    Context {
        local_port,
        client_addr,
        principal: Principal::default(),
        authenticator: authenticator.clone(),
        registry: registry.clone(),
        transaction_tracker: transaction_tracker.clone(),
    }
}

/// The shared UDP service transport for a [`SimpleServiceRegistry`].
///
/// One datagram carries one RPC message; the reply datagram is sent back to
/// the sender. Messages are processed sequentially on the serving task, so
/// calls are handled in arrival order.
pub struct SimpleRpcServer {
    socket: UdpSocket,
    port: u16,
    registry: Arc<SimpleServiceRegistry>,
    authenticator: Arc<SvcAuthenticator>,
    transaction_tracker: Arc<TransactionTracker>,
}

impl SimpleRpcServer {
    /// Binds the UDP transport and points the registry's port-mapper
    /// bindings at the bound port.
    pub async fn bind(addr: &str, registry: Arc<SimpleServiceRegistry>) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let port = socket.local_addr()?.port();
        registry.set_local_port(port);
        info!("RPC/UDP listening on {:?}", socket.local_addr()?);
        Ok(Self {
            socket,
            port,
            registry,
            authenticator: Arc::new(SvcAuthenticator::new()),
            transaction_tracker: Arc::new(TransactionTracker::new(TRANSACTION_RETENTION)),
        })
    }

    /// The bound socket address; useful when binding to port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receives and processes datagrams until the socket fails.
    ///
    /// Each datagram runs through authentication and registry dispatch; a
    /// malformed datagram is logged and dropped without a reply, matching
    /// UDP semantics where garbage cannot be attributed to a transaction.
    pub async fn handle_forever(&self) -> io::Result<()> {
        let mut buf = vec![0_u8; MAX_UDP_MESSAGE];
        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            let mut context = make_context(
                self.port,
                peer.to_string(),
                &self.registry,
                &self.authenticator,
                &self.transaction_tracker,
            );
            let mut input = Cursor::new(&buf[..len]);
            let mut response = Vec::new();
            match handle_rpc(&mut input, &mut response, &mut context) {
                Ok(true) => {
                    if let Err(e) = self.socket.send_to(&response, peer).await {
                        error!("cannot send reply to {}: {:?}", peer, e);
                    }
                }
                Ok(false) => {
                    // Retransmission, silently dropped
                }
                Err(e) => {
                    debug!("dropping malformed datagram from {}: {:?}", peer, e);
                }
            }
        }
    }
}

/// Interface for RPC stream servers.
///
/// Provides access to the listening socket and the accept loop. The methods
/// exist mostly so tests and embedders can work with the listener through a
/// trait object.
#[async_trait]
pub trait RpcTcp: Send + Sync {
    /// Returns the actual port number on which the server is listening.
    ///
    /// Useful when binding to port 0, which lets the OS assign any
    /// available port.
    fn get_listen_port(&self) -> u16;

    /// Returns the IP address on which the server is listening.
    fn get_listen_ip(&self) -> IpAddr;

    /// Accepts connections and processes client calls indefinitely.
    ///
    /// Returns only if the underlying TCP listener fails.
    async fn handle_forever(&self) -> io::Result<()>;
}

/// TCP transport for a [`SimpleServiceRegistry`] using record-marked
/// framing.
///
/// Each accepted connection gets its own context and processing task;
/// within a connection, calls are processed strictly in arrival order.
pub struct RpcTcpListener {
    listener: TcpListener,
    port: u16,
    registry: Arc<SimpleServiceRegistry>,
    authenticator: Arc<SvcAuthenticator>,
    transaction_tracker: Arc<TransactionTracker>,
}

impl RpcTcpListener {
    /// Binds the TCP transport to `ipstr` ("IP:PORT") and points the
    /// registry's port-mapper bindings at the bound port.
    pub async fn bind(ipstr: &str, registry: Arc<SimpleServiceRegistry>) -> io::Result<Self> {
        let (_, port_str) = ipstr.split_once(':').ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "IP Address must be of form ip:port")
        })?;
        port_str.parse::<u16>().map_err(|_| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "Port not in range 0..=65535")
        })?;

        let listener = TcpListener::bind(ipstr).await?;
        info!("RPC/TCP listening on {:?}", listener.local_addr()?);
        let port = listener.local_addr()?.port();
        registry.set_local_port(port);
        Ok(Self {
            listener,
            port,
            registry,
            authenticator: Arc::new(SvcAuthenticator::new()),
            transaction_tracker: Arc::new(TransactionTracker::new(TRANSACTION_RETENTION)),
        })
    }
}

/// Processes an established TCP connection.
///
/// Feeds received bytes into the record-marking message handler and writes
/// completed responses back as record-marked fragments.
async fn process_socket(
    mut socket: tokio::net::TcpStream,
    context: Context,
) -> Result<(), anyhow::Error> {
    let (mut message_handler, mut socksend, mut msgrecvchan) =
        rpc::SocketMessageHandler::new(&context);
    let _ = socket.set_nodelay(true);

    tokio::spawn(async move {
        loop {
            if let Err(e) = message_handler.read().await {
                debug!("Message loop broken due to {:?}", e);
                break;
            }
        }
    });
    loop {
        tokio::select! {
            _ = socket.readable() => {
                let mut buf = [0; 128_000];

                match socket.try_read(&mut buf) {
                    Ok(0) => {
                        return Ok(());
                    }
                    Ok(n) => {
                        let _ = socksend.write_all(&buf[..n]).await;
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                        // do nothing
                    }
                    Err(e) => {
                        debug!("Message handling closed : {:?}", e);
                        return Err(e.into());
                    }
                }

            },
            reply = msgrecvchan.recv() => {
                match reply {
                    Some(Err(e)) => {
                        debug!("Message handling closed : {:?}", e);
                        return Err(e);
                    }
                    Some(Ok(msg)) => {
                        if let Err(e) = rpc::write_fragment(&mut socket, &msg).await {
                            error!("Write error {:?}", e);
                        }
                    }
                    None => {
                        return Err(anyhow::anyhow!("Unexpected socket context termination"));
                    }
                }
            }
        }
    }
}

#[async_trait]
impl RpcTcp for RpcTcpListener {
    fn get_listen_port(&self) -> u16 {
        self.port
    }

    fn get_listen_ip(&self) -> IpAddr {
        self.listener.local_addr().map(|a| a.ip()).unwrap_or(IpAddr::from([0, 0, 0, 0]))
    }

    async fn handle_forever(&self) -> io::Result<()> {
        loop {
            let (socket, peer) = self.listener.accept().await?;
            let context = make_context(
                self.port,
                peer.to_string(),
                &self.registry,
                &self.authenticator,
                &self.transaction_tracker,
            );
            info!("Accepting connection from {}", context.client_addr);
            tokio::spawn(async move {
                let _ = process_socket(socket, context).await;
            });
        }
    }
}
