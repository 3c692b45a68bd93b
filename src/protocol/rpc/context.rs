//! Per-connection server state handed to the dispatch loop.

use std::fmt;
use std::sync::Arc;

use crate::protocol::auth::{Principal, SvcAuthenticator};
use crate::protocol::rpc::TransactionTracker;
use crate::server::SimpleServiceRegistry;

/// Represents the execution context for RPC operations.
///
/// Each transport connection (or, for datagram transports, each inbound
/// message) gets its own Context. It carries the client identity slot the
/// authentication step populates, the shared service registry consulted
/// during dispatch, and the transaction tracker used to suppress
/// retransmitted calls.
#[derive(Clone)]
pub struct Context {
    /// Port number on which the server is listening
    pub local_port: u16,

    /// Client's network address (IP:port) used for logging and request tracking
    pub client_addr: String,

    /// The caller identity produced by the authentication entry point.
    /// Overwritten on every successfully authenticated call; holders must
    /// not assume it retains any prior value.
    pub principal: Principal,

    /// Authentication flavor dispatch table, shared across connections
    pub authenticator: Arc<SvcAuthenticator>,

    /// Registered simple services, linear-scanned on dispatch
    pub registry: Arc<SimpleServiceRegistry>,

    /// Transaction state tracker for handling retransmissions
    pub transaction_tracker: Arc<TransactionTracker>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("rpc::Context")
            .field("local_port", &self.local_port)
            .field("client_addr", &self.client_addr)
            .field("principal", &self.principal)
            .finish()
    }
}
