//! RPC (Remote Procedure Call) protocol plumbing as specified in RFC 5531
//! (previously RFC 1057).
//!
//! This module implements RPC version 2 with the following features:
//!
//! 1. Message framing for stream transports using the Record Marking Standard
//! 2. Transaction tracking for detecting and handling retransmissions
//! 3. Per-call authentication through the flavor dispatch table before any
//!    service procedure runs
//! 4. Program/version/procedure dispatching through the service registry
//! 5. Error handling and reporting as reply values, never aborts
//!
//! Calls are authenticated and dispatched in the order the transport
//! delivers them; this layer introduces no reordering.

mod context;
mod transaction_tracker;
mod wire;

pub use context::Context;
pub use transaction_tracker::TransactionTracker;
pub use wire::{handle_rpc, write_fragment, SocketMessageHandler};

/// Upper bound on a reassembled RPC record.
///
/// A record that grows beyond this while fragments are being collected is a
/// protocol violation and tears down the connection.
pub const MAX_RPC_RECORD_LENGTH: usize = 1024 * 1024;
