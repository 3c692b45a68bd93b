//! Protocol module implements the ONC RPC version 2 protocol as specified in RFC 5531.
//!
//! This module contains three main components:
//!
//! - `xdr`: External Data Representation (XDR) for serialization and deserialization
//!   of data structures according to RFC 1832, plus the RPC call/reply wire types.
//!
//! - `auth`: Server-side authentication — the flavor dispatch table, the AUTH_UNIX
//!   credential decoder, and the per-call authentication entry point.
//!
//! - `rpc`: Record-marked message framing, the call-dispatch loop, transaction
//!   tracking, and per-connection server context.

pub mod auth;
pub mod rpc;
pub mod xdr;
