//! ONC RPC (Sun RPC) server-side authentication and transport plumbing in Rust.
//!
//! This library implements the pieces of RPC version 2 (RFC 5531) that sit
//! between a byte transport and a service procedure:
//!
//! - XDR encoding/decoding of RPC call and reply headers
//! - Decoding of untrusted AUTH_UNIX credential blobs with strict bounds checks
//! - A fixed authentication-flavor dispatch table (NONE, UNIX, SHORT)
//! - Record-marked message framing for stream transports
//! - A simple one-procedure-per-registration service helper over UDP and TCP
//! - A connection-caching call helper for simple clients
//!
//! ## Main Components
//!
//! - `protocol`: RPC message types, XDR serialization, credential decoding and
//!   the per-call authentication entry point invoked before every dispatch.
//!
//! - `server`: the [`server::SimpleServiceRegistry`] for registering individual
//!   procedures, plus UDP and TCP transports that drive the shared dispatch
//!   loop.
//!
//! - `client`: the [`client::SimpleRpcClient`] connection-cached call helper.
//!
//! ## Standards Compliance
//!
//! - RFC 5531: RPC: Remote Procedure Call Protocol Specification Version 2
//! - RFC 1832: XDR: External Data Representation Standard
//!
//! ## Usage
//!
//! Servers register procedures on a [`server::SimpleServiceRegistry`] and hand
//! it to a [`server::SimpleRpcServer`] or [`server::RpcTcpListener`]; clients
//! make calls through [`client::SimpleRpcClient`].

pub mod client;
pub mod protocol;
pub mod server;

pub use protocol::auth;
pub use protocol::xdr;
