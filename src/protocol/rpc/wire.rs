//! RPC message framing and call processing.
//!
//! Implements the Record Marking Standard (RFC 5531 section 11) for sending
//! RPC messages over stream transports, plus the per-message dispatch path
//! every transport funnels into: decode the call header, authenticate the
//! caller, and hand the call to the service registry.
//!
//! Record marking delimits messages in a byte stream by prefixing each
//! fragment with a 4-byte header: the lower 31 bits carry the fragment
//! length, the highest bit marks the final fragment of a record.

use std::io::{Cursor, Read, Write};

use anyhow::anyhow;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::protocol::rpc;
use crate::protocol::xdr::{self, deserialize, Serialize};

/// Initial size of an RPC response buffer
const DEFAULT_RESPONSE_BUFFER_CAPACITY: usize = 8192;

/// Processes a single RPC message.
///
/// This function forms the core of the RPC dispatcher, shared by every
/// transport. It:
///
/// 1. Deserializes the incoming RPC message using XDR format
/// 2. Validates the RPC version number (must be version 2)
/// 3. Checks for retransmissions to preserve at-most-once semantics
/// 4. Authenticates the caller through the flavor dispatch table; a
///    rejection sends a MSG_DENIED/AUTH_ERROR reply and never reaches a
///    service procedure
/// 5. Routes accepted calls through the service registry
///
/// Authentication and decode failures are terminal per call and always
/// surface as reply values; attacker-controlled input cannot abort the
/// server through this path.
///
/// Returns true if a response was written, false otherwise (for
/// retransmissions).
pub fn handle_rpc(
    input: &mut impl Read,
    output: &mut impl Write,
    context: &mut rpc::Context,
) -> Result<bool, anyhow::Error> {
    let recv = deserialize::<xdr::rpc::rpc_msg>(input)?;
    let xid = recv.xid;
    let xdr::rpc::rpc_body::CALL(call) = recv.body else {
        error!("Unexpectedly received a Reply instead of a Call");
        return Err(anyhow!("Bad RPC Call format"));
    };

    if call.rpcvers != 2 {
        warn!("Invalid RPC version {} != 2", call.rpcvers);
        xdr::rpc::rpc_vers_mismatch(xid).serialize(output)?;
        return Ok(true);
    }

    if context.transaction_tracker.is_retransmission(xid, &context.client_addr) {
        debug!(
            "Retransmission detected, xid: {}, client_addr: {}, call: {:?}",
            xid, context.client_addr, call
        );
        return Ok(false);
    }

    let res = match context.authenticator.authenticate(&call) {
        Ok(auth) => {
            context.principal = auth.principal;
            context
                .registry
                .dispatch(xid, &call, auth.response_verifier, input, output, &context.principal)
                .map(|_| true)
        }
        Err(stat) => {
            debug!(
                "Rejecting call xid: {} from {} with {:?} (flavor {:?})",
                xid, context.client_addr, stat, call.cred.flavor
            );
            xdr::rpc::auth_error_reply_message(xid, stat).serialize(output)?;
            Ok(true)
        }
    };
    context.transaction_tracker.mark_processed(xid, &context.client_addr);
    res
}

/// Reads a single record-marked fragment from a stream.
///
/// Reads the 4-byte header, extracts the fragment length (lower 31 bits) and
/// last-fragment flag (highest bit), then reads exactly that many bytes and
/// appends them to the provided buffer. The reassembled record is bounded by
/// [`rpc::MAX_RPC_RECORD_LENGTH`]; exceeding it is a connection error.
///
/// Returns true if this was the last fragment in the RPC record.
async fn read_fragment(
    socket: &mut DuplexStream,
    append_to: &mut Vec<u8>,
) -> Result<bool, anyhow::Error> {
    let mut header_buf = [0_u8; 4];
    socket.read_exact(&mut header_buf).await?;
    let fragment_header = u32::from_be_bytes(header_buf);
    let is_last = (fragment_header & (1 << 31)) > 0;
    let length = (fragment_header & ((1 << 31) - 1)) as usize;
    trace!("Reading fragment length:{}, last:{}", length, is_last);
    if append_to.len().saturating_add(length) > rpc::MAX_RPC_RECORD_LENGTH {
        return Err(anyhow!(
            "RPC record length {} exceeds max {}",
            length,
            rpc::MAX_RPC_RECORD_LENGTH
        ));
    }
    let start_offset = append_to.len();
    append_to.resize(append_to.len() + length, 0);
    socket.read_exact(&mut append_to[start_offset..]).await?;
    trace!("Finishing Reading fragment length:{}, last:{}", length, is_last);
    Ok(is_last)
}

/// Writes data as record-marked fragments to a TCP stream.
///
/// Divides large buffers into fragments of at most 2^31 - 1 bytes, prefixes
/// each with the 4-byte record-marking header and sets the last-fragment bit
/// on the final one.
pub async fn write_fragment(
    socket: &mut tokio::net::TcpStream,
    buf: &[u8],
) -> Result<(), anyhow::Error> {
    const MAX_FRAGMENT_SIZE: usize = (1 << 31) - 1;

    let mut offset = 0;
    while offset < buf.len() {
        let remaining = buf.len() - offset;
        let fragment_size = std::cmp::min(remaining, MAX_FRAGMENT_SIZE);
        let is_last = offset + fragment_size >= buf.len();
        let fragment_header =
            if is_last { fragment_size as u32 + (1 << 31) } else { fragment_size as u32 };

        let header_buf = u32::to_be_bytes(fragment_header);
        socket.write_all(&header_buf).await?;

        trace!("Writing fragment length:{}, last:{}", fragment_size, is_last);
        socket.write_all(&buf[offset..offset + fragment_size]).await?;

        offset += fragment_size;
    }

    Ok(())
}

pub type SocketMessageType = Result<Vec<u8>, anyhow::Error>;

/// Handles RPC message processing over a stream connection.
///
/// Reassembles record-marked fragments into complete RPC records and runs
/// each record through [`handle_rpc`] in arrival order, preserving the FIFO
/// processing the protocol expects within a connection. Responses are
/// delivered through the returned channel in the same order.
#[derive(Debug)]
pub struct SocketMessageHandler {
    /// Buffer for the record currently being reassembled
    cur_fragment: Vec<u8>,
    /// Channel carrying raw socket bytes into the handler
    socket_receive_channel: DuplexStream,
    /// RPC context for request processing
    context: rpc::Context,
    /// Channel carrying completed responses back to the transport
    reply_send_channel: mpsc::UnboundedSender<SocketMessageType>,
}

impl SocketMessageHandler {
    /// Creates a new `SocketMessageHandler` instance.
    ///
    /// Returns the handler itself, a duplex stream the transport feeds
    /// received bytes into, and a receiver yielding serialized responses to
    /// write back to the peer.
    pub fn new(
        context: &rpc::Context,
    ) -> (Self, DuplexStream, mpsc::UnboundedReceiver<SocketMessageType>) {
        let (socksend, sockrecv) = tokio::io::duplex(256_000);
        let (msgsend, msgrecv) = mpsc::unbounded_channel();

        (
            Self {
                cur_fragment: Vec::new(),
                socket_receive_channel: sockrecv,
                context: context.clone(),
                reply_send_channel: msgsend,
            },
            socksend,
            msgrecv,
        )
    }

    /// Reads and processes a fragment from the socket.
    ///
    /// Appends one record-marked fragment to the current record. When the
    /// record is complete it is processed immediately on this task, keeping
    /// call order identical to arrival order. Should be called in a loop to
    /// continuously process incoming messages.
    pub async fn read(&mut self) -> Result<(), anyhow::Error> {
        let is_last =
            read_fragment(&mut self.socket_receive_channel, &mut self.cur_fragment).await?;
        if !is_last {
            return Ok(());
        }

        let record = std::mem::take(&mut self.cur_fragment);
        let mut input = Cursor::new(record);
        let mut response = Vec::with_capacity(DEFAULT_RESPONSE_BUFFER_CAPACITY);
        match handle_rpc(&mut input, &mut response, &mut self.context) {
            Ok(true) => {
                let _ = self.reply_send_channel.send(Ok(response));
            }
            Ok(false) => {
                // Retransmission, no response goes out
            }
            Err(e) => {
                error!("RPC error: {:?}", e);
                let _ = self.reply_send_channel.send(Err(e));
            }
        }
        Ok(())
    }
}
