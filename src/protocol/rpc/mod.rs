//! RPC client plumbing: call encoding, reply-header decoding, and the
//! error taxonomy the pipeline acts on.
//!
//! Errors split into two classes with very different handling:
//! [`RpcError::Transport`] routes through the reconnect supervisor, while
//! [`RpcError::Protocol`] means the stream state itself can no longer be
//! trusted and the process aborts. A reply whose header cannot be decoded
//! ([`RpcError::CantDecode`]) is dropped; its request stays in flight and
//! times out at the workload deadline.

use std::io::Cursor;

use thiserror::Error;

use crate::protocol::xdr::{self, rpc::*, XDR};

pub mod wire;

/// Errors surfaced by the wire codec and reply dispatcher.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Short write, EOF mid-record, or errno on the live stream.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The stream contents violate the protocol; not recoverable.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A reply header that would not parse; the reply is dropped.
    #[error("undecodable reply: {0}")]
    CantDecode(String),
}

/// Disposition of one RPC call, extracted from the reply header.
///
/// Stored in the message buffer after dispatch so workload callbacks can
/// check the call outcome without re-parsing the header.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ReplyStat {
    #[default]
    Success,
    ProgUnavail,
    ProgMismatch,
    ProcUnavail,
    GarbageArgs,
    RpcMismatch,
    AuthError,
}

impl ReplyStat {
    pub fn describe(&self) -> &'static str {
        match self {
            ReplyStat::Success => "success",
            ReplyStat::ProgUnavail => "program unavailable",
            ReplyStat::ProgMismatch => "program version mismatch",
            ReplyStat::ProcUnavail => "procedure unavailable",
            ReplyStat::GarbageArgs => "server could not decode arguments",
            ReplyStat::RpcMismatch => "rpc version rejected",
            ReplyStat::AuthError => "authentication rejected",
        }
    }
}

/// Decoded reply header: the correlation xid, the call outcome, and the
/// offset where procedure-specific results begin.
#[derive(Copy, Clone, Debug)]
pub struct ReplyHeader {
    pub xid: u32,
    pub stat: ReplyStat,
    pub body_offset: usize,
}

/// Serializes an RPC call into `buf`, leaving [`wire::MARK_SIZE`] bytes of
/// room at the front for the record mark. The xid is written as zero; the
/// sender stamps the real xid immediately before the write.
///
/// Returns the total message length including the mark space.
pub fn encode_call(
    buf: &mut [u8],
    call: call_body,
    args: &impl XDR,
) -> std::io::Result<usize> {
    let msg = rpc_msg { xid: 0, body: rpc_body::CALL(call) };

    let mut cursor = Cursor::new(&mut buf[wire::MARK_SIZE..]);
    msg.serialize(&mut cursor)?;
    args.serialize(&mut cursor)?;

    Ok(cursor.position() as usize + wire::MARK_SIZE)
}

/// Byte offset of the xid within an encoded message buffer (just past the
/// record mark; the xid is the first field of `rpc_msg`).
pub const XID_OFFSET: usize = wire::MARK_SIZE;

/// Stamps `xid` into an encoded call buffer.
pub fn stamp_xid(buf: &mut [u8], xid: u32) {
    buf[XID_OFFSET..XID_OFFSET + 4].copy_from_slice(&xid.to_be_bytes());
}

/// Parses the RPC reply header from a received record (no mark included).
///
/// Decode failures yield [`RpcError::CantDecode`]; a CALL where a REPLY was
/// expected is a hard protocol error.
pub fn decode_reply(buf: &[u8]) -> Result<ReplyHeader, RpcError> {
    let mut cursor = Cursor::new(buf);
    let msg: rpc_msg = xdr::deserialize(&mut cursor)
        .map_err(|e| RpcError::CantDecode(e.to_string()))?;

    let reply = match msg.body {
        rpc_body::REPLY(reply) => reply,
        rpc_body::CALL(_) => {
            return Err(RpcError::Protocol(format!(
                "received a CALL (xid {}) on a client connection",
                msg.xid
            )))
        }
    };

    let stat = match reply {
        reply_body::MSG_ACCEPTED(accepted) => match accepted.reply_data {
            accept_body::SUCCESS => ReplyStat::Success,
            accept_body::PROG_UNAVAIL => ReplyStat::ProgUnavail,
            accept_body::PROG_MISMATCH(_) => ReplyStat::ProgMismatch,
            accept_body::PROC_UNAVAIL => ReplyStat::ProcUnavail,
            accept_body::GARBAGE_ARGS => ReplyStat::GarbageArgs,
        },
        reply_body::MSG_DENIED(rejected) => match rejected {
            rejected_reply::RPC_MISMATCH(_) => ReplyStat::RpcMismatch,
            rejected_reply::AUTH_ERROR(_) => ReplyStat::AuthError,
        },
    };

    Ok(ReplyHeader { xid: msg.xid, stat, body_offset: cursor.position() as usize })
}
