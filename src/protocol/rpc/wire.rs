//! Record-marked RPC framing over a stream socket (RFC 5531, previously
//! RFC 1831 section 10).
//!
//! Every message is preceded by a 4-byte big-endian record mark: the top bit
//! flags the last fragment, the low 31 bits give the fragment length. This
//! tool produces and accepts single-fragment records only; a clear top bit is
//! a protocol error, not something to resynchronize from.
//!
//! Calls and replies interleave freely on the wire. Correlation is strictly
//! by xid, never by ordering.

use std::io::{Read, Write};
use std::net::TcpStream;

use super::RpcError;

/// Bytes reserved at the front of every message buffer for the record mark.
pub const MARK_SIZE: usize = 4;

/// Top bit of the record mark: this fragment completes the record.
pub const LAST_FRAGMENT: u32 = 1 << 31;

/// Stamps the record mark into the [`MARK_SIZE`] reserved bytes at the
/// front of `buf`, covering the rest of the buffer as a single last
/// fragment. Writing the mark into the buffer avoids a scatter write.
pub fn stamp_mark(buf: &mut [u8]) {
    debug_assert!(buf.len() >= MARK_SIZE);
    let mark = (buf.len() - MARK_SIZE) as u32 | LAST_FRAGMENT;
    buf[..MARK_SIZE].copy_from_slice(&mark.to_be_bytes());
}

/// Writes an already-marked record until every byte is on the wire.
/// Returns the total byte count delivered.
pub fn send_raw(stream: &TcpStream, buf: &[u8]) -> Result<usize, RpcError> {
    let mut stream = stream;
    stream.write_all(buf)?;
    Ok(buf.len())
}

/// Sends `buf` as one record. `buf` must start with [`MARK_SIZE`] reserved
/// bytes; the mark is stamped in place so mark and payload go out in a
/// single write. Returns the total byte count delivered.
pub fn send(stream: &TcpStream, buf: &mut [u8]) -> Result<usize, RpcError> {
    stamp_mark(buf);
    send_raw(stream, buf)
}

/// Receives one record into `buf` (which must not include mark space).
///
/// Returns `Ok(None)` on clean EOF at a record boundary. EOF inside a record
/// — including inside the 4-byte mark itself — is a transport error. A clear
/// last-fragment bit or a record larger than `buf` is a protocol error and
/// the connection cannot be salvaged.
pub fn recv(stream: &TcpStream, buf: &mut [u8]) -> Result<Option<usize>, RpcError> {
    let mut stream = stream;

    // Read the mark byte-wise so EOF on a record boundary (zero bytes in)
    // can be told apart from a mark truncated mid-way.
    let mut mark_bytes = [0u8; MARK_SIZE];
    let mut got = 0;
    while got < MARK_SIZE {
        match stream.read(&mut mark_bytes[got..]) {
            Ok(0) if got == 0 => return Ok(None),
            Ok(0) => {
                return Err(RpcError::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("eof after {got} bytes of a record mark"),
                )))
            }
            Ok(n) => got += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }

    let mark = u32::from_be_bytes(mark_bytes);
    if mark & LAST_FRAGMENT == 0 {
        return Err(RpcError::Protocol(format!(
            "record mark {mark:#010x} lacks the last-fragment bit"
        )));
    }

    let length = (mark & !LAST_FRAGMENT) as usize;
    if length > buf.len() {
        return Err(RpcError::Protocol(format!(
            "record length {} exceeds buffer capacity {}",
            length,
            buf.len()
        )));
    }

    stream.read_exact(&mut buf[..length])?;

    Ok(Some(length))
}
