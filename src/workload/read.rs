//! READ workload: fixed-size reads sweeping the root file through a shared,
//! atomically-advanced offset that wraps modulo the file size.

use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use tracing::error;

use crate::clock;
use crate::mount::Mount;
use crate::nfs;
use crate::pool::{Request, MSG_SIZE};
use crate::protocol::rpc::ReplyStat;
use crate::protocol::xdr;
use crate::protocol::xdr::nfs3::nfsstat3;

use super::{ReplyAction, Workload};

/// Smallest sensible read size.
pub const READ_LENGTH_MIN: u64 = 512;
/// Default read size when the positional argument is omitted.
pub const READ_LENGTH_DEFAULT: u64 = 4096;

/// Buffer space reserved for the RPC and NFS headers that precede the data
/// bytes in a READ3 reply (xid, verifier, accept status, post-op
/// attributes, count, eof, opaque length). A read sized past this reserve
/// would produce replies larger than the receive buffer.
const REPLY_HEADER_RESERVE: u64 = 512;

/// Largest read size whose reply still fits in one message buffer.
pub const READ_LENGTH_MAX: u64 = MSG_SIZE as u64 - REPLY_HEADER_RESERVE;

pub struct ReadWorkload {
    duration_secs: u64,
    length: u64,
    offset: AtomicU64,
}

impl ReadWorkload {
    pub fn new(duration_secs: u64, length: u64) -> anyhow::Result<ReadWorkload> {
        if !(READ_LENGTH_MIN..=READ_LENGTH_MAX).contains(&length) {
            bail!("invalid read length {length} (valid: {READ_LENGTH_MIN}..={READ_LENGTH_MAX})");
        }
        Ok(ReadWorkload { duration_secs, length, offset: AtomicU64::new(0) })
    }

    /// Claims the next read offset, wrapping so a request never crosses the
    /// end of the file.
    fn next_offset(&self, size: u64) -> u64 {
        let span = (size / self.length) * self.length;
        self.offset.fetch_add(self.length, Ordering::SeqCst) % span
    }

    fn encode(&self, mnt: &Arc<Mount>, req: &mut Request) -> std::io::Result<()> {
        let root = mnt.root();
        let offset = self.next_offset(root.attr.size);
        nfs::encode_read(req, mnt.cred(), &root.fh, offset, self.length as u32)
    }
}

impl Workload for ReadWorkload {
    fn start(&self, mnt: &Arc<Mount>, mut req: Box<Request>) -> anyhow::Result<()> {
        let size = mnt.root().attr.size;
        if size < self.length {
            mnt.req_free(req);
            bail!("file smaller than one request: size={size} length={}", self.length);
        }

        // Stagger job ignition so the first burst does not land in one tick.
        std::thread::sleep(Duration::from_millis(1));

        req.deadline = clock::now() + clock::secs_to_ticks(self.duration_secs);
        if let Err(e) = self.encode(mnt, &mut req) {
            mnt.req_free(req);
            return Err(e.into());
        }
        mnt.req_send(req);
        Ok(())
    }

    fn on_reply(&self, mnt: &Arc<Mount>, mut req: Box<Request>) -> ReplyAction {
        if req.msg.stat != ReplyStat::Success {
            error!("read rpc failed: {}", req.msg.stat.describe());
            mnt.req_free(req);
            return ReplyAction::Done;
        }

        // Only the status word gets decoded; hauling the data payload
        // through a second copy would just burn the cycles being measured.
        let status: nfsstat3 = match xdr::deserialize(&mut Cursor::new(req.msg.body())) {
            Ok(status) => status,
            Err(e) => {
                error!("read3 status decode failed: {e}");
                mnt.req_free(req);
                return ReplyAction::Done;
            }
        };
        if status != nfsstat3::NFS3_OK {
            error!("read failed: {status:?}");
            mnt.req_free(req);
            return ReplyAction::Done;
        }

        if req.tsc_stop >= req.deadline {
            mnt.req_free(req);
            return ReplyAction::Done;
        }

        if let Err(e) = self.encode(mnt, &mut req) {
            error!("read encode failed: {e}");
            mnt.req_free(req);
            return ReplyAction::Done;
        }
        mnt.req_send(req);
        ReplyAction::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_wrap_inside_the_file() {
        let wl = ReadWorkload::new(1, 4096).unwrap();
        let size = 3 * 4096 + 100; // three whole requests fit

        let offsets: Vec<u64> = (0..7).map(|_| wl.next_offset(size)).collect();
        assert_eq!(offsets, vec![0, 4096, 8192, 0, 4096, 8192, 0]);
        for off in offsets {
            assert!(off + 4096 <= size);
        }
    }

    #[test]
    fn length_bounds_are_enforced() {
        assert!(ReadWorkload::new(1, READ_LENGTH_MIN - 1).is_err());
        assert!(ReadWorkload::new(1, READ_LENGTH_MIN).is_ok());
        assert!(ReadWorkload::new(1, READ_LENGTH_MAX).is_ok());
        assert!(ReadWorkload::new(1, READ_LENGTH_MAX + 1).is_err());
        // The bare buffer size leaves no room for the reply headers.
        assert!(ReadWorkload::new(1, MSG_SIZE as u64).is_err());
    }
}
