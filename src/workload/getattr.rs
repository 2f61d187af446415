//! GETATTR workload: attribute fetches against the export root, the classic
//! metadata-path stress.

use std::io::Cursor;
use std::sync::Arc;

use tracing::error;

use crate::clock;
use crate::mount::Mount;
use crate::nfs;
use crate::pool::Request;
use crate::protocol::rpc::ReplyStat;
use crate::protocol::xdr;
use crate::protocol::xdr::nfs3::{nfsstat3, GETATTR3res};

use super::{ReplyAction, Workload};

pub struct GetattrWorkload {
    duration_secs: u64,
}

impl GetattrWorkload {
    pub fn new(duration_secs: u64) -> GetattrWorkload {
        GetattrWorkload { duration_secs }
    }

    fn encode(&self, mnt: &Arc<Mount>, req: &mut Request) -> std::io::Result<()> {
        nfs::encode_getattr(req, mnt.cred(), &mnt.root().fh)
    }
}

impl Workload for GetattrWorkload {
    fn start(&self, mnt: &Arc<Mount>, mut req: Box<Request>) -> anyhow::Result<()> {
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
            error!("getattr rpc failed: {}", req.msg.stat.describe());
            mnt.req_free(req);
            return ReplyAction::Done;
        }

        let res: GETATTR3res = match xdr::deserialize(&mut Cursor::new(req.msg.body())) {
            Ok(res) => res,
            Err(e) => {
                error!("getattr3 decode failed: {e}");
                mnt.req_free(req);
                return ReplyAction::Done;
            }
        };
        if res.status != nfsstat3::NFS3_OK {
            error!("getattr failed: {:?}", res.status);
            mnt.req_free(req);
            return ReplyAction::Done;
        }

        if req.tsc_stop >= req.deadline {
            mnt.req_free(req);
            return ReplyAction::Done;
        }

        if let Err(e) = self.encode(mnt, &mut req) {
            error!("getattr encode failed: {e}");
            mnt.req_free(req);
            return ReplyAction::Done;
        }
        mnt.req_send(req);
        ReplyAction::Continue
    }
}
