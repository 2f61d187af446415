//! NULL workload: measures pure RPC round trips with no arguments, no
//! credentials, and no attribute processing.

use std::sync::Arc;

use tracing::error;

use crate::clock;
use crate::mount::Mount;
use crate::nfs;
use crate::pool::Request;
use crate::protocol::rpc::ReplyStat;

use super::{ReplyAction, Workload};

pub struct NullWorkload {
    duration_secs: u64,
}

impl NullWorkload {
    pub fn new(duration_secs: u64) -> NullWorkload {
        NullWorkload { duration_secs }
    }
}

impl Workload for NullWorkload {
    fn start(&self, mnt: &Arc<Mount>, mut req: Box<Request>) -> anyhow::Result<()> {
        req.deadline = clock::now() + clock::secs_to_ticks(self.duration_secs);
        if let Err(e) = nfs::encode_null(&mut req) {
            mnt.req_free(req);
            return Err(e.into());
        }
        mnt.req_send(req);
        Ok(())
    }

    fn on_reply(&self, mnt: &Arc<Mount>, mut req: Box<Request>) -> ReplyAction {
        if req.msg.stat != ReplyStat::Success {
            error!("null rpc failed: {}", req.msg.stat.describe());
            mnt.req_free(req);
            return ReplyAction::Done;
        }

        if req.tsc_stop >= req.deadline {
            mnt.req_free(req);
            return ReplyAction::Done;
        }

        if let Err(e) = nfs::encode_null(&mut req) {
            error!("null encode failed: {e}");
            mnt.req_free(req);
            return ReplyAction::Done;
        }
        mnt.req_send(req);
        ReplyAction::Continue
    }
}
