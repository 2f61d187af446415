//! The workload contract the request pipeline drives.
//!
//! A workload supplies `start` to ignite one job's first request and
//! `on_reply` for every reply after that. A job is one logical outstanding
//! request stream, not a thread: its callback runs on whichever receiver
//! dispatched the reply, typically re-encodes a fresh call into the same
//! slot, and re-sends. Returning [`ReplyAction::Done`] concludes the job and
//! decrements the mount's active-job counter.
//!
//! No state is shared between the driver and a callback except the request
//! slot itself and whatever the workload keeps internally.

use std::sync::Arc;

use crate::mount::Mount;
use crate::pool::Request;

pub mod getattr;
pub mod null;
pub mod read;

/// What a callback decided about its job.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReplyAction {
    /// The job continues; a fresh request is typically already in flight.
    Continue,
    /// The job has concluded (deadline reached or unrecoverable reply).
    Done,
}

/// One benchmark operation: how a job starts and how it reacts to replies.
pub trait Workload: Send + Sync {
    /// Encodes and sends the first request of a job. The request's deadline
    /// is stamped here. On error the slot is returned to the pool.
    fn start(&self, mnt: &Arc<Mount>, req: Box<Request>) -> anyhow::Result<()>;

    /// Handles one delivered reply.
    fn on_reply(&self, mnt: &Arc<Mount>, req: Box<Request>) -> ReplyAction;
}
