//! XID allocation and the XID-indexed in-flight table.
//!
//! The table is a fixed array of [`REQ_MAX`] entries indexed by
//! `xid % REQ_MAX`, giving O(1) reply matching. XIDs advance by a stride
//! coprime with the table size so consecutive requests land on distant
//! cache lines; the first `REQ_MAX` xids from any seed hit distinct indices.
//!
//! Invariant: at most one entry per index. The sender inserts only into an
//! empty slot; an occupied slot means an unmatched prior call and is treated
//! as a programming error.

use parking_lot::Mutex;

use crate::pool::{Request, REQ_MAX};

/// XID increment between consecutive sends. Coprime with [`REQ_MAX`].
pub const XID_STRIDE: u32 = 11;

/// Allocator for transaction ids. Lives under the sender mutex.
pub struct XidSeq {
    next: u32,
}

impl XidSeq {
    pub fn new(seed: u32) -> XidSeq {
        XidSeq { next: seed }
    }

    pub fn next(&mut self) -> u32 {
        let xid = self.next;
        self.next = self.next.wrapping_add(XID_STRIDE);
        xid
    }
}

/// XID → request slot lookup for every call awaiting its reply.
pub struct InflightTable {
    slots: Vec<Mutex<Option<Box<Request>>>>,
}

impl InflightTable {
    pub fn new() -> InflightTable {
        InflightTable { slots: (0..REQ_MAX).map(|_| Mutex::new(None)).collect() }
    }

    /// Registers an in-flight request under its stamped xid.
    ///
    /// Panics if the slot is occupied: that means a previous call on this
    /// index never got matched, and xids can no longer be trusted.
    pub fn insert(&self, req: Box<Request>) {
        let idx = req.xid as usize % REQ_MAX;
        let mut slot = self.slots[idx].lock();
        assert!(
            slot.is_none(),
            "in-flight table slot {idx} occupied; xid {:#x} collides",
            req.xid
        );
        *slot = Some(req);
    }

    /// Takes the request registered under `xid`, if any. The caller must
    /// verify `req.xid == xid` (a mismatch is table corruption).
    pub fn remove(&self, xid: u32) -> Option<Box<Request>> {
        self.slots[xid as usize % REQ_MAX].lock().take()
    }

    /// Drains every request still awaiting a reply, for re-send after a
    /// reconnect. A request counts as outstanding when its last send is
    /// newer than its last completed reply.
    pub fn take_outstanding(&self) -> Vec<Box<Request>> {
        let mut out = Vec::new();
        for slot in &self.slots {
            let mut slot = slot.lock();
            if slot.as_ref().is_some_and(|req| req.tsc_start > req.tsc_stop) {
                out.push(slot.take().unwrap());
            }
        }
        out
    }

    /// Number of requests currently registered.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.lock().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InflightTable {
    fn default() -> Self {
        Self::new()
    }
}
