//! Request pool: a fixed arena of reusable request slots and their message
//! buffers.
//!
//! All message memory is carved out of one anonymous mapping sized for
//! [`REQ_MAX`] slots plus one scratch buffer per receiver thread. The mapping
//! asks for huge pages where the platform offers them and silently falls back
//! to standard pages. Slots circulate on a free list guarded by a mutex and
//! condition variable; `alloc` blocks cooperatively when the pool is dry.
//!
//! A slot is always in exactly one place (the free list, a worker preparing
//! it, the in-flight table, or a completing callback), which the code
//! expresses by moving the owning `Box<Request>` between them.

use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::protocol::rpc::ReplyStat;
use crate::workload::Workload;

/// Maximum number of in-flight requests. Power of two; the in-flight table
/// is indexed by `xid % REQ_MAX`.
pub const REQ_MAX: usize = 1024;

/// Size of each message buffer. The first 4 bytes of an encoded call are
/// reserved for the record mark.
pub const MSG_SIZE: usize = 256 * 1024;

const HUGE_PAGE: usize = 2 << 20;

/// One anonymous mapping holding every message buffer.
struct Arena {
    base: NonNull<u8>,
    len: usize,
}

unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    fn map(len: usize) -> std::io::Result<Arena> {
        let len = (len + HUGE_PAGE - 1) & !(HUGE_PAGE - 1);
        let prot = libc::PROT_READ | libc::PROT_WRITE;
        let flags = libc::MAP_ANONYMOUS | libc::MAP_PRIVATE;

        #[cfg(target_os = "linux")]
        let super_flags = libc::MAP_HUGETLB;
        #[cfg(target_os = "freebsd")]
        let super_flags = libc::MAP_ALIGNED_SUPER;
        #[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
        let super_flags = 0;

        let mut base = unsafe {
            libc::mmap(std::ptr::null_mut(), len, prot, flags | super_flags, -1, 0)
        };
        if base == libc::MAP_FAILED && super_flags != 0 {
            debug!("huge-page mapping unavailable, falling back to standard pages");
            base = unsafe { libc::mmap(std::ptr::null_mut(), len, prot, flags, -1, 0) };
        }
        if base == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }

        Ok(Arena { base: NonNull::new(base as *mut u8).unwrap(), len })
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

/// A message buffer: one [`MSG_SIZE`] region of the arena plus the metadata
/// of the message currently held.
///
/// For an encoded call, `len` counts the whole record including mark space.
/// For a received reply, `len` is the payload length, `stat` is the call
/// outcome from the reply header, and `body_offset` is where the
/// procedure-specific results start.
pub struct MsgBuf {
    _arena: Arc<Arena>,
    ptr: NonNull<u8>,
    pub len: usize,
    pub stat: ReplyStat,
    pub body_offset: usize,
}

// Buffers reference disjoint arena regions and are uniquely owned.
unsafe impl Send for MsgBuf {}

impl MsgBuf {
    fn carve(arena: &Arc<Arena>, index: usize) -> MsgBuf {
        debug_assert!((index + 1) * MSG_SIZE <= arena.len);
        let ptr = unsafe { NonNull::new_unchecked(arena.base.as_ptr().add(index * MSG_SIZE)) };
        MsgBuf { _arena: arena.clone(), ptr, len: 0, stat: ReplyStat::default(), body_offset: 0 }
    }

    /// Full buffer capacity, independent of the current message length.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), MSG_SIZE) }
    }

    /// Mutable view of the full buffer.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), MSG_SIZE) }
    }

    /// The valid bytes of the currently held message.
    pub fn message(&self) -> &[u8] {
        &self.as_slice()[..self.len]
    }

    /// The procedure-specific result bytes of a received reply.
    pub fn body(&self) -> &[u8] {
        &self.as_slice()[self.body_offset..self.len]
    }
}

/// A reusable unit of work: timing state, the armed completion callback, and
/// the message buffer the next call is encoded into.
pub struct Request {
    /// Transaction id; valid while the request is in flight.
    pub xid: u32,
    /// Invoked by the receiver on reply delivery. `None` marks a
    /// wait-for-completion request (handshake path).
    pub callback: Option<Arc<dyn Workload>>,
    /// Set for completed no-callback requests, observed by `req_wait`.
    pub done: bool,
    /// Tick timestamp of the most recent send.
    pub tsc_start: u64,
    /// Tick timestamp of the most recent reply.
    pub tsc_stop: u64,
    /// Absolute tick deadline after which the owning job concludes.
    pub deadline: u64,
    pub msg: MsgBuf,
}

/// Fixed-size pool of request slots.
pub struct Pool {
    free: Mutex<Vec<Box<Request>>>,
    free_cv: Condvar,
}

impl Pool {
    /// Builds the pool: [`REQ_MAX`] slots plus `scratch` extra buffers,
    /// returned separately for the receiver threads.
    pub fn new(scratch: usize) -> std::io::Result<(Pool, Vec<MsgBuf>)> {
        let arena = Arc::new(Arena::map((REQ_MAX + scratch) * MSG_SIZE)?);

        let slots = (0..REQ_MAX)
            .map(|i| {
                Box::new(Request {
                    xid: 0,
                    callback: None,
                    done: false,
                    tsc_start: 0,
                    tsc_stop: 0,
                    deadline: 0,
                    msg: MsgBuf::carve(&arena, i),
                })
            })
            .collect();

        let scratch_bufs =
            (REQ_MAX..REQ_MAX + scratch).map(|i| MsgBuf::carve(&arena, i)).collect();

        Ok((Pool { free: Mutex::new(slots), free_cv: Condvar::new() }, scratch_bufs))
    }

    /// Takes a slot off the free list, blocking until one is available.
    /// The callback and done flag are cleared before return.
    pub fn alloc(&self) -> Box<Request> {
        let mut free = self.free.lock();
        while free.is_empty() {
            self.free_cv.wait(&mut free);
        }

        let mut req = free.pop().unwrap();
        req.callback = None;
        req.done = false;
        req
    }

    /// Returns a slot to the free list and wakes one waiter.
    pub fn free(&self, mut req: Box<Request>) {
        req.callback = None;
        self.free.lock().push(req);
        self.free_cv.notify_one();
    }

    #[cfg(test)]
    pub(crate) fn available(&self) -> usize {
        self.free.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_cycles_one_slot() {
        let (pool, scratch) = Pool::new(1).unwrap();
        assert_eq!(scratch.len(), 1);
        assert_eq!(pool.available(), REQ_MAX);

        let req = pool.alloc();
        assert!(req.callback.is_none());
        assert!(!req.done);
        assert_eq!(pool.available(), REQ_MAX - 1);

        pool.free(req);
        assert_eq!(pool.available(), REQ_MAX);
    }

    #[test]
    fn buffers_are_disjoint() {
        let (pool, mut scratch) = Pool::new(1).unwrap();
        let mut a = pool.alloc();
        let mut b = pool.alloc();

        a.msg.as_mut_slice()[0] = 0xaa;
        b.msg.as_mut_slice()[0] = 0xbb;
        scratch[0].as_mut_slice()[0] = 0xcc;

        assert_eq!(a.msg.as_slice()[0], 0xaa);
        assert_eq!(b.msg.as_slice()[0], 0xbb);
        assert_eq!(scratch[0].as_slice()[0], 0xcc);

        pool.free(a);
        pool.free(b);
    }

    #[test]
    fn alloc_blocks_until_a_slot_frees() {
        let (pool, _) = Pool::new(0).unwrap();
        let pool = Arc::new(pool);

        let mut held: Vec<_> = (0..REQ_MAX).map(|_| pool.alloc()).collect();
        assert_eq!(pool.available(), 0);

        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || {
                let req = pool.alloc();
                pool.free(req);
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(20));
        pool.free(held.pop().unwrap());

        waiter.join().unwrap();
    }
}
