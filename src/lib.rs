//! nfs-stress, an NFSv3 load generator and latency measurement harness.
//!
//! The tool opens one persistent TCP connection to an NFS server and keeps a
//! configurable number of remote procedure calls in flight against a chosen
//! operation (`null`, `getattr`, `read`), producing a time series of
//! per-sample throughput, request rate, and latency suitable for plotting.
//!
//! ## Main components
//!
//! - `protocol`: XDR serialization (RFC 1832) and ONC RPC client plumbing
//!   with record-marked stream framing (RFC 5531).
//!
//! - `pool` / `inflight`: the fixed arena of request slots with huge-page
//!   backed message buffers, and the xid-indexed table that matches replies
//!   to callers in O(1).
//!
//! - `mount`: the session aggregate: sender, receiver pool, reconnect
//!   supervisor, and the MOUNT/PORTMAP handshake glue in `handshake`.
//!
//! - `stats` / `report`: receiver-local counters flushed into one shared
//!   record, sampled at a fixed cadence into a ring and rendered as status
//!   lines, a raw sample table, a summary, and gnuplot scripts.
//!
//! - `workload`: the per-operation drivers built on the callback contract.
//!
//! ## Concurrency model
//!
//! Plain OS threads over shared memory: `tds_max` receiver threads share
//! the socket under a read mutex, senders serialize under a send mutex, and
//! workload callbacks run on the receiver that dispatched the reply. There
//! is no event loop; every suspension point is a blocking socket operation,
//! a condition-variable wait, or the sampler's timed sleep.

pub mod clock;
pub mod handshake;
pub mod inflight;
pub mod mount;
pub mod nfs;
pub mod pool;
pub mod protocol;
pub mod report;
pub mod shell;
pub mod stats;
pub mod sysexits;
pub mod workload;

pub use mount::{Mount, MountError};
pub use protocol::xdr;
