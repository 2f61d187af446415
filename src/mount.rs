//! The mount: root aggregate for one NFS session.
//!
//! Owns the connected socket, the request pool, the in-flight table, the
//! shared statistics, and the receiver threads. The send path serializes
//! writes and xid assignment under one mutex; receivers share the socket
//! under a separate read mutex released before reply decoding so the next
//! read can start immediately. A transport failure on either path routes
//! through the reconnect supervisor, which re-queues whatever was still in
//! flight.

use std::io::Cursor;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::clock;
use crate::handshake;
use crate::inflight::{InflightTable, XidSeq};
use crate::nfs;
use crate::pool::{MsgBuf, Pool, Request};
use crate::protocol::rpc::{self, wire, ReplyStat, RpcError};
use crate::protocol::xdr::mount::mountstat3;
use crate::protocol::xdr::nfs3::{fattr3, nfs_fh3, nfsstat3, GETATTR3res};
use crate::protocol::xdr;
use crate::protocol::xdr::rpc::{auth_unix, opaque_auth};
use crate::stats::{LocalStats, MountStats};
use crate::sysexits;
use crate::workload::{ReplyAction, Workload};

/// Reconnect policy: attempts and linear backoff step (0, 3, 6, 9, 12 s).
pub const RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_BACKOFF_SECS: u64 = 3;

/// Errors establishing or tearing down a session.
#[derive(Debug, Error)]
pub enum MountError {
    #[error("invalid target {0:?}: expected [user@]host[:path]")]
    BadTarget(String),

    #[error("cannot resolve host {host}: {source}")]
    Resolve { host: String, source: std::io::Error },

    #[error("cannot connect to {addr}: {source}")]
    Connect { addr: SocketAddr, source: std::io::Error },

    #[error("mount {server}:{path} failed: {} ({status:?})", status.describe())]
    Mount { server: String, path: String, status: mountstat3 },

    #[error("mount handshake failed: {0}")]
    Handshake(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The root of the mounted export: its file handle and attributes.
#[derive(Clone, Debug)]
pub struct Vnode {
    pub name: String,
    pub fh: nfs_fh3,
    pub attr: fattr3,
}

/// Parsed `[user@]host[:path]` target.
struct Target {
    user: String,
    server: String,
    path: String,
}

impl Target {
    fn parse(spec: &str) -> Result<Target, MountError> {
        let (user, rest) = match spec.split_once('@') {
            Some((user, rest)) => (user.to_string(), rest),
            None => ("root".to_string(), spec),
        };
        let (server, path) = match rest.split_once(':') {
            Some((server, path)) => (server, path),
            None => (rest, ""),
        };
        let path = if path.is_empty() { "/" } else { path };

        if !server.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
            return Err(MountError::BadTarget(spec.to_string()));
        }

        Ok(Target { user, server: server.to_string(), path: path.to_string() })
    }
}

struct SendState {
    xids: XidSeq,
}

/// One NFS session: socket, pool, in-flight table, stats, receiver threads.
pub struct Mount {
    server: String,
    path: String,
    user: String,
    hostname: String,
    port: u16,
    addr: SocketAddr,
    cred: opaque_auth,

    conn: Mutex<Arc<TcpStream>>,
    conn_gen: AtomicU64,

    send: Mutex<SendState>,
    recv: Mutex<()>,
    resync: Mutex<()>,

    pool: Pool,
    inflight: InflightTable,
    stats: MountStats,

    wait: Mutex<Vec<Box<Request>>>,
    wait_cv: Condvar,

    jobs: AtomicU32,
    tds_max: u32,
    jobs_max: u32,

    root: OnceLock<Vnode>,
    receivers: Mutex<Vec<JoinHandle<()>>>,
}

impl Mount {
    /// Creates the session: connects, starts the receiver pool, performs
    /// the MOUNT handshake, and fetches the root attributes through the
    /// regular request pipeline.
    pub fn mount(
        rhostpath: &str,
        port: u16,
        tds_max: u32,
        jobs_max: u32,
    ) -> Result<Arc<Mount>, MountError> {
        Mount::mount_with(rhostpath, port, tds_max, jobs_max, xdr::portmap::PMAP_PORT)
    }

    /// [`Mount::mount`] with an explicit portmapper port, for servers that
    /// register their MOUNT service on a non-standard portmapper.
    pub fn mount_with(
        rhostpath: &str,
        port: u16,
        tds_max: u32,
        jobs_max: u32,
        pmap_port: u16,
    ) -> Result<Arc<Mount>, MountError> {
        let target = Target::parse(rhostpath)?;
        let hostname = local_hostname();
        let addr = resolve(&target.server, port)?;

        debug!(server = %target.server, %addr, "connecting");
        let stream = connect_backoff(addr).map_err(|e| MountError::Connect { addr, source: e })?;

        let tds_max = tds_max.max(1);
        let (pool, scratch) = Pool::new(tds_max as usize)?;

        let cred = make_cred(&hostname)?;
        let mnt = Arc::new(Mount {
            server: target.server,
            path: target.path,
            user: target.user,
            hostname,
            port,
            addr,
            cred,
            conn: Mutex::new(Arc::new(stream)),
            conn_gen: AtomicU64::new(0),
            send: Mutex::new(SendState { xids: XidSeq::new(clock::now() as u32) }),
            recv: Mutex::new(()),
            resync: Mutex::new(()),
            pool,
            inflight: InflightTable::new(),
            stats: MountStats::new(),
            wait: Mutex::new(Vec::new()),
            wait_cv: Condvar::new(),
            jobs: AtomicU32::new(0),
            tds_max,
            jobs_max,
            root: OnceLock::new(),
            receivers: Mutex::new(Vec::new()),
        });

        for (i, buf) in scratch.into_iter().enumerate() {
            let m = mnt.clone();
            let handle = std::thread::Builder::new()
                .name(format!("nfs-recv-{i}"))
                .spawn(move || m.recv_loop(buf))?;
            mnt.receivers.lock().push(handle);
        }

        let mount_port = handshake::lookup_mount_port(addr.ip(), pmap_port)?;
        let fh =
            handshake::mount_export(addr.ip(), mount_port, &mnt.server, &mnt.path, mnt.cred())?;
        debug!(fh = %hex(&fh.data), "mounted {}:{}", mnt.server, mnt.path);

        // Root attributes travel through the regular pipeline; this also
        // proves out send/receive before any job starts.
        let mut req = mnt.pool.alloc();
        nfs::encode_getattr(&mut req, mnt.cred(), &fh)?;
        let req = mnt.req_send_wait(req);

        if req.msg.stat != ReplyStat::Success {
            let stat = req.msg.stat;
            mnt.pool.free(req);
            return Err(MountError::Handshake(format!(
                "getattr on the export root failed: {}",
                stat.describe()
            )));
        }

        let res: GETATTR3res = xdr::deserialize(&mut Cursor::new(req.msg.body()))
            .map_err(|e| MountError::Handshake(format!("getattr3 decode failed: {e}")))?;
        mnt.pool.free(req);

        if res.status != nfsstat3::NFS3_OK {
            return Err(MountError::Handshake(format!(
                "getattr on the export root returned {:?}",
                res.status
            )));
        }

        let attr = res.resok.obj_attributes;
        let mode = format!("{:o}", attr.mode);
        info!(
            size = attr.size,
            ftype = ?attr.ftype,
            mode = %mode,
            fileid = attr.fileid,
            "root attributes"
        );
        let _ = mnt.root.set(Vnode { name: "/".to_string(), fh, attr });

        mnt.print();
        Ok(mnt)
    }

    /// Logs the session parameters, mirroring the mount banner.
    pub fn print(&self) {
        debug!(
            hostname = %self.hostname,
            server = %self.server,
            path = %self.path,
            user = %self.user,
            port = self.port,
            threads = self.tds_max,
            "mount established"
        );
    }

    pub fn root(&self) -> &Vnode {
        self.root.get().expect("mount handshake completed")
    }

    /// AUTH_UNIX credentials for this session.
    pub fn cred(&self) -> opaque_auth {
        self.cred.clone()
    }

    pub fn stats(&self) -> &MountStats {
        &self.stats
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn tds_max(&self) -> u32 {
        self.tds_max
    }

    pub fn jobs_max(&self) -> u32 {
        self.jobs_max
    }

    pub fn active_jobs(&self) -> u32 {
        self.jobs.load(Ordering::SeqCst)
    }

    /// Allocates a request slot, blocking until one is free.
    pub fn req_alloc(&self) -> Box<Request> {
        self.pool.alloc()
    }

    /// Returns a slot to the pool.
    pub fn req_free(&self, req: Box<Request>) {
        self.pool.free(req)
    }

    /// Ignites one job: arms the workload callback on a fresh slot and lets
    /// the workload send its first request.
    pub fn ignite(mnt: &Arc<Mount>, workload: &Arc<dyn Workload>) -> anyhow::Result<()> {
        mnt.jobs.fetch_add(1, Ordering::SeqCst);
        let mut req = mnt.pool.alloc();
        req.callback = Some(workload.clone());
        match workload.start(mnt, req) {
            Ok(()) => Ok(()),
            Err(e) => {
                mnt.jobs.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Sends a prepared request: assigns the xid, registers the slot in the
    /// in-flight table, and writes the framed message. Fire and forget; the
    /// reply arrives via the armed callback. Returns the assigned xid.
    ///
    /// The whole sequence runs under the sender mutex, which protects the
    /// xid counter, the table insert, and serialization of the stream write.
    pub fn req_send(&self, mut req: Box<Request>) -> u32 {
        let mut send = self.send.lock();

        req.done = false;
        let xid = send.xids.next();
        req.xid = xid;

        let len = req.msg.len;
        let buf = req.msg.as_mut_slice();
        wire::stamp_mark(&mut buf[..len]);
        rpc::stamp_xid(buf, xid);

        req.tsc_start = clock::now();

        let conn = self.conn.lock().clone();
        let msg_ptr = req.msg.as_slice().as_ptr();

        // Register before writing: a reply cannot overtake its own call, and
        // once the bytes are on the wire the table entry must already exist.
        // The arena bytes stay valid behind the moved box, and the sender
        // mutex keeps every other writer away until we are done.
        self.inflight.insert(req);
        let payload = unsafe { std::slice::from_raw_parts(msg_ptr, len) };

        if let Err(e) = wire::send_raw(&conn, payload) {
            // Fatal to the connection. The request stays registered; the
            // receive side observes the dead socket and the supervisor
            // re-queues everything outstanding.
            warn!("send failed (xid {xid:#x}): {e}");
            let _ = conn.shutdown(Shutdown::Both);
        }

        drop(send);
        xid
    }

    /// Sends a request with no callback and blocks until its reply has been
    /// dispatched. Handshake-only path.
    pub fn req_send_wait(&self, mut req: Box<Request>) -> Box<Request> {
        req.callback = None;
        // The box's address is stable and survives reconnect re-sends,
        // unlike the xid.
        let token = &*req as *const Request as usize;
        self.req_send(req);

        let mut wait = self.wait.lock();
        loop {
            if let Some(pos) =
                wait.iter().position(|r| &**r as *const Request as usize == token)
            {
                return wait.swap_remove(pos);
            }
            self.wait_cv.wait(&mut wait);
        }
    }

    /// Receiver loop: one of `tds_max` threads sharing the socket.
    fn recv_loop(self: Arc<Self>, mut scratch: MsgBuf) {
        let mut local = LocalStats::new(clock::now());

        loop {
            // Only one thread reads the socket at a time; the lock drops
            // before decode so the next reply can be read concurrently.
            let read_guard = self.recv.lock();
            let conn = self.conn.lock().clone();
            let gen = self.conn_gen.load(Ordering::SeqCst);
            let result = wire::recv(&conn, scratch.as_mut_slice());
            let now = clock::now();
            drop(read_guard);

            let len = match result {
                Ok(Some(len)) => len,
                Ok(None) => {
                    // Clean EOF at a record boundary. Expected once the last
                    // job has concluded; with jobs still active it means the
                    // server went away mid-test.
                    if self.active_jobs() < 1 {
                        debug!("receiver exiting on eof");
                        break;
                    }
                    warn!("unexpected eof from {}", self.server);
                    self.reconnect(gen);
                    continue;
                }
                Err(RpcError::Transport(e)) => {
                    if self.active_jobs() < 1 {
                        debug!("receiver exiting, no jobs remain: {e}");
                        break;
                    }
                    warn!("recv failed: {e}");
                    self.reconnect(gen);
                    continue;
                }
                Err(e) => {
                    // Bad record mark or oversized record: the stream can
                    // no longer be trusted.
                    error!("unrecoverable stream state: {e}");
                    std::process::abort();
                }
            };

            scratch.len = len;
            let hdr = match rpc::decode_reply(scratch.message()) {
                Ok(hdr) => hdr,
                Err(RpcError::CantDecode(e)) => {
                    // Dropped reply; the request stays in flight and times
                    // out at its workload deadline.
                    debug!("dropping undecodable reply: {e}");
                    continue;
                }
                Err(e) => {
                    error!("reply dispatch failed: {e}");
                    std::process::abort();
                }
            };
            scratch.stat = hdr.stat;
            scratch.body_offset = hdr.body_offset;

            let mut req = match self.inflight.remove(hdr.xid) {
                Some(req) => req,
                None => {
                    error!("reply xid {:#x} not in the in-flight table", hdr.xid);
                    std::process::abort();
                }
            };
            if req.xid != hdr.xid {
                error!(
                    "in-flight table corruption: slot xid {:#x}, reply xid {:#x}",
                    req.xid, hdr.xid
                );
                std::process::abort();
            }

            req.tsc_stop = now;
            let latency = now.saturating_sub(req.tsc_start);
            let sent_len = req.msg.len as u64;

            // Hand the reply payload to the callback by swapping buffers;
            // the old request buffer becomes our next scratch.
            std::mem::swap(&mut req.msg, &mut scratch);

            local.note_reply(&self.stats, latency, sent_len, len as u64, now);

            match req.callback.clone() {
                Some(cb) => {
                    if cb.on_reply(&self, req) == ReplyAction::Done
                        && self.jobs.fetch_sub(1, Ordering::SeqCst) == 1
                    {
                        // Last job concluded: half-close so the server sends
                        // EOF and peer receivers drain out cleanly.
                        let conn = self.conn.lock().clone();
                        let _ = conn.shutdown(Shutdown::Write);
                    }
                }
                None => {
                    req.done = true;
                    self.wait.lock().push(req);
                    self.wait_cv.notify_all();
                }
            }
        }

        local.drain(&self.stats);
    }

    /// Reconnect supervisor. `observed_gen` is the connection generation the
    /// caller saw fail; if another thread already replaced it, this is a
    /// no-op. On success every request still in flight gets its elapsed time
    /// credited to cumulative latency and is re-queued for send. Five
    /// consecutive failures abort the process.
    fn reconnect(&self, observed_gen: u64) {
        let _supervisor = self.resync.lock();
        if self.conn_gen.load(Ordering::SeqCst) != observed_gen {
            return;
        }

        info!(server = %self.server, "transport failure, reconnecting");
        match connect_backoff(self.addr) {
            Ok(stream) => {
                let old = std::mem::replace(&mut *self.conn.lock(), Arc::new(stream));
                let _ = old.shutdown(Shutdown::Both);
                self.conn_gen.fetch_add(1, Ordering::SeqCst);

                let now = clock::now();
                let outstanding = self.inflight.take_outstanding();
                info!(requeued = outstanding.len(), server = %self.server, "reconnected");

                for mut req in outstanding {
                    // Deliberate approximation: the abandoned round trip is
                    // charged to cumulative latency even though the server
                    // will never answer the old xid.
                    self.stats.credit_latency(now.saturating_sub(req.tsc_start));
                    req.tsc_stop = now;
                    self.req_send(req);
                }
            }
            Err(e) => {
                error!(
                    "unable to reconnect to {} after {RECONNECT_ATTEMPTS} attempts: {e}",
                    self.server
                );
                std::process::exit(sysexits::EX_OSERR);
            }
        }
    }

    /// Drains the session: waits for the job count to reach zero, closes the
    /// socket, and joins every receiver thread.
    pub fn unmount(&self) {
        while self.active_jobs() > 0 {
            std::thread::sleep(Duration::from_millis(10));
        }

        let conn = self.conn.lock().clone();
        let _ = conn.shutdown(Shutdown::Both);

        let handles = std::mem::take(&mut *self.receivers.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }
}

/// Resolves `server` to a socket address, preferring IPv4 like the original
/// AF_INET-only resolver.
fn resolve(server: &str, port: u16) -> Result<SocketAddr, MountError> {
    let addrs: Vec<SocketAddr> = (server, port)
        .to_socket_addrs()
        .map_err(|e| MountError::Resolve { host: server.to_string(), source: e })?
        .collect();

    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or(addrs.first())
        .copied()
        .ok_or_else(|| MountError::Resolve {
            host: server.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
        })
}

/// Connects with the standard retry policy: [`RECONNECT_ATTEMPTS`] tries
/// with linear backoff between them.
fn connect_backoff(addr: SocketAddr) -> std::io::Result<TcpStream> {
    let mut last = None;
    for attempt in 0..RECONNECT_ATTEMPTS {
        if attempt > 0 {
            std::thread::sleep(Duration::from_secs(attempt as u64 * RECONNECT_BACKOFF_SECS));
        }
        match TcpStream::connect(addr) {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) => {
                warn!("connect to {addr} failed (attempt {}): {e}", attempt + 1);
                last = Some(e);
            }
        }
    }
    Err(last.unwrap())
}

fn local_hostname() -> String {
    let mut buf = [0 as libc::c_char; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr(), buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    unsafe { std::ffi::CStr::from_ptr(buf.as_ptr()) }.to_string_lossy().into_owned()
}

fn make_cred(hostname: &str) -> std::io::Result<opaque_auth> {
    let stamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32;

    auth_unix {
        stamp,
        machinename: hostname.as_bytes().to_vec(),
        uid: unsafe { libc::geteuid() },
        gid: unsafe { libc::getegid() },
        gids: Vec::new(),
    }
    .into_opaque()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_defaults_user_and_path() {
        let t = Target::parse("filer").unwrap();
        assert_eq!(t.user, "root");
        assert_eq!(t.server, "filer");
        assert_eq!(t.path, "/");
    }

    #[test]
    fn target_parses_all_components() {
        let t = Target::parse("ops@filer:/export/vol0").unwrap();
        assert_eq!(t.user, "ops");
        assert_eq!(t.server, "filer");
        assert_eq!(t.path, "/export/vol0");
    }

    #[test]
    fn target_rejects_junk_hosts() {
        assert!(matches!(Target::parse("@:"), Err(MountError::BadTarget(_))));
        assert!(matches!(Target::parse("-foo:/x"), Err(MountError::BadTarget(_))));
    }
}
