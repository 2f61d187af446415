//! Loopback RPC fixture: a record-marked echo server that answers PORTMAP
//! GETPORT, MOUNT3 MNT, and the NFS procedures the workloads drive.
//!
//! GETPORT points back at the fixture's own listener, so a client can run
//! its whole handshake and pipeline against one port. Knobs: NULL replies
//! can be buffered and flushed in a permuted order, and the data connection
//! can be killed after a reply quota to force a reconnect.

use std::io::Cursor;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use nfs_stress::protocol::rpc::wire;
use nfs_stress::protocol::xdr::mount as mount3;
use nfs_stress::protocol::xdr::nfs3;
use nfs_stress::protocol::xdr::portmap;
use nfs_stress::protocol::xdr::rpc::{
    accepted_reply, call_body, reply_body, rpc_body, rpc_msg,
};
use nfs_stress::protocol::xdr::{self, XDR};

#[derive(Clone)]
pub struct EchoConfig {
    /// When non-empty, NULL replies are buffered until this many are
    /// pending, then flushed in this index order.
    pub reorder: Vec<usize>,
    /// Close the connection after this many replies (applied once).
    pub die_after: Option<usize>,
    /// Size the fixture reports for the export root.
    pub file_size: u64,
}

impl Default for EchoConfig {
    fn default() -> EchoConfig {
        EchoConfig { reorder: Vec::new(), die_after: None, file_size: 1 << 20 }
    }
}

pub struct EchoServer {
    pub addr: SocketAddr,
    /// NFS replies delivered across all connections.
    pub nfs_replies: Arc<AtomicUsize>,
}

impl EchoServer {
    pub fn spawn(config: EchoConfig) -> EchoServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fixture");
        let addr = listener.local_addr().expect("fixture addr");
        let nfs_replies = Arc::new(AtomicUsize::new(0));
        let killed = Arc::new(AtomicBool::new(false));

        let counter = nfs_replies.clone();
        std::thread::spawn(move || {
            for conn in listener.incoming() {
                let Ok(stream) = conn else { break };
                let config = config.clone();
                let counter = counter.clone();
                let killed = killed.clone();
                let port = addr.port();
                std::thread::spawn(move || serve(stream, port, config, counter, killed));
            }
        });

        EchoServer { addr, nfs_replies }
    }

    /// `[user@]host:path` spec pointing at the fixture.
    pub fn rhostpath(&self) -> String {
        "127.0.0.1:/export".to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

fn root_attrs(file_size: u64) -> nfs3::fattr3 {
    nfs3::fattr3 {
        ftype: nfs3::ftype3::NF3REG,
        mode: 0o644,
        nlink: 1,
        uid: 0,
        gid: 0,
        size: file_size,
        used: file_size,
        fsid: 1,
        fileid: 2,
        ..Default::default()
    }
}

fn build_reply(xid: u32, call: &call_body, args: &mut Cursor<&[u8]>, file_size: u64) -> Vec<u8> {
    let mut reply = vec![0u8; wire::MARK_SIZE];
    let header = rpc_msg {
        xid,
        body: rpc_body::REPLY(reply_body::MSG_ACCEPTED(accepted_reply::default())),
    };
    header.serialize(&mut reply).expect("serialize reply header");

    match (call.prog, call.proc) {
        // GETPORT's result is appended by the caller, which knows the port.
        (portmap::PROGRAM, portmap::PMAPPROC_GETPORT) => {}
        (mount3::PROGRAM, 1) => {
            let res = mount3::mountres3 {
                fhs_status: mount3::mountstat3::MNT3_OK,
                mountinfo: mount3::mountres3_ok {
                    fhandle: vec![0xfe; 16],
                    auth_flavors: vec![1],
                },
            };
            res.serialize(&mut reply).expect("serialize mountres3");
        }
        (nfs3::PROGRAM, 1) => {
            let res = nfs3::GETATTR3res {
                status: nfs3::nfsstat3::NFS3_OK,
                resok: nfs3::GETATTR3resok { obj_attributes: root_attrs(file_size) },
            };
            res.serialize(&mut reply).expect("serialize getattr3res");
        }
        (nfs3::PROGRAM, 6) => {
            let read_args: nfs3::READ3args = xdr::deserialize(args).expect("read3 args");
            let res = nfs3::READ3res {
                status: nfs3::nfsstat3::NFS3_OK,
                resok: nfs3::READ3resok {
                    file_attributes: nfs3::post_op_attr::Void,
                    count: read_args.count,
                    eof: false,
                    data: vec![0u8; read_args.count as usize],
                },
                fail_attributes: nfs3::post_op_attr::Void,
            };
            res.serialize(&mut reply).expect("serialize read3res");
        }
        _ => {} // NULL and anything unrecognized: empty result body
    }

    reply
}

fn serve(
    stream: TcpStream,
    my_port: u16,
    config: EchoConfig,
    nfs_replies: Arc<AtomicUsize>,
    killed: Arc<AtomicBool>,
) {
    let mut rx = vec![0u8; 1 << 18];
    let mut pending: Vec<Vec<u8>> = Vec::new();
    let mut sent_on_conn = 0usize;

    loop {
        let len = match wire::recv(&stream, &mut rx) {
            Ok(Some(len)) => len,
            _ => return,
        };

        let mut cursor = Cursor::new(&rx[..len]);
        let msg: rpc_msg = match xdr::deserialize(&mut cursor) {
            Ok(msg) => msg,
            Err(_) => return,
        };
        let call = match msg.body {
            rpc_body::CALL(call) => call,
            rpc_body::REPLY(_) => return,
        };

        let mut cursor = Cursor::new(&rx[cursor.position() as usize..len]);
        let mut reply = build_reply(msg.xid, &call, &mut cursor, config.file_size);

        // GETPORT answers with the fixture's own listener.
        if (call.prog, call.proc) == (portmap::PROGRAM, portmap::PMAPPROC_GETPORT) {
            (my_port as u32).serialize(&mut reply).expect("serialize port");
        }

        let is_nfs = call.prog == nfs3::PROGRAM;
        let is_null = is_nfs && call.proc == 0;

        // Only NULL traffic participates in reorder batching; the handshake
        // procedures are strictly one-at-a-time.
        if is_null && !config.reorder.is_empty() {
            pending.push(reply);
            if pending.len() < config.reorder.len() {
                continue;
            }

            let batch = std::mem::take(&mut pending);
            for &idx in &config.reorder {
                let mut frame = batch[idx].clone();
                if wire::send(&stream, &mut frame).is_err() {
                    return;
                }
                nfs_replies.fetch_add(1, Ordering::SeqCst);
                sent_on_conn += 1;
            }
        } else {
            if wire::send(&stream, &mut reply).is_err() {
                return;
            }
            if is_nfs {
                nfs_replies.fetch_add(1, Ordering::SeqCst);
            }
            sent_on_conn += 1;
        }

        if let Some(limit) = config.die_after {
            if sent_on_conn >= limit && !killed.swap(true, Ordering::SeqCst) {
                let _ = stream.shutdown(Shutdown::Both);
                return;
            }
        }
    }
}
