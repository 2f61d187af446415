//! The MOUNT handshake: PORTMAP GETPORT followed by MOUNT3 MNT, each over
//! its own short-lived TCP socket.
//!
//! This is the only synchronous request/reply RPC in the tool; everything
//! after it goes through the pipelined request pool. The ephemeral sockets
//! are closed before the handshake returns.

use std::io::Cursor;
use std::net::{IpAddr, TcpStream};

use tracing::debug;

use crate::clock;
use crate::mount::MountError;
use crate::protocol::rpc::{self, wire, ReplyHeader, ReplyStat};
use crate::protocol::xdr::mount as mount3;
use crate::protocol::xdr::nfs3::nfs_fh3;
use crate::protocol::xdr::portmap;
use crate::protocol::xdr::rpc::{call_body, opaque_auth};
use crate::protocol::xdr::{self, XDR};

const HANDSHAKE_BUFSZ: usize = 1024;

/// One blocking call/reply exchange on a dedicated socket.
fn rpc_roundtrip(
    stream: &TcpStream,
    call: call_body,
    args: &impl XDR,
) -> Result<(Vec<u8>, ReplyHeader), MountError> {
    let mut tx = vec![0u8; HANDSHAKE_BUFSZ];
    let len = rpc::encode_call(&mut tx, call, args)?;
    tx.truncate(len);

    let xid = clock::now() as u32;
    rpc::stamp_xid(&mut tx, xid);
    wire::send(stream, &mut tx)?;

    let mut rx = vec![0u8; HANDSHAKE_BUFSZ];
    let n = wire::recv(stream, &mut rx)?
        .ok_or_else(|| MountError::Handshake("unexpected eof".to_string()))?;
    rx.truncate(n);

    let hdr = rpc::decode_reply(&rx)?;
    if hdr.xid != xid {
        return Err(MountError::Handshake(format!(
            "reply xid {:#x} does not match call xid {xid:#x}",
            hdr.xid
        )));
    }
    if hdr.stat != ReplyStat::Success {
        return Err(MountError::Handshake(hdr.stat.describe().to_string()));
    }

    Ok((rx, hdr))
}

/// Asks the portmapper where the MOUNT3 service listens.
pub fn lookup_mount_port(ip: IpAddr, pmap_port: u16) -> Result<u16, MountError> {
    let stream = TcpStream::connect((ip, pmap_port))?;

    let call = call_body::new(
        portmap::PROGRAM,
        portmap::VERSION,
        portmap::PMAPPROC_GETPORT,
        None,
    );
    let args = portmap::mapping {
        prog: mount3::PROGRAM,
        vers: mount3::VERSION,
        prot: portmap::IPPROTO_TCP,
        port: 0,
    };

    let (rx, hdr) = rpc_roundtrip(&stream, call, &args)?;
    let port: u32 = xdr::deserialize(&mut Cursor::new(&rx[hdr.body_offset..]))?;
    if port == 0 || port > u16::MAX as u32 {
        return Err(MountError::Handshake(
            "MOUNT3 is not registered with the portmapper".to_string(),
        ));
    }

    debug!(port, "portmapper resolved the MOUNT3 service");
    Ok(port as u16)
}

/// Performs the MNT call and returns the export's root file handle.
pub fn mount_export(
    ip: IpAddr,
    port: u16,
    server: &str,
    path: &str,
    cred: opaque_auth,
) -> Result<nfs_fh3, MountError> {
    let stream = TcpStream::connect((ip, port))?;

    let call = call_body::new(
        mount3::PROGRAM,
        mount3::VERSION,
        mount3::MountProgram::MOUNTPROC3_MNT as u32,
        Some(cred),
    );
    let args: mount3::dirpath = path.as_bytes().to_vec();

    let (rx, hdr) = rpc_roundtrip(&stream, call, &args)?;
    let res: mount3::mountres3 = xdr::deserialize(&mut Cursor::new(&rx[hdr.body_offset..]))?;

    if res.fhs_status != mount3::mountstat3::MNT3_OK {
        return Err(MountError::Mount {
            server: server.to_string(),
            path: path.to_string(),
            status: res.fhs_status,
        });
    }

    let fh = res.mountinfo.fhandle;
    if fh.len() > mount3::FHSIZE3 as usize {
        return Err(MountError::Handshake(format!(
            "server returned a {}-byte file handle",
            fh.len()
        )));
    }

    Ok(nfs_fh3::new(&fh))
}
