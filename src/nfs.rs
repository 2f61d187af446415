//! NFSv3 call encoders for the operations the tool drives.
//!
//! Each encoder serializes a complete RPC call into the request's message
//! buffer, leaving the record-mark bytes for the sender to stamp. NULL goes
//! out without credentials; GETATTR and READ carry AUTH_UNIX.

use crate::pool::Request;
use crate::protocol::rpc;
use crate::protocol::xdr::nfs3::{self, nfs_fh3, NFSProgram, GETATTR3args, READ3args};
use crate::protocol::xdr::rpc::{call_body, opaque_auth};

pub fn encode_null(req: &mut Request) -> std::io::Result<()> {
    let call =
        call_body::new(nfs3::PROGRAM, nfs3::VERSION, NFSProgram::NFSPROC3_NULL as u32, None);
    req.msg.len = rpc::encode_call(req.msg.as_mut_slice(), call, &())?;
    Ok(())
}

pub fn encode_getattr(
    req: &mut Request,
    cred: opaque_auth,
    fh: &nfs_fh3,
) -> std::io::Result<()> {
    let call = call_body::new(
        nfs3::PROGRAM,
        nfs3::VERSION,
        NFSProgram::NFSPROC3_GETATTR as u32,
        Some(cred),
    );
    let args = GETATTR3args { object: fh.clone() };
    req.msg.len = rpc::encode_call(req.msg.as_mut_slice(), call, &args)?;
    Ok(())
}

pub fn encode_read(
    req: &mut Request,
    cred: opaque_auth,
    fh: &nfs_fh3,
    offset: u64,
    count: u32,
) -> std::io::Result<()> {
    let call = call_body::new(
        nfs3::PROGRAM,
        nfs3::VERSION,
        NFSProgram::NFSPROC3_READ as u32,
        Some(cred),
    );
    let args = READ3args { file: fh.clone(), offset, count };
    req.msg.len = rpc::encode_call(req.msg.as_mut_slice(), call, &args)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Pool;
    use crate::protocol::rpc::wire;
    use crate::protocol::xdr::{self, rpc::*, XDR};
    use std::io::Cursor;

    #[test]
    fn null_call_has_no_credentials() {
        let (pool, _) = Pool::new(0).unwrap();
        let mut req = pool.alloc();
        encode_null(&mut req).unwrap();

        let mut cursor = Cursor::new(&req.msg.message()[wire::MARK_SIZE..]);
        let msg: rpc_msg = xdr::deserialize(&mut cursor).unwrap();
        match msg.body {
            rpc_body::CALL(call) => {
                assert_eq!(call.prog, nfs3::PROGRAM);
                assert_eq!(call.vers, nfs3::VERSION);
                assert_eq!(call.proc, 0);
                assert_eq!(call.cred.flavor, auth_flavor::AUTH_NULL);
            }
            rpc_body::REPLY(_) => panic!("expected a call"),
        }
        pool.free(req);
    }

    #[test]
    fn read_call_carries_offset_and_count() {
        let (pool, _) = Pool::new(0).unwrap();
        let mut req = pool.alloc();
        let fh = nfs_fh3::new(&[0xab; 16]);
        let cred = auth_unix::default().into_opaque().unwrap();
        encode_read(&mut req, cred, &fh, 8192, 4096).unwrap();

        let mut cursor = Cursor::new(&req.msg.message()[wire::MARK_SIZE..]);
        let msg: rpc_msg = xdr::deserialize(&mut cursor).unwrap();
        let call = match msg.body {
            rpc_body::CALL(call) => call,
            rpc_body::REPLY(_) => panic!("expected a call"),
        };
        assert_eq!(call.proc, NFSProgram::NFSPROC3_READ as u32);
        assert_eq!(call.cred.flavor, auth_flavor::AUTH_UNIX);

        let mut args = READ3args::default();
        args.deserialize(&mut cursor).unwrap();
        assert_eq!(args.offset, 8192);
        assert_eq!(args.count, 4096);
        assert_eq!(args.file.data.as_slice(), &[0xab; 16]);
    }
}
