//! XDR encode/decode round trips for the structures that cross the wire.

use std::io::Cursor;

use nfs_stress::protocol::xdr::mount as mount3;
use nfs_stress::protocol::xdr::nfs3;
use nfs_stress::protocol::xdr::rpc::*;
use nfs_stress::protocol::xdr::{self, XDR};

fn round_trip<T: XDR + Default>(value: &T) -> T {
    let mut buf = Vec::new();
    value.serialize(&mut buf).expect("serialize");
    assert_eq!(buf.len() % 4, 0, "xdr output must be 4-byte aligned");
    xdr::deserialize(&mut Cursor::new(&buf)).expect("deserialize")
}

#[test]
fn call_message_round_trips() {
    let cred = auth_unix {
        stamp: 7,
        machinename: b"loadgen".to_vec(),
        uid: 1000,
        gid: 100,
        gids: vec![4, 24],
    }
    .into_opaque()
    .expect("wrap cred");

    let msg = rpc_msg {
        xid: 0x01020304,
        body: rpc_body::CALL(call_body {
            rpcvers: RPC_VERSION,
            prog: nfs3::PROGRAM,
            vers: nfs3::VERSION,
            proc: 6,
            cred,
            verf: opaque_auth::default(),
        }),
    };

    let back = round_trip(&msg);
    assert_eq!(back.xid, 0x01020304);
    let rpc_body::CALL(call) = back.body else { panic!("expected call") };
    assert_eq!(call.prog, nfs3::PROGRAM);
    assert_eq!(call.proc, 6);
    assert_eq!(call.cred.flavor, auth_flavor::AUTH_UNIX);

    let unix: auth_unix =
        xdr::deserialize(&mut Cursor::new(&call.cred.body)).expect("decode auth_unix");
    assert_eq!(unix.machinename, b"loadgen");
    assert_eq!(unix.uid, 1000);
    assert_eq!(unix.gids, vec![4, 24]);
}

#[test]
fn reply_variants_round_trip() {
    let denied = rpc_msg {
        xid: 9,
        body: rpc_body::REPLY(reply_body::MSG_DENIED(rejected_reply::RPC_MISMATCH(
            mismatch_info { low: 2, high: 2 },
        ))),
    };
    let back = round_trip(&denied);
    match back.body {
        rpc_body::REPLY(reply_body::MSG_DENIED(rejected_reply::RPC_MISMATCH(info))) => {
            assert_eq!((info.low, info.high), (2, 2));
        }
        other => panic!("unexpected body: {other:?}"),
    }

    let mismatch = rpc_msg {
        xid: 10,
        body: rpc_body::REPLY(reply_body::MSG_ACCEPTED(accepted_reply {
            verf: opaque_auth::default(),
            reply_data: accept_body::PROG_MISMATCH(mismatch_info { low: 3, high: 3 }),
        })),
    };
    let back = round_trip(&mismatch);
    match back.body {
        rpc_body::REPLY(reply_body::MSG_ACCEPTED(acc)) => match acc.reply_data {
            accept_body::PROG_MISMATCH(info) => assert_eq!(info.low, 3),
            other => panic!("unexpected accept body: {other:?}"),
        },
        other => panic!("unexpected body: {other:?}"),
    }
}

#[test]
fn opaque_padding_is_applied_and_consumed() {
    let v: Vec<u8> = vec![1, 2, 3, 4, 5];
    let mut buf = Vec::new();
    v.serialize(&mut buf).expect("serialize");
    // 4 length + 5 data + 3 pad
    assert_eq!(buf.len(), 12);
    assert_eq!(&buf[9..], &[0, 0, 0]);

    let back: Vec<u8> = xdr::deserialize(&mut Cursor::new(&buf)).expect("deserialize");
    assert_eq!(back, v);
}

#[test]
fn mount_result_round_trips() {
    let res = mount3::mountres3 {
        fhs_status: mount3::mountstat3::MNT3_OK,
        mountinfo: mount3::mountres3_ok {
            fhandle: vec![0xaa; 32],
            auth_flavors: vec![1],
        },
    };
    let back = round_trip(&res);
    assert_eq!(back.fhs_status, mount3::mountstat3::MNT3_OK);
    assert_eq!(back.mountinfo.fhandle, vec![0xaa; 32]);

    let failed = mount3::mountres3 {
        fhs_status: mount3::mountstat3::MNT3ERR_ACCES,
        ..Default::default()
    };
    let back = round_trip(&failed);
    assert_eq!(back.fhs_status, mount3::mountstat3::MNT3ERR_ACCES);
    assert!(back.mountinfo.fhandle.is_empty());
}

#[test]
fn file_handle_rejects_oversize() {
    let mut buf = Vec::new();
    (nfs3::NFS3_FHSIZE + 1).serialize(&mut buf).expect("length");
    buf.extend_from_slice(&[0u8; 68]);

    let mut fh = nfs3::nfs_fh3::default();
    assert!(fh.deserialize(&mut Cursor::new(&buf)).is_err());
}

#[test]
fn fattr3_round_trips() {
    let attr = nfs3::fattr3 {
        ftype: nfs3::ftype3::NF3DIR,
        mode: 0o755,
        nlink: 2,
        uid: 65534,
        gid: 65534,
        size: 4096,
        used: 8192,
        rdev: nfs3::specdata3 { specdata1: 8, specdata2: 1 },
        fsid: 77,
        fileid: 1234,
        atime: nfs3::nfstime3 { seconds: 100, nseconds: 5 },
        mtime: nfs3::nfstime3 { seconds: 200, nseconds: 6 },
        ctime: nfs3::nfstime3 { seconds: 300, nseconds: 7 },
    };

    let back = round_trip(&attr);
    assert_eq!(back.ftype, nfs3::ftype3::NF3DIR);
    assert_eq!(back.size, 4096);
    assert_eq!(back.fileid, 1234);
    assert_eq!(back.ctime.seconds, 300);
}

#[test]
fn read_result_decodes_both_arms() {
    let ok = nfs3::READ3res {
        status: nfs3::nfsstat3::NFS3_OK,
        resok: nfs3::READ3resok {
            file_attributes: nfs3::post_op_attr::Void,
            count: 3,
            eof: true,
            data: vec![9, 8, 7],
        },
        fail_attributes: nfs3::post_op_attr::Void,
    };
    let back = round_trip(&ok);
    assert_eq!(back.status, nfs3::nfsstat3::NFS3_OK);
    assert_eq!(back.resok.data, vec![9, 8, 7]);
    assert!(back.resok.eof);

    let failed = nfs3::READ3res {
        status: nfs3::nfsstat3::NFS3ERR_IO,
        fail_attributes: nfs3::post_op_attr::attributes(nfs3::fattr3::default()),
        ..Default::default()
    };
    let back = round_trip(&failed);
    assert_eq!(back.status, nfs3::nfsstat3::NFS3ERR_IO);
    assert!(matches!(back.fail_attributes, nfs3::post_op_attr::attributes(_)));
}

#[test]
fn enum_decode_rejects_unknown_discriminants() {
    let mut buf = Vec::new();
    12345u32.serialize(&mut buf).expect("serialize");

    let res: std::io::Result<nfs3::ftype3> = xdr::deserialize(&mut Cursor::new(&buf));
    assert!(res.is_err());
}
