//! XDR data types for NFS version 3 (RFC 1813), client subset.
//!
//! Only the procedures this tool drives (NULL, GETATTR, READ) carry typed
//! arguments and results here; the rest of the procedure table is kept so
//! call headers can name any RFC 1813 procedure.

// Keep original RFC naming conventions for consistency with the specification
#![allow(non_camel_case_types)]
#![allow(dead_code)]

use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::cast::FromPrimitive;
use smallvec::SmallVec;

use super::*;

/// The RPC program number for the NFS version 3 service.
pub const PROGRAM: u32 = 100003;
/// The NFS protocol version.
pub const VERSION: u32 = 3;

/// Maximum size in bytes of the opaque file handle.
pub const NFS3_FHSIZE: u32 = 64;

pub type uid3 = u32;
pub type gid3 = u32;
pub type size3 = u64;
pub type offset3 = u64;
pub type mode3 = u32;
pub type count3 = u32;
pub type fileid3 = u64;

/// Procedure numbers for NFS version 3.
#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum NFSProgram {
    NFSPROC3_NULL = 0,
    NFSPROC3_GETATTR = 1,
    NFSPROC3_SETATTR = 2,
    NFSPROC3_LOOKUP = 3,
    NFSPROC3_ACCESS = 4,
    NFSPROC3_READLINK = 5,
    NFSPROC3_READ = 6,
    NFSPROC3_WRITE = 7,
    NFSPROC3_CREATE = 8,
    NFSPROC3_MKDIR = 9,
    NFSPROC3_SYMLINK = 10,
    NFSPROC3_MKNOD = 11,
    NFSPROC3_REMOVE = 12,
    NFSPROC3_RMDIR = 13,
    NFSPROC3_RENAME = 14,
    NFSPROC3_LINK = 15,
    NFSPROC3_READDIR = 16,
    NFSPROC3_READDIRPLUS = 17,
    NFSPROC3_FSSTAT = 18,
    NFSPROC3_FSINFO = 19,
    NFSPROC3_PATHCONF = 20,
    NFSPROC3_COMMIT = 21,
}

/// Status codes returned by NFS version 3 operations.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfsstat3 {
    #[default]
    NFS3_OK = 0,
    NFS3ERR_PERM = 1,
    NFS3ERR_NOENT = 2,
    NFS3ERR_IO = 5,
    NFS3ERR_NXIO = 6,
    NFS3ERR_ACCES = 13,
    NFS3ERR_EXIST = 17,
    NFS3ERR_XDEV = 18,
    NFS3ERR_NODEV = 19,
    NFS3ERR_NOTDIR = 20,
    NFS3ERR_ISDIR = 21,
    NFS3ERR_INVAL = 22,
    NFS3ERR_FBIG = 27,
    NFS3ERR_NOSPC = 28,
    NFS3ERR_ROFS = 30,
    NFS3ERR_MLINK = 31,
    NFS3ERR_NAMETOOLONG = 63,
    NFS3ERR_NOTEMPTY = 66,
    NFS3ERR_DQUOT = 69,
    NFS3ERR_STALE = 70,
    NFS3ERR_REMOTE = 71,
    NFS3ERR_BADHANDLE = 10001,
    NFS3ERR_NOT_SYNC = 10002,
    NFS3ERR_BAD_COOKIE = 10003,
    NFS3ERR_NOTSUPP = 10004,
    NFS3ERR_TOOSMALL = 10005,
    NFS3ERR_SERVERFAULT = 10006,
    NFS3ERR_BADTYPE = 10007,
    NFS3ERR_JUKEBOX = 10008,
}
XDREnumSerde!(nfsstat3);

/// File type (RFC 1813 section 2.3.5).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum ftype3 {
    #[default]
    NF3REG = 1,
    NF3DIR = 2,
    NF3BLK = 3,
    NF3CHR = 4,
    NF3LNK = 5,
    NF3SOCK = 6,
    NF3FIFO = 7,
}
XDREnumSerde!(ftype3);

/// Major/minor numbers for block and character special files.
#[derive(Copy, Clone, Debug, Default)]
pub struct specdata3 {
    pub specdata1: u32,
    pub specdata2: u32,
}
XDRStruct!(specdata3, specdata1, specdata2);

/// The opaque NFSv3 file handle, at most [`NFS3_FHSIZE`] bytes.
///
/// Handles are small and copied on every encoded request, so the bytes live
/// inline rather than on the heap.
#[derive(Clone, Debug, Default)]
pub struct nfs_fh3 {
    pub data: SmallVec<[u8; NFS3_FHSIZE as usize]>,
}

impl nfs_fh3 {
    pub fn new(bytes: &[u8]) -> nfs_fh3 {
        nfs_fh3 { data: SmallVec::from_slice(bytes) }
    }
}

impl XDR for nfs_fh3 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_opaque(&self.data, dest)
    }

    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let mut length: u32 = 0;
        length.deserialize(src)?;
        if length > NFS3_FHSIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("file handle length {length} exceeds NFS3_FHSIZE"),
            ));
        }
        self.data.resize(length as usize, 0);
        src.read_exact(&mut self.data)?;
        read_padding(length as usize, src)
    }
}

/// Seconds/nanoseconds timestamp used for atime/mtime/ctime.
#[derive(Copy, Clone, Debug, Default)]
pub struct nfstime3 {
    pub seconds: u32,
    pub nseconds: u32,
}
XDRStruct!(nfstime3, seconds, nseconds);

/// File attributes (RFC 1813 section 2.3.5).
#[derive(Copy, Clone, Debug, Default)]
pub struct fattr3 {
    pub ftype: ftype3,
    pub mode: mode3,
    pub nlink: u32,
    pub uid: uid3,
    pub gid: gid3,
    pub size: size3,
    pub used: size3,
    pub rdev: specdata3,
    pub fsid: u64,
    pub fileid: fileid3,
    pub atime: nfstime3,
    pub mtime: nfstime3,
    pub ctime: nfstime3,
}
XDRStruct!(
    fattr3, ftype, mode, nlink, uid, gid, size, used, rdev, fsid, fileid, atime, mtime, ctime
);

/// Optional post-operation attributes attached to most replies.
#[derive(Copy, Clone, Debug, Default)]
pub enum post_op_attr {
    #[default]
    Void,
    attributes(fattr3),
}
XDRBoolUnion!(post_op_attr, attributes, fattr3);

/// Arguments for GETATTR (procedure 1).
#[derive(Clone, Debug, Default)]
pub struct GETATTR3args {
    pub object: nfs_fh3,
}
XDRStruct!(GETATTR3args, object);

/// Successful GETATTR result body.
#[derive(Copy, Clone, Debug, Default)]
pub struct GETATTR3resok {
    pub obj_attributes: fattr3,
}
XDRStruct!(GETATTR3resok, obj_attributes);

/// GETATTR result union; only NFS3_OK carries a body.
#[derive(Copy, Clone, Debug, Default)]
pub struct GETATTR3res {
    pub status: nfsstat3,
    pub resok: GETATTR3resok,
}

impl XDR for GETATTR3res {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.status.serialize(dest)?;
        if self.status == nfsstat3::NFS3_OK {
            self.resok.serialize(dest)?;
        }
        Ok(())
    }

    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.status.deserialize(src)?;
        if self.status == nfsstat3::NFS3_OK {
            self.resok.deserialize(src)?;
        }
        Ok(())
    }
}

/// Arguments for READ (procedure 6).
#[derive(Clone, Debug, Default)]
pub struct READ3args {
    pub file: nfs_fh3,
    pub offset: offset3,
    pub count: count3,
}
XDRStruct!(READ3args, file, offset, count);

/// Successful READ result body.
#[derive(Clone, Debug, Default)]
pub struct READ3resok {
    pub file_attributes: post_op_attr,
    pub count: count3,
    pub eof: bool,
    pub data: Vec<u8>,
}
XDRStruct!(READ3resok, file_attributes, count, eof, data);

/// READ result union. A failed read still carries post-op attributes.
#[derive(Clone, Debug, Default)]
pub struct READ3res {
    pub status: nfsstat3,
    pub resok: READ3resok,
    pub fail_attributes: post_op_attr,
}

impl XDR for READ3res {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.status.serialize(dest)?;
        if self.status == nfsstat3::NFS3_OK {
            self.resok.serialize(dest)
        } else {
            self.fail_attributes.serialize(dest)
        }
    }

    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.status.deserialize(src)?;
        if self.status == nfsstat3::NFS3_OK {
            self.resok.deserialize(src)
        } else {
            self.fail_attributes.deserialize(src)
        }
    }
}
