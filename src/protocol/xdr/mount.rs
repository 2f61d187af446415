//! MOUNT version 3 protocol structures (RFC 1813 Appendix I), client side.
//!
//! The tool speaks MOUNT exactly once per session, over a short-lived
//! socket, to exchange an export path for the root file handle.

// Keep original RFC naming conventions for consistency with the specification
#![allow(non_camel_case_types)]
#![allow(dead_code)]

use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::cast::FromPrimitive;

use super::*;

/// MOUNT program number for RPC.
pub const PROGRAM: u32 = 100005;
/// MOUNT protocol version 3.
pub const VERSION: u32 = 3;

/// Maximum bytes in a path name.
pub const MNTPATHLEN: u32 = 1024;
/// Maximum bytes in a V3 file handle.
pub const FHSIZE3: u32 = 64;

/// Export path sent in the MNT call, encoded as an XDR opaque string.
pub type dirpath = Vec<u8>;
/// Raw root file handle returned by a successful MNT call.
pub type fhandle3 = Vec<u8>;

/// Status codes returned by MOUNT protocol operations.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum mountstat3 {
    #[default]
    MNT3_OK = 0,
    MNT3ERR_PERM = 1,
    MNT3ERR_NOENT = 2,
    MNT3ERR_IO = 5,
    MNT3ERR_ACCES = 13,
    MNT3ERR_NOTDIR = 20,
    MNT3ERR_INVAL = 22,
    MNT3ERR_NAMETOOLONG = 63,
    MNT3ERR_NOTSUPP = 10004,
    MNT3ERR_SERVERFAULT = 10006,
}
XDREnumSerde!(mountstat3);

impl mountstat3 {
    /// Human-readable form used in mount failure reports.
    pub fn describe(&self) -> &'static str {
        match self {
            mountstat3::MNT3_OK => "ok",
            mountstat3::MNT3ERR_PERM => "not owner",
            mountstat3::MNT3ERR_NOENT => "no such file or directory",
            mountstat3::MNT3ERR_IO => "I/O error",
            mountstat3::MNT3ERR_ACCES => "permission denied",
            mountstat3::MNT3ERR_NOTDIR => "not a directory",
            mountstat3::MNT3ERR_INVAL => "invalid argument",
            mountstat3::MNT3ERR_NAMETOOLONG => "filename too long",
            mountstat3::MNT3ERR_NOTSUPP => "operation not supported",
            mountstat3::MNT3ERR_SERVERFAULT => "server fault",
        }
    }
}

/// Successful MNT result body: the root handle plus accepted auth flavors.
#[derive(Clone, Debug, Default)]
pub struct mountres3_ok {
    pub fhandle: fhandle3,
    pub auth_flavors: Vec<u32>,
}
XDRStruct!(mountres3_ok, fhandle, auth_flavors);

/// MNT result union; only MNT3_OK carries a body.
#[derive(Clone, Debug, Default)]
pub struct mountres3 {
    pub fhs_status: mountstat3,
    pub mountinfo: mountres3_ok,
}

impl XDR for mountres3 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.fhs_status.serialize(dest)?;
        if self.fhs_status == mountstat3::MNT3_OK {
            self.mountinfo.serialize(dest)?;
        }
        Ok(())
    }

    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.fhs_status.deserialize(src)?;
        if self.fhs_status == mountstat3::MNT3_OK {
            self.mountinfo.deserialize(src)?;
        }
        Ok(())
    }
}

/// Procedure numbers for MOUNT version 3.
#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, FromPrimitive, ToPrimitive)]
pub enum MountProgram {
    MOUNTPROC3_NULL = 0,
    MOUNTPROC3_MNT = 1,
    MOUNTPROC3_DUMP = 2,
    MOUNTPROC3_UMNT = 3,
    MOUNTPROC3_UMNTALL = 4,
    MOUNTPROC3_EXPORT = 5,
}
