//! Portmap protocol structures (RFC 1833 / RFC 1057 Appendix A), client side.
//!
//! Used once at mount time to resolve the port the MOUNT service listens on.

// Keep original RFC naming conventions for consistency with the specification
#![allow(non_camel_case_types)]
#![allow(dead_code)]

use std::io::{Read, Write};

use super::*;

/// Portmap RPC program number.
pub const PROGRAM: u32 = 100000;
/// Portmap RPC version number.
pub const VERSION: u32 = 2;
/// Well-known port the portmapper itself listens on.
pub const PMAP_PORT: u16 = 111;

/// Protocol number for TCP/IP.
pub const IPPROTO_TCP: u32 = 6;
/// Protocol number for UDP/IP.
pub const IPPROTO_UDP: u32 = 17;

/// GETPORT procedure number.
pub const PMAPPROC_GETPORT: u32 = 3;

/// A program/version/protocol triple to resolve, or a registration entry.
#[derive(Copy, Clone, Debug, Default)]
#[repr(C)]
pub struct mapping {
    pub prog: u32,
    pub vers: u32,
    pub prot: u32,
    pub port: u32,
}
XDRStruct!(mapping, prog, vers, prot, port);
