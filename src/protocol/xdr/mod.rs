//! XDR (RFC 1832) serialization primitives.
//!
//! Everything that crosses the wire (RPC headers, MOUNT results, NFSv3
//! arguments and replies) implements the [`XDR`] trait. Values are encoded
//! big-endian and variable-length opaques are padded to 4-byte alignment.

use std::io::{Read, Write};

use byteorder::BigEndian;
use byteorder::{ReadBytesExt, WriteBytesExt};

pub mod mount;
pub mod nfs3;
pub mod portmap;
pub mod rpc;

/// Endianness for all XDR primitives (big endian per RFC 1832).
pub type XDREndian = BigEndian;

/// Serialization to and deserialization from the XDR on-wire form.
#[allow(clippy::upper_case_acronyms)]
pub trait XDR {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()>;
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()>;
}

/// Reads a `T` from `src`, starting from `T::default()`.
pub fn deserialize<T: XDR + Default>(src: &mut impl Read) -> std::io::Result<T> {
    let mut out = T::default();
    out.deserialize(src)?;
    Ok(out)
}

/// Implements [`XDR`] for an enum represented as a 32-bit discriminant.
///
/// Deserialization rejects discriminants the enum does not define.
#[allow(non_camel_case_types)]
#[macro_export]
macro_rules! XDREnumSerde {
    ($t:ident) => {
        impl XDR for $t {
            fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
                dest.write_u32::<$crate::protocol::xdr::XDREndian>(*self as u32)
            }

            fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
                let raw: u32 = src.read_u32::<$crate::protocol::xdr::XDREndian>()?;
                match FromPrimitive::from_u32(raw) {
                    Some(v) => *self = v,
                    None => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("invalid {} discriminant {}", stringify!($t), raw),
                        ))
                    }
                }
                Ok(())
            }
        }
    };
}

/// Implements [`XDR`] for a struct by encoding each field in declaration order.
#[allow(non_camel_case_types)]
#[macro_export]
macro_rules! XDRStruct {
    (
        $t:ident,
        $($field:ident),*
    ) => {
        impl XDR for $t {
            fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
                $(self.$field.serialize(dest)?;)*
                Ok(())
            }

            fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
                $(self.$field.deserialize(src)?;)*
                Ok(())
            }
        }
    };
}

/// Implements [`XDR`] for the common XDR union shape `bool ? value : void`.
#[allow(non_camel_case_types)]
#[macro_export]
macro_rules! XDRBoolUnion {
    (
        $t:ident, $case:ident, $valtype:ty
    ) => {
        impl XDR for $t {
            fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
                match self {
                    $t::Void => false.serialize(dest),
                    $t::$case(v) => {
                        true.serialize(dest)?;
                        v.serialize(dest)
                    }
                }
            }

            fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
                let mut present = false;
                present.deserialize(src)?;
                *self = if present {
                    let mut v = <$valtype>::default();
                    v.deserialize(src)?;
                    $t::$case(v)
                } else {
                    $t::Void
                };
                Ok(())
            }
        }
    };
}

/// XDR void: present in the grammar, absent on the wire.
impl XDR for () {
    fn serialize<W: Write>(&self, _dest: &mut W) -> std::io::Result<()> {
        Ok(())
    }

    fn deserialize<R: Read>(&mut self, _src: &mut R) -> std::io::Result<()> {
        Ok(())
    }
}

impl XDR for bool {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_u32::<XDREndian>(*self as u32)
    }

    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_u32::<XDREndian>()? > 0;
        Ok(())
    }
}

impl XDR for u32 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_u32::<XDREndian>(*self)
    }

    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_u32::<XDREndian>()?;
        Ok(())
    }
}

impl XDR for u64 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_u64::<XDREndian>(*self)
    }

    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_u64::<XDREndian>()?;
        Ok(())
    }
}

/// Fixed-size opaque: raw bytes, no length prefix.
impl<const N: usize> XDR for [u8; N] {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_all(self)
    }

    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        src.read_exact(self)
    }
}

/// Variable-length opaque: 4-byte length, bytes, zero padding to alignment.
impl XDR for Vec<u8> {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_opaque(self, dest)
    }

    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let mut length: u32 = 0;
        length.deserialize(src)?;
        self.resize(length as usize, 0);
        src.read_exact(self)?;
        read_padding(length as usize, src)
    }
}

impl XDR for Vec<u32> {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        (self.len() as u32).serialize(dest)?;
        for v in self {
            v.serialize(dest)?;
        }
        Ok(())
    }

    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let mut length: u32 = 0;
        length.deserialize(src)?;
        self.resize(length as usize, 0);
        for v in self.iter_mut() {
            v.deserialize(src)?;
        }
        Ok(())
    }
}

pub(crate) fn write_opaque(bytes: &[u8], dest: &mut impl Write) -> std::io::Result<()> {
    debug_assert!(bytes.len() < u32::MAX as usize);
    (bytes.len() as u32).serialize(dest)?;
    dest.write_all(bytes)?;
    write_padding(bytes.len(), dest)
}

pub(crate) fn read_padding(len: usize, src: &mut impl Read) -> std::io::Result<()> {
    let mut pad = [0u8; 4];
    src.read_exact(&mut pad[..(4 - len % 4) % 4])
}

pub(crate) fn write_padding(len: usize, dest: &mut impl Write) -> std::io::Result<()> {
    let pad = [0u8; 4];
    dest.write_all(&pad[..(4 - len % 4) % 4])
}

pub use crate::XDRBoolUnion;
pub use crate::XDREnumSerde;
pub use crate::XDRStruct;
