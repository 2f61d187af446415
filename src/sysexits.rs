//! BSD `sysexits(3)` exit codes used by the CLI and the reconnect
//! supervisor's last-resort abort.

pub const EX_OK: i32 = 0;
/// Command line usage error.
pub const EX_USAGE: i32 = 64;
/// Input data was incorrect in some way.
pub const EX_DATAERR: i32 = 65;
/// Host name lookup failure.
pub const EX_NOHOST: i32 = 68;
/// Operating system error (resource exhaustion and kin).
pub const EX_OSERR: i32 = 71;
/// Error while doing I/O on some file.
pub const EX_IOERR: i32 = 74;
/// Remote system returned something impossible during a protocol exchange.
pub const EX_PROTOCOL: i32 = 76;
/// Insufficient permission to perform the operation.
pub const EX_NOPERM: i32 = 77;
