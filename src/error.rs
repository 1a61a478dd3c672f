//! Error types.
//!
//! Modeled on smoltcp's `iface::interface::igmp::MulticastError`
//! (`src/iface/interface/igmp.rs`): a small `Copy` enum, a hand-written
//! `Display`, and a `std::error::Error` impl. Nothing here unwinds on
//! malformed input; the core always drops-and-logs instead of
//! returning an error up to the event loop except where the operation is
//! genuinely fatal (opening the raw socket, initializing the kernel mroute
//! table at startup).

use core::fmt;
use std::net::Ipv4Addr;

/// An error raised by a core (C1-C5) operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    /// `group_add` was asked to create a group for a non-multicast address.
    NotMulticast(Ipv4Addr),
    /// A lookup by name, VIF index, or address found nothing.
    NoSuchInterface,
    /// The interface is not in the role the operation requires
    /// (e.g. a report arrived on the upstream interface).
    WrongRole,
    /// The report's source address does not pass `is_address_valid_for`.
    AddressNotAllowed(Ipv4Addr),
    /// The record's group-compatibility version does not match the
    /// interface's current `compat_version`.
    VersionMismatch,
    /// The packet originated from the receiving interface's own address.
    FromSelf,
    /// The wire collaborator rejected the packet as structurally invalid.
    Malformed,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::NotMulticast(addr) => write!(f, "{addr} is not a multicast address"),
            CoreError::NoSuchInterface => write!(f, "no such interface"),
            CoreError::WrongRole => write!(f, "interface is not in the required role"),
            CoreError::AddressNotAllowed(addr) => {
                write!(f, "{addr} is not in the interface's allow-list")
            }
            CoreError::VersionMismatch => write!(f, "record version does not match compat_version"),
            CoreError::FromSelf => write!(f, "packet originated from interface's own address"),
            CoreError::Malformed => write!(f, "malformed packet"),
        }
    }
}

impl std::error::Error for CoreError {}

/// An error raised by the wire (IGMP decode) collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// The buffer ended before a length field said it should.
    Truncated,
    /// The IGMP checksum did not validate.
    BadChecksum,
    /// A structurally invalid field (bad type, bad record type, ...).
    Malformed(&'static str),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Truncated => write!(f, "packet truncated"),
            WireError::BadChecksum => write!(f, "bad IGMP checksum"),
            WireError::Malformed(what) => write!(f, "malformed packet: {what}"),
        }
    }
}

impl std::error::Error for WireError {}

impl From<WireError> for CoreError {
    fn from(_: WireError) -> Self {
        CoreError::Malformed
    }
}

/// An error raised by the kernel collaborator (route/filter programming).
///
/// Kernel call failures are logged at ERR and otherwise swallowed:
/// the in-process model is left as though the call had succeeded, so the
/// next aggregation pass has a chance to converge. Callers therefore log
/// this error themselves; it is not propagated as a hard failure.
#[derive(Debug)]
pub struct KernelError {
    pub action: &'static str,
    pub errno: i32,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed, errno={}", self.action, self.errno)
    }
}

impl std::error::Error for KernelError {}

/// An error raised while parsing `/etc/igmpproxy.conf`.
#[derive(Debug)]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ConfigError {}
