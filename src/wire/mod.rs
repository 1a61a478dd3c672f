//! Wire representations for IGMPv3 (RFC 3376) queries/reports and the IPv4
//! framing the core uses to transmit them.
//!
//! Raw IGMP wire encoding/decoding and IP checksum, as an external
//! collaborator specified only by the interfaces the core uses: it hands the
//! core decoded [`igmp::GroupRecord`]/[`igmp::ReportRepr`] values, and accepts
//! structured [`igmp::QueryRepr`] values back. This module is that
//! collaborator's one concrete implementation, written in the packet/`Repr`
//! style `smoltcp` uses throughout `src/iface/interface/*.rs` (a zero-copy
//! `*Packet<T>` wrapper plus a parsed, owned `*Repr`).

pub mod igmp;
pub mod ipv4;

pub use igmp::{GroupRecord, GroupRecordType, IgmpPacket, QueryRepr, ReportRepr};
pub use ipv4::ROUTER_ALERT_OPTION;
