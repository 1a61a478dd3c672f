//! IGMP message types: v1/v2 reports and leaves, and the IGMPv3
//! query/report formats from RFC 3376 §4.
//!
//! Follows the packet/`Repr` split `smoltcp` uses for every protocol under
//! `src/iface/interface/`: a `*Packet<T>` that borrows the wire bytes and
//! validates structure on `new_checked`, and an owned `*Repr` the core
//! actually works with. `QueryRepr::emit` produces the bytes the query
//! engine (C4) hands to the kernel socket for transmission; `ReportRepr::parse`
//! and the v1/v2 helpers are what the report processor (C3) calls on receipt.

use std::net::Ipv4Addr;

use crate::error::WireError;
use crate::wire::ipv4;

pub const TYPE_MEMBERSHIP_QUERY: u8 = 0x11;
pub const TYPE_V1_MEMBERSHIP_REPORT: u8 = 0x12;
pub const TYPE_V2_MEMBERSHIP_REPORT: u8 = 0x16;
pub const TYPE_V2_LEAVE_GROUP: u8 = 0x17;
pub const TYPE_V3_MEMBERSHIP_REPORT: u8 = 0x22;

/// Minimum length of an IGMPv3 query (no source list): RFC 3376 §4.1.
pub const V3_QUERY_MINLEN: usize = 12;

/// Upper bound on the number of sources a single transmitted
/// group-and-source-specific query can carry before IP fragmentation would
/// be required. Grounded on `igmpproxy.h`'s `MAX_IP_PACKET_LEN` (576) minus
/// the largest IP header this daemon emits (`MAX_IP_HEADER_LEN`, 60) and the
/// fixed 12-byte IGMPv3 query header.
pub const V3_QUERY_MAX_SOURCES: usize = (576 - 60 - V3_QUERY_MINLEN) / 4;

/// The six IGMPv3 group-record types (RFC 3376 §4.2.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRecordType {
    ModeIsInclude,
    ModeIsExclude,
    ChangeToIncludeMode,
    ChangeToExcludeMode,
    AllowNewSources,
    BlockOldSources,
}

impl GroupRecordType {
    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => GroupRecordType::ModeIsInclude,
            2 => GroupRecordType::ModeIsExclude,
            3 => GroupRecordType::ChangeToIncludeMode,
            4 => GroupRecordType::ChangeToExcludeMode,
            5 => GroupRecordType::AllowNewSources,
            6 => GroupRecordType::BlockOldSources,
            _ => return None,
        })
    }
}

/// One decoded IGMPv3 group record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub record_type: GroupRecordType,
    pub mcast: Ipv4Addr,
    pub sources: Vec<Ipv4Addr>,
}

/// A decoded IGMPv3 membership report: a list of group records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReportRepr {
    pub records: Vec<GroupRecord>,
}

impl ReportRepr {
    pub fn parse(buffer: &[u8]) -> Result<ReportRepr, WireError> {
        if buffer.len() < 8 {
            return Err(WireError::Truncated);
        }
        if buffer[0] != TYPE_V3_MEMBERSHIP_REPORT {
            return Err(WireError::Malformed("not a v3 report"));
        }
        if ipv4::checksum(buffer) != 0 {
            return Err(WireError::BadChecksum);
        }
        let ngroups = u16::from_be_bytes([buffer[6], buffer[7]]) as usize;
        let mut records = Vec::with_capacity(ngroups);
        let mut off = 8;
        for _ in 0..ngroups {
            if buffer.len() < off + 8 {
                return Err(WireError::Truncated);
            }
            let record_type = GroupRecordType::from_u8(buffer[off])
                .ok_or(WireError::Malformed("bad group record type"))?;
            let aux_words = buffer[off + 1] as usize;
            let nsrcs = u16::from_be_bytes([buffer[off + 2], buffer[off + 3]]) as usize;
            let mcast = Ipv4Addr::new(
                buffer[off + 4],
                buffer[off + 5],
                buffer[off + 6],
                buffer[off + 7],
            );
            let srcs_start = off + 8;
            let srcs_end = srcs_start + nsrcs * 4;
            if buffer.len() < srcs_end + aux_words * 4 {
                return Err(WireError::Truncated);
            }
            let mut sources = Vec::with_capacity(nsrcs);
            for i in 0..nsrcs {
                let s = srcs_start + i * 4;
                sources.push(Ipv4Addr::new(
                    buffer[s],
                    buffer[s + 1],
                    buffer[s + 2],
                    buffer[s + 3],
                ));
            }
            records.push(GroupRecord {
                record_type,
                mcast,
                sources,
            });
            off = srcs_end + aux_words * 4;
        }
        Ok(ReportRepr { records })
    }
}

/// A decoded/to-be-encoded IGMPv3 query.
///
/// `max_resp_code` and `qqic` are the raw wire byte (RFC 3376 §4.1.1 exponential
/// encoding); use [`encode_exp_time8`]/[`decode_exp_time8`] to convert to/from
/// a decoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRepr {
    pub group: Ipv4Addr,
    pub max_resp_code: u8,
    /// Suppress router-side processing ("S flag") — RFC 3376 §4.1.6.
    pub suppress: bool,
    pub qrv: u8,
    pub qqic: u8,
    pub sources: Vec<Ipv4Addr>,
}

impl QueryRepr {
    /// Encode into an IGMP message (checksum included, no IP framing).
    pub fn emit(&self) -> Vec<u8> {
        assert!(self.sources.len() <= V3_QUERY_MAX_SOURCES);
        let mut buf = vec![0u8; V3_QUERY_MINLEN + self.sources.len() * 4];
        buf[0] = TYPE_MEMBERSHIP_QUERY;
        buf[1] = self.max_resp_code;
        buf[4..8].copy_from_slice(&self.group.octets());
        buf[8] = (self.qrv & 0x7) | if self.suppress { 0x08 } else { 0 };
        buf[9] = self.qqic;
        buf[10..12].copy_from_slice(&(self.sources.len() as u16).to_be_bytes());
        for (i, src) in self.sources.iter().enumerate() {
            let off = V3_QUERY_MINLEN + i * 4;
            buf[off..off + 4].copy_from_slice(&src.octets());
        }
        let sum = ipv4::checksum(&buf);
        buf[2..4].copy_from_slice(&sum.to_be_bytes());
        buf
    }

    pub fn parse(buffer: &[u8]) -> Result<QueryRepr, WireError> {
        if buffer.len() < V3_QUERY_MINLEN {
            return Err(WireError::Truncated);
        }
        if buffer[0] != TYPE_MEMBERSHIP_QUERY {
            return Err(WireError::Malformed("not a membership query"));
        }
        if ipv4::checksum(buffer) != 0 {
            return Err(WireError::BadChecksum);
        }
        let group = Ipv4Addr::new(buffer[4], buffer[5], buffer[6], buffer[7]);
        let nsrcs = u16::from_be_bytes([buffer[10], buffer[11]]) as usize;
        if buffer.len() < V3_QUERY_MINLEN + nsrcs * 4 {
            return Err(WireError::Truncated);
        }
        let mut sources = Vec::with_capacity(nsrcs);
        for i in 0..nsrcs {
            let off = V3_QUERY_MINLEN + i * 4;
            sources.push(Ipv4Addr::new(
                buffer[off],
                buffer[off + 1],
                buffer[off + 2],
                buffer[off + 3],
            ));
        }
        Ok(QueryRepr {
            group,
            max_resp_code: buffer[1],
            suppress: buffer[8] & 0x08 != 0,
            qrv: buffer[8] & 0x7,
            qqic: buffer[9],
            sources,
        })
    }
}

/// A zero-copy view used only to sniff the message type before dispatching
/// to the right `*Repr::parse`, mirroring `smoltcp`'s `IgmpPacket::new_checked`
/// pattern (`src/iface/interface/igmp.rs`).
pub struct IgmpPacket<'a>(&'a [u8]);

impl<'a> IgmpPacket<'a> {
    pub fn new_checked(buffer: &'a [u8]) -> Result<Self, WireError> {
        if buffer.len() < 8 {
            return Err(WireError::Truncated);
        }
        Ok(IgmpPacket(buffer))
    }

    pub fn msg_type(&self) -> u8 {
        self.0[0]
    }

    pub fn payload(&self) -> &'a [u8] {
        self.0
    }
}

/// RFC 3376 §4.1.1/§4.1.7 floating-point encoding used for Max Resp Code and
/// QQIC. `Code < 128` encodes itself; otherwise `1|exp(3)|mant(4)` encodes
/// `(mant | 0x10) << (exp + 3)`.
pub fn decode_exp_time8(code: u8) -> u32 {
    if code < 128 {
        code as u32
    } else {
        let mant = (code & 0xf) as u32;
        let exp = ((code >> 4) & 0x7) as u32;
        (mant | 0x10) << (exp + 3)
    }
}

pub fn encode_exp_time8(decoded: u32) -> u8 {
    if decoded < 128 {
        decoded as u8
    } else {
        let mut exp = 0u32;
        while (decoded >> (exp + 3)) > 0x1f {
            exp += 1;
        }
        let mant = (decoded >> (exp + 3)) & 0xf;
        0x80 | ((exp as u8) << 4) | (mant as u8)
    }
}

/// Emit a v1/v2-style membership report or leave (8 bytes: no source list).
pub fn emit_v1v2(msg_type: u8, group: Ipv4Addr) -> Vec<u8> {
    let mut buf = vec![0u8; 8];
    buf[0] = msg_type;
    buf[4..8].copy_from_slice(&group.octets());
    let sum = ipv4::checksum(&buf);
    buf[2..4].copy_from_slice(&sum.to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exp_time_round_trips_rfc_examples() {
        for &v in &[0u32, 1, 127, 128, 200, 3174, 31744] {
            let code = encode_exp_time8(v);
            let decoded = decode_exp_time8(code);
            // The encoding is lossy above 127 (only the top 5 significant
            // bits survive); re-encoding the decoded value must be stable.
            assert_eq!(encode_exp_time8(decoded), code);
        }
        assert_eq!(decode_exp_time8(100), 100);
    }

    #[test]
    fn query_round_trips_through_wire() {
        let q = QueryRepr {
            group: Ipv4Addr::new(239, 1, 1, 1),
            max_resp_code: encode_exp_time8(100),
            suppress: false,
            qrv: 2,
            qqic: encode_exp_time8(125),
            sources: vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)],
        };
        let bytes = q.emit();
        let parsed = QueryRepr::parse(&bytes).unwrap();
        assert_eq!(parsed, q);
    }

    #[test]
    fn report_parses_is_ex_record() {
        // type, reserved, checksum(2)=0 placeholder, reserved(2), ngroups=1
        let mut buf = vec![TYPE_V3_MEMBERSHIP_REPORT, 0, 0, 0, 0, 0, 0, 1];
        // group record: type=ModeIsExclude(2), auxlen 0, nsrcs 0, mcast
        buf.extend_from_slice(&[2, 0, 0, 0]);
        buf.extend_from_slice(&Ipv4Addr::new(239, 1, 1, 1).octets());
        let sum = ipv4::checksum(&buf);
        buf[2..4].copy_from_slice(&sum.to_be_bytes());

        let report = ReportRepr::parse(&buf).unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].record_type, GroupRecordType::ModeIsExclude);
        assert_eq!(report.records[0].mcast, Ipv4Addr::new(239, 1, 1, 1));
        assert!(report.records[0].sources.is_empty());
    }

    #[test]
    fn truncated_report_is_rejected() {
        assert!(matches!(
            ReportRepr::parse(&[TYPE_V3_MEMBERSHIP_REPORT, 0, 0, 0]),
            Err(WireError::Truncated)
        ));
    }
}
