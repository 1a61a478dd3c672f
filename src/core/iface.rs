//! C1: the interface table.
//!
//! Holds every configured interface (role, address, VIF index, allow-lists)
//! and owns each interface's group list (C2's `Group` records live in
//! `Interface::groups`). Grounded on `igmpproxy.h`'s `struct IfDesc` and
//! `ifvc.c`'s lookup-by-name/index/address trio (not present in this
//! retrieval pack but declared in `igmpproxy.h`: `getIfByName`, `getIfByIx`,
//! `getIfByAddress`, `isAdressValidForIf`).
//!
//! The intrusive `struct IfDesc`
//! list becomes a flat `Vec<Interface>`; callers address an interface by the
//! `IfaceId(usize)` index returned from lookups rather than a pointer, the
//! same opaque-handle discipline `timer::Handle` and `SocketHandle`
//! (`src/iface/socket_set.rs`) use.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::config::{Ipv4Net, PhyIntConfig};
use crate::core::store::Group;
use crate::error::CoreError;
use crate::timer::Handle;

/// A VIF (virtual interface) index in the kernel multicast routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VifIndex(pub u32);

/// An index into `InterfaceTable::interfaces`. Stable for the lifetime of
/// the interface (interfaces are never removed at runtime — the set is
/// fixed at startup from the config file).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IfaceId(pub usize);

/// An interface's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Upstream,
    Downstream,
    Disabled,
}

/// Per-interface IGMPv3 router state: role, address, allow-lists, querier
/// bookkeeping, and the owned group list.
#[derive(Debug)]
pub struct Interface {
    pub name: String,
    pub role: Role,
    pub addr: Ipv4Addr,
    pub vif: VifIndex,
    pub robustness: u32,
    pub threshold: u8,
    pub ratelimit: u32,
    pub altnet: Vec<Ipv4Net>,
    pub whitelist: Vec<Ipv4Net>,
    pub loopback: bool,

    /// Every downstream interface begins as querier.
    pub is_querier: bool,
    pub query_timer: Option<Handle>,
    pub other_querier_timer: Option<Handle>,
    /// Number of startup-phase general queries left to send.
    pub startup_queries_remaining: u32,

    pub query_interval: crate::time::Duration,
    pub query_response_interval: crate::time::Duration,
    pub startup_query_interval: crate::time::Duration,
    pub startup_query_count: u32,
    pub last_member_query_interval: crate::time::Duration,
    pub last_member_query_count: u32,

    pub groups: BTreeMap<Ipv4Addr, Group>,
}

impl Interface {
    pub(crate) fn new(id: IfaceId, cfg: &PhyIntConfig, addr: Ipv4Addr, loopback: bool) -> Self {
        let query_interval =
            std::time::Duration::from_secs(crate::config::DEFAULT_QUERY_INTERVAL_SECS as u64);
        Interface {
            name: cfg.name.clone(),
            role: cfg.role,
            addr,
            vif: VifIndex(id.0 as u32),
            robustness: crate::config::DEFAULT_ROBUSTNESS,
            threshold: cfg.threshold,
            ratelimit: cfg.ratelimit,
            altnet: cfg.altnet.clone(),
            whitelist: cfg.whitelist.clone(),
            loopback,
            is_querier: cfg.role == Role::Downstream,
            query_timer: None,
            other_querier_timer: None,
            startup_queries_remaining: crate::config::DEFAULT_STARTUP_QUERY_COUNT,
            query_interval,
            query_response_interval: std::time::Duration::from_secs(
                crate::config::DEFAULT_QUERY_RESPONSE_INTERVAL_SECS as u64,
            ),
            startup_query_interval: query_interval / 4,
            startup_query_count: crate::config::DEFAULT_STARTUP_QUERY_COUNT,
            last_member_query_interval: crate::time::deciseconds(
                crate::config::DEFAULT_LAST_MEMBER_QUERY_INTERVAL_DS,
            ),
            last_member_query_count: crate::config::DEFAULT_LAST_MEMBER_QUERY_COUNT,
            groups: BTreeMap::new(),
        }
    }

    /// Whether a report/query source address is acceptable on this
    /// interface per its `altnet` allow-list. An empty allow-list means
    /// "directly-connected hosts only" is not further restricted — any
    /// address reachable on the link is valid (see DESIGN.md Open
    /// Questions for why `altnet` rather than `whitelist` gates this).
    pub fn is_address_valid_for(&self, addr: Ipv4Addr) -> bool {
        self.altnet.is_empty() || self.altnet.iter().any(|net| net.contains(addr))
    }

    /// Whether reports for `group` are accepted on this interface per its
    /// `whitelist` allow-list (the per-interface group-subnet allow-list
    /// from `igmpproxy.h`'s `allowedgroups`). An empty whitelist allows
    /// every multicast group.
    pub fn is_group_allowed(&self, group: Ipv4Addr) -> bool {
        self.whitelist.is_empty() || self.whitelist.iter().any(|net| net.contains(group))
    }

    /// Group Membership Interval: `robustness * query_interval + query_response_interval`.
    pub fn gmi(&self) -> crate::time::Duration {
        self.query_interval * self.robustness + self.query_response_interval
    }

    /// Last Member Query Time: `last_member_query_interval * last_member_query_count`.
    pub fn lmqt(&self) -> crate::time::Duration {
        self.last_member_query_interval * self.last_member_query_count
    }

    /// Other Querier Present Interval: `robustness * query_interval + query_response_interval / 2`.
    pub fn oqpi(&self) -> crate::time::Duration {
        self.query_interval * self.robustness + self.query_response_interval / 2
    }
}

/// C1: the table of all configured interfaces.
#[derive(Debug, Default)]
pub struct InterfaceTable {
    interfaces: Vec<Interface>,
    upstream: Option<IfaceId>,
}

impl InterfaceTable {
    pub fn new() -> Self {
        InterfaceTable {
            interfaces: Vec::new(),
            upstream: None,
        }
    }

    /// Register an interface discovered by the (out-of-scope) config/interface
    /// discovery collaborator. Returns the handle assigned to it.
    ///
    /// `loopback` flags an interface that must never be queried or forwarded
    /// to, regardless of its configured role.
    pub fn add(
        &mut self,
        cfg: &PhyIntConfig,
        addr: Ipv4Addr,
        loopback: bool,
    ) -> Result<IfaceId, CoreError> {
        let id = IfaceId(self.interfaces.len());
        let iface = Interface::new(id, cfg, addr, loopback);
        if iface.role == Role::Upstream {
            if self.upstream.is_some() {
                return Err(CoreError::WrongRole);
            }
            self.upstream = Some(id);
        }
        self.interfaces.push(iface);
        Ok(id)
    }

    pub fn get(&self, id: IfaceId) -> Option<&Interface> {
        self.interfaces.get(id.0)
    }

    pub fn get_mut(&mut self, id: IfaceId) -> Option<&mut Interface> {
        self.interfaces.get_mut(id.0)
    }

    pub fn upstream(&self) -> Option<IfaceId> {
        self.upstream
    }

    pub fn by_name(&self, name: &str) -> Option<IfaceId> {
        self.interfaces
            .iter()
            .position(|i| i.name == name)
            .map(IfaceId)
    }

    pub fn by_vif(&self, vif: VifIndex) -> Option<IfaceId> {
        self.interfaces.iter().position(|i| i.vif == vif).map(IfaceId)
    }

    /// Lookup by source address, per `getIfByAddress`: used by the report
    /// and query acceptors to resolve a packet's receiving interface.
    pub fn by_addr(&self, addr: Ipv4Addr) -> Option<IfaceId> {
        self.interfaces.iter().position(|i| i.addr == addr).map(IfaceId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (IfaceId, &Interface)> {
        self.interfaces
            .iter()
            .enumerate()
            .map(|(i, iface)| (IfaceId(i), iface))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (IfaceId, &mut Interface)> {
        self.interfaces
            .iter_mut()
            .enumerate()
            .map(|(i, iface)| (IfaceId(i), iface))
    }

    pub fn downstream_ids(&self) -> Vec<IfaceId> {
        self.interfaces
            .iter()
            .enumerate()
            .filter(|(_, i)| i.role == Role::Downstream && !i.loopback)
            .map(|(i, _)| IfaceId(i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhyIntConfig;

    fn cfg(name: &str, role: Role) -> PhyIntConfig {
        PhyIntConfig {
            name: name.to_string(),
            role,
            ratelimit: 0,
            threshold: 1,
            altnet: Vec::new(),
            whitelist: Vec::new(),
        }
    }

    #[test]
    fn looks_up_by_name_vif_and_address() {
        let mut table = InterfaceTable::new();
        let eth0 = table
            .add(&cfg("eth0", Role::Upstream), Ipv4Addr::new(10, 0, 0, 1), false)
            .unwrap();
        let eth1 = table
            .add(
                &cfg("eth1", Role::Downstream),
                Ipv4Addr::new(192, 168, 1, 1),
                false,
            )
            .unwrap();

        assert_eq!(table.by_name("eth1"), Some(eth1));
        assert_eq!(table.by_addr(Ipv4Addr::new(10, 0, 0, 1)), Some(eth0));
        assert_eq!(table.by_vif(VifIndex(1)), Some(eth1));
        assert_eq!(table.upstream(), Some(eth0));
    }

    #[test]
    fn rejects_a_second_upstream() {
        let mut table = InterfaceTable::new();
        table
            .add(&cfg("eth0", Role::Upstream), Ipv4Addr::new(10, 0, 0, 1), false)
            .unwrap();
        let err = table
            .add(&cfg("eth2", Role::Upstream), Ipv4Addr::new(10, 0, 0, 2), false)
            .unwrap_err();
        assert_eq!(err, CoreError::WrongRole);
    }

    #[test]
    fn empty_altnet_allows_everything() {
        let iface = Interface::new(
            IfaceId(0),
            &cfg("eth1", Role::Downstream),
            Ipv4Addr::new(192, 168, 1, 1),
            false,
        );
        assert!(iface.is_address_valid_for(Ipv4Addr::new(1, 2, 3, 4)));
    }

    #[test]
    fn nonempty_altnet_restricts() {
        let mut c = cfg("eth1", Role::Downstream);
        c.altnet.push("192.168.1.0/24".parse().unwrap());
        let iface = Interface::new(IfaceId(0), &c, Ipv4Addr::new(192, 168, 1, 1), false);
        assert!(iface.is_address_valid_for(Ipv4Addr::new(192, 168, 1, 50)));
        assert!(!iface.is_address_valid_for(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn downstream_ids_excludes_loopback_and_upstream() {
        let mut table = InterfaceTable::new();
        table
            .add(&cfg("eth0", Role::Upstream), Ipv4Addr::new(10, 0, 0, 1), false)
            .unwrap();
        let eth1 = table
            .add(
                &cfg("eth1", Role::Downstream),
                Ipv4Addr::new(192, 168, 1, 1),
                false,
            )
            .unwrap();
        table
            .add(
                &cfg("lo", Role::Downstream),
                Ipv4Addr::new(127, 0, 0, 1),
                true,
            )
            .unwrap();
        assert_eq!(table.downstream_ids(), vec![eth1]);
    }

    #[test]
    fn default_timer_intervals_match_rfc_defaults() {
        let iface = Interface::new(
            IfaceId(0),
            &cfg("eth1", Role::Downstream),
            Ipv4Addr::new(192, 168, 1, 1),
            false,
        );
        assert_eq!(iface.gmi(), std::time::Duration::from_secs(260));
        assert_eq!(iface.lmqt(), std::time::Duration::from_secs(2));
        assert_eq!(iface.oqpi(), std::time::Duration::from_secs(255));
    }
}
