//! C5: the upstream membership aggregator and kernel forwarder.
//!
//! Grounded on `mcgroup.c`'s `sendJoinLeaveUpstream`/`addMRoute` pairing
//! (not present in this retrieval pack but declared in `igmpproxy.h`'s
//! `struct Membership`/`RoutingTable` families) and on RFC 4605 §4.1's merge
//! table. The original keeps one global `MCTable`, insertion-ordered and
//! searched linearly; here each group's aggregate is a `BTreeMap` entry
//! keyed by the group address, rebuilt from scratch on every call rather
//! than patched incrementally — cheap enough given a group's downstream
//! interface count is always small, and it sidesteps an entire class of
//! "forgot to undo the old contribution" bugs the incremental original is
//! prone to.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use crate::core::iface::Role;
use crate::core::store::FilterMode;
use crate::core::Proxy;
use crate::kernel::{self, KernelRouter};

/// The upstream-facing aggregate for one multicast group: `M(G)` plus the
/// bookkeeping needed to know which per-source kernel routes are currently
/// installed.
#[derive(Debug, Clone)]
pub struct Membership {
    pub mode: FilterMode,
    pub sources: BTreeSet<Ipv4Addr>,
    /// VIFs of every downstream interface that currently has a record for
    /// this group — the TTL vector an activated route is installed with.
    pub downstream_vifs: Vec<u32>,
    /// Origins for which `KernelRouter::add_route` has actually been called,
    /// i.e. routes activated by a prior data-driven upcall
    /// ([`handle_data_upcall`]), as opposed to merely permitted by the
    /// filter.
    active_routes: BTreeSet<Ipv4Addr>,
}

impl Membership {
    fn new(mode: FilterMode, sources: BTreeSet<Ipv4Addr>, downstream_vifs: Vec<u32>) -> Self {
        Membership {
            mode,
            sources,
            downstream_vifs,
            active_routes: BTreeSet::new(),
        }
    }

    /// Whether `origin` is currently permitted to be forwarded under this
    /// membership's filter.
    fn admits(&self, origin: Ipv4Addr) -> bool {
        match self.mode {
            FilterMode::Include => self.sources.contains(&origin),
            FilterMode::Exclude => !self.sources.contains(&origin),
        }
    }
}

/// C5's upstream membership database: one `Membership` per group currently
/// joined upstream. Grounded on `igmpproxy.h`'s global `MCTable`, reworked
/// the same way `core::iface::InterfaceTable` reworks `IfDesc`'s list — an
/// owned map rather than ambient global state.
#[derive(Debug, Default)]
pub struct MembershipDb {
    memberships: std::collections::BTreeMap<Ipv4Addr, Membership>,
}

impl MembershipDb {
    pub fn new() -> Self {
        MembershipDb::default()
    }

    pub fn get(&self, group: Ipv4Addr) -> Option<&Membership> {
        self.memberships.get(&group)
    }
}

fn to_kernel_mode(mode: FilterMode) -> kernel::FilterMode {
    match mode {
        FilterMode::Include => kernel::FilterMode::Include,
        FilterMode::Exclude => kernel::FilterMode::Exclude,
    }
}

/// Recompute `M(group)` from every downstream interface's current state and
/// push the result to the upstream socket's source filter and the kernel
/// forwarding cache. Called after every C3 mutation that can affect `group`
/// (§4.5) — accept a report/leave, or any of the source/group timer
/// expiries.
pub fn reaggregate(proxy: &mut Proxy, group: Ipv4Addr, kernel: &mut dyn KernelRouter) {
    let Some(upstream_id) = proxy.interfaces.upstream() else {
        return;
    };
    let upstream_iface = proxy.interfaces.get(upstream_id).unwrap();
    let upstream_vif = upstream_iface.vif.0;
    let upstream_addr = upstream_iface.addr;

    let mut mode = FilterMode::Include;
    let mut sources: BTreeSet<Ipv4Addr> = BTreeSet::new();
    let mut downstream_vifs = Vec::new();
    let mut any_record = false;

    for (_, iface) in proxy.interfaces.iter() {
        if iface.role != Role::Downstream || iface.loopback {
            continue;
        }
        let Some(g) = iface.group_lookup(group) else {
            continue;
        };
        any_record = true;
        downstream_vifs.push(iface.vif.0);
        let b: BTreeSet<Ipv4Addr> = g.sources().map(|s| s.addr).collect();
        let y: BTreeSet<Ipv4Addr> = g
            .sources()
            .filter(|s| !s.forwarding)
            .map(|s| s.addr)
            .collect();
        match (mode, g.filter_mode) {
            (FilterMode::Include, FilterMode::Include) => {
                sources = sources.union(&b).copied().collect();
            }
            (FilterMode::Include, FilterMode::Exclude) => {
                mode = FilterMode::Exclude;
                sources = y.difference(&sources).copied().collect();
            }
            (FilterMode::Exclude, FilterMode::Include) => {
                sources = sources.difference(&b).copied().collect();
            }
            (FilterMode::Exclude, FilterMode::Exclude) => {
                sources = sources.intersection(&y).copied().collect();
            }
        }
    }

    if !any_record || (mode == FilterMode::Include && sources.is_empty()) {
        if let Some(membership) = proxy.upstream.memberships.remove(&group) {
            for origin in &membership.active_routes {
                if let Err(err) = kernel.del_route(group, *origin) {
                    log::error!("MRT_DEL_MFC for ({}, {}) failed: {}", origin, group, err);
                }
            }
        }
        return;
    }

    let source_list: Vec<Ipv4Addr> = sources.iter().copied().collect();
    if let Err(err) = kernel.set_source_filter(group, upstream_addr, to_kernel_mode(mode), &source_list) {
        log::error!("IP_MSFILTER for {} failed: {}", group, err);
    }

    crate::net_trace!(
        "M({}) aggregated to {:?} over {} downstream vif(s)",
        group,
        mode,
        downstream_vifs.len()
    );
    let membership = proxy
        .upstream
        .memberships
        .entry(group)
        .or_insert_with(|| Membership::new(mode, sources.clone(), downstream_vifs.clone()));
    membership.mode = mode;
    membership.sources = sources;
    membership.downstream_vifs = downstream_vifs.clone();

    let stale: Vec<Ipv4Addr> = membership
        .active_routes
        .iter()
        .filter(|origin| !membership.admits(**origin))
        .copied()
        .collect();
    for origin in stale {
        if let Err(err) = kernel.del_route(group, origin) {
            log::error!("MRT_DEL_MFC for ({}, {}) failed: {}", origin, group, err);
        }
        membership.active_routes.remove(&origin);
    }

    let still_active: Vec<Ipv4Addr> = membership.active_routes.iter().copied().collect();
    for origin in still_active {
        if let Err(err) = kernel.add_route(group, origin, upstream_vif, &downstream_vifs) {
            log::error!("MRT_ADD_MFC for ({}, {}) failed: {}", origin, group, err);
        }
    }
}

/// Handle a kernel "no cache entry" upcall naming `(origin, group)`: the
/// first packet from a source the MFC has no route for yet. Per §4.5,
/// routes are activated lazily — the aggregator only ever records *intent*
/// (`M(G)`, the downstream TTL vector); the actual per-source MFC entry is
/// installed here, the first time traffic from that origin is observed,
/// and only if the current membership still admits it.
pub fn handle_data_upcall(
    proxy: &mut Proxy,
    group: Ipv4Addr,
    origin: Ipv4Addr,
    kernel: &mut dyn KernelRouter,
) {
    let Some(upstream_id) = proxy.interfaces.upstream() else {
        return;
    };
    let upstream_vif = proxy.interfaces.get(upstream_id).unwrap().vif.0;
    let Some(membership) = proxy.upstream.memberships.get_mut(&group) else {
        return;
    };
    if !membership.admits(origin) {
        return;
    }
    if membership.active_routes.contains(&origin) {
        return;
    }
    match kernel.add_route(group, origin, upstream_vif, &membership.downstream_vifs) {
        Ok(()) => {
            membership.active_routes.insert(origin);
        }
        Err(err) => {
            log::error!("MRT_ADD_MFC for ({}, {}) failed: {}", origin, group, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhyIntConfig;
    use crate::core::iface::Role;
    use crate::core::testing::FakeKernelRouter;
    use crate::wire::igmp::{GroupRecord, GroupRecordType};

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

    fn proxy_two_downstream() -> (Proxy, crate::core::iface::IfaceId, crate::core::iface::IfaceId) {
        let mut proxy = Proxy::new();
        proxy
            .interfaces
            .add(&cfg("eth0", Role::Upstream), Ipv4Addr::new(10, 0, 0, 1), false)
            .unwrap();
        let eth1 = proxy
            .interfaces
            .add(
                &cfg("eth1", Role::Downstream),
                Ipv4Addr::new(192, 168, 1, 1),
                false,
            )
            .unwrap();
        let eth2 = proxy
            .interfaces
            .add(
                &cfg("eth2", Role::Downstream),
                Ipv4Addr::new(192, 168, 2, 1),
                false,
            )
            .unwrap();
        (proxy, eth1, eth2)
    }

    #[test]
    fn no_downstream_record_means_no_upstream_membership() {
        let (mut proxy, _eth1, _eth2) = proxy_two_downstream();
        let mut kernel = FakeKernelRouter::new();
        let group = "239.1.1.1".parse().unwrap();
        reaggregate(&mut proxy, group, &mut kernel);
        assert!(proxy.upstream.get(group).is_none());
        assert!(kernel.calls.is_empty());
    }

    #[test]
    fn single_include_group_joins_upstream_in_include_mode() {
        let (mut proxy, eth1, _eth2) = proxy_two_downstream();
        let mut kernel = FakeKernelRouter::new();
        let group = "239.1.1.1".parse().unwrap();
        let source: Ipv4Addr = "1.1.1.1".parse().unwrap();
        {
            let iface = proxy.interfaces.get_mut(eth1).unwrap();
            let g = iface.group_add(group).unwrap();
            g.source_add(source);
        }
        let upstream_addr = proxy.interfaces.get(proxy.interfaces.upstream().unwrap()).unwrap().addr;
        reaggregate(&mut proxy, group, &mut kernel);
        let m = proxy.upstream.get(group).unwrap();
        assert_eq!(m.mode, FilterMode::Include);
        assert_eq!(m.sources, [source].into_iter().collect());
        assert_eq!(
            kernel.current_filter(group),
            Some((upstream_addr, kernel::FilterMode::Include, [source].as_slice()))
        );
    }

    #[test]
    fn empty_include_group_never_joins_upstream() {
        // eth1 holds an EXCLUDE({},{}) group and then the record is dropped
        // (group destroyed), leaving no downstream record at all: M(G) must
        // not exist and, if it did, must be torn down.
        let (mut proxy, eth1, _eth2) = proxy_two_downstream();
        let mut kernel = FakeKernelRouter::new();
        let group = "239.1.1.1".parse().unwrap();
        {
            let iface = proxy.interfaces.get_mut(eth1).unwrap();
            iface.group_add(group).unwrap();
        }
        reaggregate(&mut proxy, group, &mut kernel);
        // INCLUDE({}) with a present record still joins nothing, per the
        // "INCLUDE({}) ⇒ no membership" rule (group records with no sources
        // only exist transiently for INCLUDE — `apply_record` would have
        // destroyed it already; this exercises `reaggregate` standing alone).
        assert!(proxy.upstream.get(group).is_none());
    }

    #[test]
    fn include_then_exclude_merge_flips_mode_and_subtracts_allowed_sources() {
        // Scenario 3 from the spec: eth1 INCLUDE({1.1.1.1}), eth2
        // EXCLUDE({},{2.2.2.2}) ⇒ M = EXCLUDE({2.2.2.2}).
        let (mut proxy, eth1, eth2) = proxy_two_downstream();
        let mut kernel = FakeKernelRouter::new();
        let group = "239.1.1.1".parse().unwrap();
        let allowed: Ipv4Addr = "1.1.1.1".parse().unwrap();
        let blocked: Ipv4Addr = "2.2.2.2".parse().unwrap();
        {
            let iface = proxy.interfaces.get_mut(eth1).unwrap();
            let g = iface.group_add(group).unwrap();
            g.source_add(allowed);
        }
        {
            let iface = proxy.interfaces.get_mut(eth2).unwrap();
            let g = iface.group_add(group).unwrap();
            g.filter_mode = FilterMode::Exclude;
            let s = g.source_add(blocked);
            s.forwarding = false;
        }
        reaggregate(&mut proxy, group, &mut kernel);
        let m = proxy.upstream.get(group).unwrap();
        assert_eq!(m.mode, FilterMode::Exclude);
        assert_eq!(m.sources, [blocked].into_iter().collect());
    }

    #[test]
    fn data_upcall_activates_route_only_when_admitted() {
        let (mut proxy, eth1, _eth2) = proxy_two_downstream();
        let mut kernel = FakeKernelRouter::new();
        let group = "239.1.1.1".parse().unwrap();
        let source: Ipv4Addr = "1.1.1.1".parse().unwrap();
        let stranger: Ipv4Addr = "9.9.9.9".parse().unwrap();
        {
            let iface = proxy.interfaces.get_mut(eth1).unwrap();
            let g = iface.group_add(group).unwrap();
            g.source_add(source);
        }
        reaggregate(&mut proxy, group, &mut kernel);

        handle_data_upcall(&mut proxy, group, stranger, &mut kernel);
        assert!(kernel.calls.iter().all(|c| !matches!(
            c,
            crate::core::testing::KernelCall::AddRoute { source: s, .. } if *s == stranger
        )));

        handle_data_upcall(&mut proxy, group, source, &mut kernel);
        assert!(kernel.calls.iter().any(|c| matches!(
            c,
            crate::core::testing::KernelCall::AddRoute { source: s, group: g, .. }
                if *s == source && *g == group
        )));

        // A second upcall for the same origin does not re-install the route.
        let calls_before = kernel.calls.len();
        handle_data_upcall(&mut proxy, group, source, &mut kernel);
        assert_eq!(kernel.calls.len(), calls_before);
    }

    #[test]
    fn route_is_deleted_when_group_leaves_and_membership_is_torn_down() {
        let (mut proxy, eth1, _eth2) = proxy_two_downstream();
        let mut kernel = FakeKernelRouter::new();
        let group = "239.1.1.1".parse().unwrap();
        let source: Ipv4Addr = "1.1.1.1".parse().unwrap();
        {
            let iface = proxy.interfaces.get_mut(eth1).unwrap();
            let g = iface.group_add(group).unwrap();
            g.source_add(source);
        }
        reaggregate(&mut proxy, group, &mut kernel);
        handle_data_upcall(&mut proxy, group, source, &mut kernel);

        {
            let iface = proxy.interfaces.get_mut(eth1).unwrap();
            let mut timers = crate::core::testing::FakeTimers::new();
            iface.group_destroy(group, &mut timers);
        }
        reaggregate(&mut proxy, group, &mut kernel);
        assert!(proxy.upstream.get(group).is_none());
        assert!(kernel
            .calls
            .iter()
            .any(|c| matches!(c, crate::core::testing::KernelCall::DelRoute { source: s, .. } if *s == source)));
    }

    #[test]
    fn block_removes_stale_active_route_on_next_reaggregation() {
        let (mut proxy, eth1, _eth2) = proxy_two_downstream();
        let mut kernel = FakeKernelRouter::new();
        let mut timers = crate::core::testing::FakeTimers::new();
        let now = crate::time::Instant::now();
        let group = "239.1.1.1".parse().unwrap();
        let source: Ipv4Addr = "1.1.1.1".parse().unwrap();
        let host: Ipv4Addr = "192.168.1.50".parse().unwrap();

        let allow = GroupRecord {
            record_type: GroupRecordType::AllowNewSources,
            mcast: group,
            sources: vec![source],
        };
        crate::core::report::accept_v3_report(
            &mut proxy,
            eth1,
            host,
            &[allow],
            now,
            &mut timers,
            &mut kernel,
        );
        handle_data_upcall(&mut proxy, group, source, &mut kernel);
        assert!(proxy
            .upstream
            .get(group)
            .unwrap()
            .active_routes
            .contains(&source));

        let block = GroupRecord {
            record_type: GroupRecordType::BlockOldSources,
            mcast: group,
            sources: vec![source],
        };
        crate::core::report::accept_v3_report(
            &mut proxy,
            eth1,
            host,
            &[block],
            now,
            &mut timers,
            &mut kernel,
        );
        // BLOCK alone doesn't remove the source outright (last-member query
        // burst first), so the aggregate is unchanged and the route survives
        // until the burst actually prunes the source.
        assert!(proxy
            .upstream
            .get(group)
            .unwrap()
            .active_routes
            .contains(&source));
    }
}
