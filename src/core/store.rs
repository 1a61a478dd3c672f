//! C2: the group/source store.
//!
//! One `Group` per (interface, multicast address), one `Source` per
//! (interface, group, source address). Grounded on `igmpproxy.h`'s
//! `struct group`/`struct source` (intrusive linked lists hanging off
//! `struct IfDesc`); this redesign drops the linked list and cyclic
//! group↔source / source↔group pointers in favor
//! of ownership: `Interface::groups` (`core::iface`) owns a `BTreeMap` of
//! `Group`, each of which owns a `BTreeMap` of `Source`, addressed by value
//! (`Ipv4Addr`) rather than pointer — the same "no source outlives its
//! group" ownership, without needing a back-reference at all,
//! since every timer fires with the `(iface, group, source)` key it needs
//! (`core::TimerEvent`).

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::core::TimerEvent;
use crate::timer::{Handle, Timers};

/// A group's current filter mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Include,
    Exclude,
}

/// A group's effective host-compatibility version: `V3` iff both host
/// timers are inactive, `V2` iff only `v2_host_timer` is active, `V1` iff
/// `v1_host_timer` is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompatVersion {
    V1,
    V2,
    V3,
}

/// One (interface, group, source) record.
#[derive(Debug, Clone)]
pub struct Source {
    pub addr: Ipv4Addr,
    pub timer: Option<Handle>,
    /// In EXCLUDE mode: `true` for actively forwarded sources (the `X` set
    /// of RFC 3376 §6.1), `false` for blocked-but-tracked sources (the `Y` set).
    /// Always `true` in INCLUDE mode.
    pub forwarding: bool,
    pub scheduled: bool,
    pub retransmit_count: u32,
}

impl Source {
    fn new(addr: Ipv4Addr) -> Self {
        Source {
            addr,
            timer: None,
            forwarding: true,
            scheduled: false,
            retransmit_count: 0,
        }
    }

    pub fn clear_timer(&mut self, timers: &mut dyn Timers<TimerEvent>) {
        if let Some(handle) = self.timer.take() {
            timers.clear(handle);
        }
    }
}

/// One (interface, group) record.
#[derive(Debug, Clone)]
pub struct Group {
    pub mcast: Ipv4Addr,
    pub filter_mode: FilterMode,
    pub group_timer: Option<Handle>,
    pub compat_version: CompatVersion,
    pub v1_host_timer: Option<Handle>,
    pub v2_host_timer: Option<Handle>,
    pub scheduled: bool,
    pub retransmit_count: u32,
    pub query_timer: Option<Handle>,
    sources: BTreeMap<Ipv4Addr, Source>,
}

impl Group {
    fn new(mcast: Ipv4Addr) -> Self {
        Group {
            mcast,
            filter_mode: FilterMode::Include,
            group_timer: None,
            compat_version: CompatVersion::V3,
            v1_host_timer: None,
            v2_host_timer: None,
            scheduled: false,
            retransmit_count: 0,
            query_timer: None,
            sources: BTreeMap::new(),
        }
    }

    /// Always just the source list's length.
    pub fn n_sources(&self) -> usize {
        self.sources.len()
    }

    /// The count of currently scheduled sources, computed rather than
    /// cached so it can never drift out of sync with the source list.
    pub fn n_scheduled_sources(&self) -> usize {
        self.sources.values().filter(|s| s.scheduled).count()
    }

    /// In INCLUDE mode with no sources, the group must not exist. Callers
    /// that bring a group to this state must follow up with
    /// `Interface::group_destroy`.
    pub fn is_empty_include(&self) -> bool {
        self.filter_mode == FilterMode::Include && self.sources.is_empty()
    }

    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    pub fn sources_mut(&mut self) -> impl Iterator<Item = &mut Source> {
        self.sources.values_mut()
    }

    pub fn source_lookup(&self, addr: Ipv4Addr) -> Option<&Source> {
        self.sources.get(&addr)
    }

    pub fn source_lookup_mut(&mut self, addr: Ipv4Addr) -> Option<&mut Source> {
        self.sources.get_mut(&addr)
    }

    /// Idempotent create: returns the existing source if present.
    pub fn source_add(&mut self, addr: Ipv4Addr) -> &mut Source {
        self.sources.entry(addr).or_insert_with(|| Source::new(addr))
    }

    /// Removes `addr` from the source list and clears its timer.
    ///
    /// Returns `true` if the group is now an empty INCLUDE group and must be
    /// destroyed by the caller (`Interface::group_destroy`). An EXCLUDE
    /// group with no sources remains valid ("exclude nothing" = receive all).
    pub fn source_destroy(
        &mut self,
        addr: Ipv4Addr,
        timers: &mut dyn Timers<TimerEvent>,
    ) -> bool {
        if let Some(mut source) = self.sources.remove(&addr) {
            source.clear_timer(timers);
        }
        self.is_empty_include()
    }

    pub(crate) fn clear_all_timers(&mut self, timers: &mut dyn Timers<TimerEvent>) {
        for handle in [
            self.group_timer.take(),
            self.v1_host_timer.take(),
            self.v2_host_timer.take(),
            self.query_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            timers.clear(handle);
        }
        for source in self.sources.values_mut() {
            source.clear_timer(timers);
        }
    }
}

/// C2's operations, implemented as methods on [`crate::core::iface::Interface`]
/// since each interface exclusively owns its group list.
impl crate::core::iface::Interface {
    pub fn group_lookup(&self, mcast: Ipv4Addr) -> Option<&Group> {
        self.groups.get(&mcast)
    }

    pub fn group_lookup_mut(&mut self, mcast: Ipv4Addr) -> Option<&mut Group> {
        self.groups.get_mut(&mcast)
    }

    /// Idempotent create. Rejects non-multicast addresses.
    pub fn group_add(&mut self, mcast: Ipv4Addr) -> Result<&mut Group, crate::error::CoreError> {
        if !mcast.is_multicast() {
            return Err(crate::error::CoreError::NotMulticast(mcast));
        }
        Ok(self.groups.entry(mcast).or_insert_with(|| Group::new(mcast)))
    }

    /// Cascades to every source and clears every timer the group (and its
    /// sources) held.
    pub fn group_destroy(&mut self, mcast: Ipv4Addr, timers: &mut dyn Timers<TimerEvent>) {
        if let Some(mut group) = self.groups.remove(&mcast) {
            group.clear_all_timers(timers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::FakeTimers;
    use crate::core::iface::{Interface, IfaceId, Role};
    use crate::config::PhyIntConfig;

    fn iface() -> Interface {
        let cfg = PhyIntConfig {
            name: "eth1".into(),
            role: Role::Downstream,
            ratelimit: 0,
            threshold: 1,
            altnet: Vec::new(),
            whitelist: Vec::new(),
        };
        Interface::new(IfaceId(0), &cfg, "192.168.1.1".parse().unwrap(), false)
    }

    #[test]
    fn group_add_rejects_non_multicast() {
        let mut iface = iface();
        let err = iface.group_add("10.0.0.1".parse().unwrap()).unwrap_err();
        assert_eq!(err, crate::error::CoreError::NotMulticast("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn group_add_is_idempotent() {
        let mut iface = iface();
        let g = "239.1.1.1".parse().unwrap();
        iface.group_add(g).unwrap();
        iface.group_add(g).unwrap();
        assert_eq!(iface.groups.len(), 1);
    }

    #[test]
    fn destroying_last_source_of_include_group_signals_destroy() {
        let mut iface = iface();
        let g = "239.1.1.1".parse().unwrap();
        let s = "1.1.1.1".parse().unwrap();
        let mut timers = FakeTimers::new();
        {
            let group = iface.group_add(g).unwrap();
            group.source_add(s);
        }
        let group = iface.group_lookup_mut(g).unwrap();
        assert!(group.source_destroy(s, &mut timers));
    }

    #[test]
    fn destroying_last_source_of_exclude_group_keeps_it() {
        let mut iface = iface();
        let g = "239.1.1.1".parse().unwrap();
        let s = "1.1.1.1".parse().unwrap();
        let mut timers = FakeTimers::new();
        {
            let group = iface.group_add(g).unwrap();
            group.filter_mode = FilterMode::Exclude;
            group.source_add(s);
        }
        let group = iface.group_lookup_mut(g).unwrap();
        assert!(!group.source_destroy(s, &mut timers));
        assert_eq!(group.n_sources(), 0);
    }

    #[test]
    fn group_destroy_clears_all_timers() {
        let mut iface = iface();
        let g = "239.1.1.1".parse().unwrap();
        let s = "1.1.1.1".parse().unwrap();
        let mut timers = FakeTimers::new();
        let now = crate::time::Instant::now();
        {
            let group = iface.group_add(g).unwrap();
            group.group_timer = Some(timers.set(now, crate::time::Duration::from_secs(1), TimerEvent::GroupExpiry { iface: IfaceId(0), group: g }));
            let src = group.source_add(s);
            src.timer = Some(timers.set(now, crate::time::Duration::from_secs(1), TimerEvent::SourceExpiry { iface: IfaceId(0), group: g, source: s }));
        }
        iface.group_destroy(g, &mut timers);
        assert!(timers.is_empty());
        assert!(iface.group_lookup(g).is_none());
    }
}
