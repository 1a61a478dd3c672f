//! C3: the report processor.
//!
//! Applies the six IGMPv3 group-record actions (`IS_IN`/`IS_EX`/`TO_IN`/
//! `TO_EX`/`ALLOW`/`BLOCK`, RFC 3376 §6.4) to a group's state, plus the v1/v2
//! compatibility downgrade rules. Grounded on `igmpproxy.c`'s
//! `acceptGroupReport`/`acceptLeaveMessage` dispatch, rewritten as the
//! 12-row transition table directly rather than the original's ad hoc
//! per-record-type `if`/`switch` chain (which mis-dispatches
//! `CHANGE_TO_EXCLUDE_MODE` to the to-include handler — not reproduced
//! here).

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use crate::core::iface::{IfaceId, Interface};
use crate::core::store::{CompatVersion, FilterMode, Group};
use crate::core::{aggregate, query, Proxy, TimerEvent};
use crate::error::CoreError;
use crate::kernel::KernelRouter;
use crate::time::Instant;
use crate::timer::Timers;
use crate::wire::igmp::{GroupRecord, GroupRecordType};

/// A query C3/C4 asks the event loop to send, as wire bytes via
/// `wire::igmp::QueryRepr::emit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingQuery {
    /// A periodic (startup or steady-state) general query on `iface`.
    General { iface: IfaceId },
    /// Q(G): confirm any receiver still wants the group. `suppress` is the
    /// S flag (RFC 3376 §4.1.6), set on retransmissions that follow a
    /// still-live source so other routers on the link don't also restart
    /// their own last-member timers.
    Group {
        iface: IfaceId,
        group: Ipv4Addr,
        suppress: bool,
    },
    /// Q(G,S): confirm any receiver still wants these sources.
    GroupSource {
        iface: IfaceId,
        group: Ipv4Addr,
        sources: Vec<Ipv4Addr>,
        suppress: bool,
    },
}

fn precheck<'a>(
    proxy: &'a mut Proxy,
    iface_id: IfaceId,
    src: Ipv4Addr,
    group: Ipv4Addr,
) -> Result<&'a mut Interface, CoreError> {
    if !group.is_multicast() {
        return Err(CoreError::NotMulticast(group));
    }
    let iface = proxy
        .interfaces
        .get_mut(iface_id)
        .ok_or(CoreError::NoSuchInterface)?;
    if src == iface.addr {
        return Err(CoreError::FromSelf);
    }
    if iface.role != crate::core::iface::Role::Downstream {
        return Err(CoreError::WrongRole);
    }
    if !iface.is_address_valid_for(src) {
        return Err(CoreError::AddressNotAllowed(src));
    }
    if !iface.is_group_allowed(group) {
        return Err(CoreError::AddressNotAllowed(group));
    }
    Ok(iface)
}

/// Accept a v1 or v2 membership report (both translate to `IS_EX({})`).
pub fn accept_v1v2_report(
    proxy: &mut Proxy,
    iface_id: IfaceId,
    src: Ipv4Addr,
    group: Ipv4Addr,
    version: CompatVersion,
    now: Instant,
    timers: &mut dyn Timers<TimerEvent>,
    kernel: &mut dyn KernelRouter,
) -> Vec<OutgoingQuery> {
    let iface = crate::check!(precheck(proxy, iface_id, src, group), Vec::new());
    downgrade_compat(iface, iface_id, group, version, now, timers);

    let iface = proxy.interfaces.get_mut(iface_id).unwrap();
    let out = apply_record(
        iface,
        iface_id,
        group,
        GroupRecordType::ChangeToExcludeMode,
        &BTreeSet::new(),
        now,
        timers,
    );
    aggregate::reaggregate(proxy, group, kernel);
    out
}

/// Accept a v2 Leave Group message.
///
/// Rejected outright in V1 compatibility mode. Otherwise, treated as a
/// group-specific last-member query exactly like a `BLOCK` of the group's
/// entire current source set — `mcgroup.c`'s `acceptLeaveMessage` runs a
/// group-specific query burst before pruning, not an unconditional `IS_IN`
/// rewrite (which could never observably change EXCLUDE({},{})'s empty
/// source list). With `quickleave` the router skips the burst and prunes
/// immediately (see DESIGN.md Open Questions).
pub fn accept_v2_leave(
    proxy: &mut Proxy,
    iface_id: IfaceId,
    src: Ipv4Addr,
    group: Ipv4Addr,
    now: Instant,
    timers: &mut dyn Timers<TimerEvent>,
    kernel: &mut dyn KernelRouter,
) -> Vec<OutgoingQuery> {
    let iface = crate::check!(precheck(proxy, iface_id, src, group), Vec::new());
    let Some(g) = iface.group_lookup(group) else {
        return Vec::new();
    };
    if g.compat_version == CompatVersion::V1 {
        log::warn!("ignoring v2 leave for {group} from {src}: group is in v1-compat mode");
        return Vec::new();
    }

    if proxy.quickleave {
        let iface = proxy.interfaces.get_mut(iface_id).unwrap();
        iface.group_destroy(group, timers);
        aggregate::reaggregate(proxy, group, kernel);
        return Vec::new();
    }

    let iface = proxy.interfaces.get_mut(iface_id).unwrap();
    query::schedule_group_query(iface, iface_id, group, now, timers)
        .into_iter()
        .collect()
}

/// Accept a v3 membership report carrying one or more group records.
/// Records that fail the precheck or version-compatibility check are
/// skipped and logged, the rest of the report is still processed.
pub fn accept_v3_report(
    proxy: &mut Proxy,
    iface_id: IfaceId,
    src: Ipv4Addr,
    records: &[GroupRecord],
    now: Instant,
    timers: &mut dyn Timers<TimerEvent>,
    kernel: &mut dyn KernelRouter,
) -> Vec<OutgoingQuery> {
    let mut out = Vec::new();
    for record in records {
        accept_v3_group_record(proxy, iface_id, src, record, now, timers, kernel, &mut out);
    }
    out
}

fn accept_v3_group_record(
    proxy: &mut Proxy,
    iface_id: IfaceId,
    src: Ipv4Addr,
    record: &GroupRecord,
    now: Instant,
    timers: &mut dyn Timers<TimerEvent>,
    kernel: &mut dyn KernelRouter,
    out: &mut Vec<OutgoingQuery>,
) {
    let iface = crate::check!(precheck(proxy, iface_id, src, record.mcast));
    if let Some(g) = iface.group_lookup(record.mcast) {
        if g.compat_version != CompatVersion::V3 {
            log::warn!(
                "dropping v3 record for {} from {src}: group is in v1/v2-compat mode",
                record.mcast
            );
            return;
        }
    }

    let iface = proxy.interfaces.get_mut(iface_id).unwrap();
    let sources: BTreeSet<Ipv4Addr> = record.sources.iter().copied().collect();
    out.extend(apply_record(
        iface,
        iface_id,
        record.mcast,
        record.record_type,
        &sources,
        now,
        timers,
    ));
    aggregate::reaggregate(proxy, record.mcast, kernel);
}

/// Arm/re-arm the v1/v2 compatibility host timers for `group` and set
/// `compat_version`, creating the group if it doesn't yet exist.
fn downgrade_compat(
    iface: &mut Interface,
    iface_id: IfaceId,
    group_addr: Ipv4Addr,
    version: CompatVersion,
    now: Instant,
    timers: &mut dyn Timers<TimerEvent>,
) {
    let gmi = iface.gmi();
    let group = match iface.group_add(group_addr) {
        Ok(g) => g,
        Err(_) => return,
    };
    match version {
        CompatVersion::V1 => {
            group.compat_version = CompatVersion::V1;
            rearm(
                &mut group.v1_host_timer,
                timers,
                now,
                gmi,
                TimerEvent::V1HostExpiry {
                    iface: iface_id,
                    group: group_addr,
                },
            );
        }
        CompatVersion::V2 => {
            if group.compat_version != CompatVersion::V1 {
                group.compat_version = CompatVersion::V2;
                rearm(
                    &mut group.v2_host_timer,
                    timers,
                    now,
                    gmi,
                    TimerEvent::V2HostExpiry {
                        iface: iface_id,
                        group: group_addr,
                    },
                );
            }
        }
        CompatVersion::V3 => {}
    }
}

fn rearm(
    slot: &mut Option<crate::timer::Handle>,
    timers: &mut dyn Timers<TimerEvent>,
    now: Instant,
    delay: crate::time::Duration,
    event: TimerEvent,
) {
    if let Some(old) = slot.take() {
        timers.clear(old);
    }
    *slot = Some(timers.set(now, delay, event));
}

/// A source's membership state: `true` means actively forwarded.
fn partition(group: &Group) -> (BTreeSet<Ipv4Addr>, BTreeSet<Ipv4Addr>) {
    let mut x = BTreeSet::new();
    let mut y = BTreeSet::new();
    for source in group.sources() {
        if source.forwarding {
            x.insert(source.addr);
        } else {
            y.insert(source.addr);
        }
    }
    (x, y)
}

/// Set `addr`'s forwarding flag and (re)arm its timer to `delay`, creating
/// the source if it doesn't exist yet. `delay = None` clears the timer
/// instead of arming it (the EXCLUDE-mode "blocked, no individual timer"
/// case).
fn set_source(
    group: &mut Group,
    iface_id: IfaceId,
    group_addr: Ipv4Addr,
    addr: Ipv4Addr,
    forwarding: bool,
    delay: Option<crate::time::Duration>,
    now: Instant,
    timers: &mut dyn Timers<TimerEvent>,
) {
    let source = group.source_add(addr);
    source.forwarding = forwarding;
    source.clear_timer(timers);
    if let Some(delay) = delay {
        source.timer = Some(timers.set(
            now,
            delay,
            TimerEvent::SourceExpiry {
                iface: iface_id,
                group: group_addr,
                source: addr,
            },
        ));
    }
}

fn destroy_sources(
    group: &mut Group,
    addrs: impl IntoIterator<Item = Ipv4Addr>,
    timers: &mut dyn Timers<TimerEvent>,
) {
    for addr in addrs {
        group.source_destroy(addr, timers);
    }
}

/// Apply one group record to `group_addr` on `iface`, per the 12-row
/// transition table, returning any queries C4 must emit.
fn apply_record(
    iface: &mut Interface,
    iface_id: IfaceId,
    group_addr: Ipv4Addr,
    record_type: GroupRecordType,
    b: &BTreeSet<Ipv4Addr>,
    now: Instant,
    timers: &mut dyn Timers<TimerEvent>,
) -> Vec<OutgoingQuery> {
    let gmi = iface.gmi();
    let lmqt = iface.lmqt();
    let lmqi = iface.last_member_query_interval;
    let lmqc = iface.last_member_query_count;
    let group = match iface.group_add(group_addr) {
        Ok(g) => g,
        Err(_) => return Vec::new(),
    };

    let mut out = Vec::new();
    match group.filter_mode {
        FilterMode::Include => {
            let a: BTreeSet<Ipv4Addr> = group.sources().map(|s| s.addr).collect();
            match record_type {
                GroupRecordType::ModeIsInclude | GroupRecordType::AllowNewSources => {
                    for &addr in b {
                        set_source(group, iface_id, group_addr, addr, true, Some(gmi), now, timers);
                    }
                }
                GroupRecordType::ChangeToIncludeMode => {
                    for &addr in b {
                        set_source(group, iface_id, group_addr, addr, true, Some(gmi), now, timers);
                    }
                    let missing: Vec<_> = a.difference(b).copied().collect();
                    if !missing.is_empty() {
                        out.push(query::request_source_query(
                            group, iface_id, group_addr, &missing, lmqt, lmqi, lmqc, now, timers,
                        ));
                    }
                }
                GroupRecordType::ModeIsExclude | GroupRecordType::ChangeToExcludeMode => {
                    if record_type == GroupRecordType::ChangeToExcludeMode {
                        let keep: Vec<_> = a.intersection(b).copied().collect();
                        if !keep.is_empty() {
                            out.push(query::request_source_query(
                                group, iface_id, group_addr, &keep, lmqt, lmqi, lmqc, now, timers,
                            ));
                        }
                    }
                    for &addr in b.difference(&a) {
                        set_source(group, iface_id, group_addr, addr, false, None, now, timers);
                    }
                    destroy_sources(group, a.difference(b).copied().collect::<Vec<_>>(), timers);
                    group.filter_mode = FilterMode::Exclude;
                    rearm(
                        &mut group.group_timer,
                        timers,
                        now,
                        gmi,
                        TimerEvent::GroupExpiry {
                            iface: iface_id,
                            group: group_addr,
                        },
                    );
                }
                GroupRecordType::BlockOldSources => {
                    let blocked: Vec<_> = a.intersection(b).copied().collect();
                    if !blocked.is_empty() {
                        out.push(query::request_source_query(
                            group, iface_id, group_addr, &blocked, lmqt, lmqi, lmqc, now, timers,
                        ));
                    }
                }
            }
        }
        FilterMode::Exclude => {
            let (x, y) = partition(group);
            match record_type {
                GroupRecordType::ModeIsInclude | GroupRecordType::AllowNewSources => {
                    for &addr in b {
                        set_source(group, iface_id, group_addr, addr, true, Some(gmi), now, timers);
                    }
                }
                GroupRecordType::ChangeToIncludeMode => {
                    for &addr in b {
                        set_source(group, iface_id, group_addr, addr, true, Some(gmi), now, timers);
                    }
                    let still_excluded: Vec<_> = x.difference(b).copied().collect();
                    if !still_excluded.is_empty() {
                        out.push(query::request_source_query(
                            group, iface_id, group_addr, &still_excluded, lmqt, lmqi, lmqc, now,
                            timers,
                        ));
                    }
                    out.push(query::request_group_query(
                        group, iface_id, group_addr, lmqt, lmqi, lmqc, now, timers,
                    ));
                }
                GroupRecordType::ModeIsExclude | GroupRecordType::ChangeToExcludeMode => {
                    let new_forward: Vec<_> = b.difference(&x).filter(|s| !y.contains(s)).copied().collect();
                    // IS_EX arms newly-forwarded sources at a fresh GMI; TO_EX
                    // arms them at the group timer's *remaining* time instead
                    // (same distinction BLOCK's `group_timer_left` makes below).
                    let new_forward_delay = if record_type == GroupRecordType::ChangeToExcludeMode {
                        group.group_timer.and_then(|h| timers.left(now, h)).unwrap_or(gmi)
                    } else {
                        gmi
                    };
                    for addr in &new_forward {
                        set_source(group, iface_id, group_addr, *addr, true, Some(new_forward_delay), now, timers);
                    }
                    if record_type == GroupRecordType::ChangeToExcludeMode {
                        let new_block: Vec<_> = b.difference(&y).copied().collect();
                        if !new_block.is_empty() {
                            out.push(query::request_source_query(
                                group, iface_id, group_addr, &new_block, lmqt, lmqi, lmqc, now,
                                timers,
                            ));
                        }
                    }
                    let drop_x: Vec<_> = x.difference(b).copied().collect();
                    let drop_y: Vec<_> = y.difference(b).copied().collect();
                    destroy_sources(group, drop_x, timers);
                    destroy_sources(group, drop_y, timers);
                    for &addr in b.intersection(&y) {
                        if let Some(s) = group.source_lookup_mut(addr) {
                            s.forwarding = false;
                        }
                    }
                    rearm(
                        &mut group.group_timer,
                        timers,
                        now,
                        gmi,
                        TimerEvent::GroupExpiry {
                            iface: iface_id,
                            group: group_addr,
                        },
                    );
                }
                GroupRecordType::BlockOldSources => {
                    let new_block: Vec<_> = b.difference(&y).copied().collect();
                    let group_timer_left = group.group_timer;
                    for &addr in &new_block {
                        let delay = group_timer_left
                            .and_then(|h| timers.left(now, h))
                            .unwrap_or(gmi);
                        if let Some(s) = group.source_lookup_mut(addr) {
                            s.forwarding = true;
                            s.clear_timer(timers);
                            s.timer = Some(timers.set(
                                now,
                                delay,
                                TimerEvent::SourceExpiry {
                                    iface: iface_id,
                                    group: group_addr,
                                    source: addr,
                                },
                            ));
                        } else {
                            set_source(group, iface_id, group_addr, addr, true, Some(delay), now, timers);
                        }
                    }
                    if !new_block.is_empty() {
                        out.push(query::request_source_query(
                            group, iface_id, group_addr, &new_block, lmqt, lmqi, lmqc, now, timers,
                        ));
                    }
                }
            }
        }
    }

    if group.is_empty_include() {
        iface.group_destroy(group_addr, timers);
    }
    out
}

/// Timer callback: a source's GMI expired. On an INCLUDE source this
/// deletes the source (and the group, if it was the last one); on an
/// EXCLUDE source (always `forwarding=true` while timed) it is demoted to
/// the blocked (`forwarding=false`) set instead of removed, matching the
/// `TO_EX`/`BLOCK` rows' "as if the source had been blocked" semantics.
pub fn source_timer_expired(
    proxy: &mut Proxy,
    iface_id: IfaceId,
    group_addr: Ipv4Addr,
    source_addr: Ipv4Addr,
    timers: &mut dyn Timers<TimerEvent>,
    kernel: &mut dyn KernelRouter,
) {
    let Some(iface) = proxy.interfaces.get_mut(iface_id) else {
        return;
    };
    let Some(group) = iface.group_lookup_mut(group_addr) else {
        return;
    };
    match group.filter_mode {
        FilterMode::Include => {
            group.source_destroy(source_addr, timers);
            if group.is_empty_include() {
                iface.group_destroy(group_addr, timers);
            }
        }
        FilterMode::Exclude => {
            if let Some(source) = group.source_lookup_mut(source_addr) {
                source.forwarding = false;
                source.clear_timer(timers);
            }
        }
    }
    aggregate::reaggregate(proxy, group_addr, kernel);
}

/// Timer callback: a group's EXCLUDE timer expired. Blocked sources are
/// dropped; if any forwarded sources remain the group reverts to INCLUDE,
/// otherwise it is destroyed.
pub fn group_timer_expired(
    proxy: &mut Proxy,
    iface_id: IfaceId,
    group_addr: Ipv4Addr,
    timers: &mut dyn Timers<TimerEvent>,
    kernel: &mut dyn KernelRouter,
) {
    let Some(iface) = proxy.interfaces.get_mut(iface_id) else {
        return;
    };
    let Some(group) = iface.group_lookup_mut(group_addr) else {
        return;
    };
    let blocked: Vec<_> = group
        .sources()
        .filter(|s| !s.forwarding)
        .map(|s| s.addr)
        .collect();
    destroy_sources(group, blocked, timers);
    group.group_timer = None;
    if group.n_sources() == 0 {
        iface.group_destroy(group_addr, timers);
    } else {
        group.filter_mode = FilterMode::Include;
    }
    aggregate::reaggregate(proxy, group_addr, kernel);
}

pub fn v1_host_timer_expired(proxy: &mut Proxy, iface_id: IfaceId, group_addr: Ipv4Addr) {
    let Some(iface) = proxy.interfaces.get_mut(iface_id) else {
        return;
    };
    let Some(group) = iface.group_lookup_mut(group_addr) else {
        return;
    };
    group.v1_host_timer = None;
    group.compat_version = if group.v2_host_timer.is_some() {
        CompatVersion::V2
    } else {
        CompatVersion::V3
    };
}

pub fn v2_host_timer_expired(proxy: &mut Proxy, iface_id: IfaceId, group_addr: Ipv4Addr) {
    let Some(iface) = proxy.interfaces.get_mut(iface_id) else {
        return;
    };
    let Some(group) = iface.group_lookup_mut(group_addr) else {
        return;
    };
    group.v2_host_timer = None;
    if group.v1_host_timer.is_none() {
        group.compat_version = CompatVersion::V3;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhyIntConfig;
    use crate::core::iface::Role;
    use crate::core::testing::{FakeKernelRouter, FakeTimers};

    fn proxy_with_downstream() -> (Proxy, IfaceId) {
        let mut proxy = Proxy::new();
        let cfg = PhyIntConfig {
            name: "eth1".into(),
            role: Role::Downstream,
            ratelimit: 0,
            threshold: 1,
            altnet: Vec::new(),
            whitelist: Vec::new(),
        };
        let id = proxy
            .interfaces
            .add(&cfg, "192.168.1.1".parse().unwrap(), false)
            .unwrap();
        (proxy, id)
    }

    #[test]
    fn is_ex_empty_then_v2_leave_destroys_group() {
        let (mut proxy, id) = proxy_with_downstream();
        let mut timers = FakeTimers::new();
        let mut kernel = FakeKernelRouter::new();
        let now = Instant::now();
        let group = "239.1.1.1".parse().unwrap();
        let host = "192.168.1.50".parse().unwrap();

        let record = GroupRecord {
            record_type: GroupRecordType::ModeIsExclude,
            mcast: group,
            sources: Vec::new(),
        };
        accept_v3_report(&mut proxy, id, host, &[record], now, &mut timers, &mut kernel);
        let iface = proxy.interfaces.get(id).unwrap();
        let g = iface.group_lookup(group).unwrap();
        assert_eq!(g.filter_mode, FilterMode::Exclude);
        assert_eq!(g.n_sources(), 0);

        // quickleave prunes immediately regardless of query scheduling.
        proxy.quickleave = true;
        accept_v2_leave(&mut proxy, id, host, group, now, &mut timers, &mut kernel);
        let iface = proxy.interfaces.get(id).unwrap();
        assert!(iface.group_lookup(group).is_none());
    }

    #[test]
    fn allow_from_empty_include_creates_source_with_gmi_timer() {
        let (mut proxy, id) = proxy_with_downstream();
        let mut timers = FakeTimers::new();
        let mut kernel = FakeKernelRouter::new();
        let now = Instant::now();
        let group = "239.1.1.1".parse().unwrap();
        let host = "192.168.1.50".parse().unwrap();
        let source = "1.1.1.1".parse().unwrap();

        let record = GroupRecord {
            record_type: GroupRecordType::AllowNewSources,
            mcast: group,
            sources: vec![source],
        };
        accept_v3_report(&mut proxy, id, host, &[record], now, &mut timers, &mut kernel);

        let iface = proxy.interfaces.get(id).unwrap();
        let g = iface.group_lookup(group).unwrap();
        assert_eq!(g.filter_mode, FilterMode::Include);
        assert_eq!(g.n_sources(), 1);
        let src = g.source_lookup(source).unwrap();
        assert!(src.timer.is_some());
        assert_eq!(
            timers.left(now, src.timer.unwrap()),
            Some(iface.gmi())
        );
    }

    #[test]
    fn block_on_include_emits_group_source_query() {
        let (mut proxy, id) = proxy_with_downstream();
        let mut timers = FakeTimers::new();
        let mut kernel = FakeKernelRouter::new();
        let now = Instant::now();
        let group = "239.1.1.1".parse().unwrap();
        let host = "192.168.1.50".parse().unwrap();
        let source: Ipv4Addr = "1.1.1.1".parse().unwrap();

        {
            let iface = proxy.interfaces.get_mut(id).unwrap();
            let gmi = iface.gmi();
            let g = iface.group_add(group).unwrap();
            let s = g.source_add(source);
            s.timer = Some(timers.set(
                now,
                gmi,
                TimerEvent::SourceExpiry {
                    iface: id,
                    group,
                    source,
                },
            ));
        }

        let record = GroupRecord {
            record_type: GroupRecordType::BlockOldSources,
            mcast: group,
            sources: vec![source],
        };
        let out = accept_v3_report(&mut proxy, id, host, &[record], now, &mut timers, &mut kernel);
        assert_eq!(
            out,
            vec![OutgoingQuery::GroupSource {
                iface: id,
                group,
                sources: vec![source],
                suppress: false,
            }]
        );
        // BLOCK schedules the last-member burst (§4.4): the source's timer
        // is lowered to LMQT and it is marked scheduled for retransmission.
        let iface = proxy.interfaces.get(id).unwrap();
        let g = iface.group_lookup(group).unwrap();
        let s = g.source_lookup(source).unwrap();
        assert!(s.scheduled);
        assert_eq!(s.retransmit_count, iface.last_member_query_count - 1);
        assert_eq!(timers.left(now, s.timer.unwrap()), Some(iface.lmqt()));
    }

    #[test]
    fn v2_report_demotes_compat_and_rejects_later_v3_report() {
        let (mut proxy, id) = proxy_with_downstream();
        let mut timers = FakeTimers::new();
        let mut kernel = FakeKernelRouter::new();
        let now = Instant::now();
        let group = "239.5.5.5".parse().unwrap();
        let host = "192.168.1.50".parse().unwrap();

        accept_v1v2_report(
            &mut proxy,
            id,
            host,
            group,
            CompatVersion::V2,
            now,
            &mut timers,
            &mut kernel,
        );
        let iface = proxy.interfaces.get(id).unwrap();
        assert_eq!(
            iface.group_lookup(group).unwrap().compat_version,
            CompatVersion::V2
        );

        let record = GroupRecord {
            record_type: GroupRecordType::ModeIsExclude,
            mcast: group,
            sources: Vec::new(),
        };
        let mut out = Vec::new();
        accept_v3_group_record(&mut proxy, id, host, &record, now, &mut timers, &mut kernel, &mut out);
        // The v3 record is dropped outright: compat_version stays V2 and no
        // queries are produced, since `apply_record` was never reached.
        assert!(out.is_empty());
        let iface = proxy.interfaces.get(id).unwrap();
        assert_eq!(
            iface.group_lookup(group).unwrap().compat_version,
            CompatVersion::V2
        );
    }
}
