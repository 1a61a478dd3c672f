//! C4: the query engine.
//!
//! Sends general, group-specific, and group-and-source-specific queries;
//! schedules last-member retransmissions; performs querier election.
//! Grounded on `igmpproxy.c`'s `sendGroupSpecificMemberQuery`/
//! `startQuerier`/`ageGroups` family and `request.c`'s
//! `sendGeneralMembershipQuery` — reworked so every timer this component
//! arms goes through the same [`crate::timer::Timers`] collaborator the rest
//! of the core uses, rather than the original's direct calls into its own
//! callout table.
//!
//! Queries that arise directly from a report (an immediate Q(G) or Q(G,S)
//! per the §4.3 transition table) are returned up through
//! [`crate::core::report::OutgoingQuery`] by the functions below and by
//! `report::apply_record`'s callers. Queries that arise from a timer firing
//! (periodic general queries, last-member retransmissions, a reclaimed
//! querier's first query) have no caller to return them to — `Proxy::dispatch_timer`
//! only forwards `self`/`now`/the timer's key — so they accumulate on
//! [`Proxy::pending_queries`] for the event loop to drain after each
//! `run_timers` call, the same "drain after the batch" shape
//! `CalloutQueue::age` itself uses.

use std::net::Ipv4Addr;

use crate::core::iface::{IfaceId, Interface, Role};
use crate::core::report::OutgoingQuery;
use crate::core::store::Group;
use crate::core::{Proxy, TimerEvent};
use crate::time::{Duration, Instant};
use crate::timer::Timers;

/// (Re)arm `group`'s combined group-specific/group-and-source-specific
/// retransmission timer at `last_member_query_interval`, clearing any timer
/// already pending — "setting a new timer while the handle is pending
/// requires explicit clear first".
fn arm_retransmit_timer(
    group: &mut Group,
    iface_id: IfaceId,
    group_addr: Ipv4Addr,
    lmqi: Duration,
    now: Instant,
    timers: &mut dyn Timers<TimerEvent>,
) {
    if let Some(handle) = group.query_timer.take() {
        timers.clear(handle);
    }
    group.query_timer = Some(timers.set(
        now,
        lmqi,
        TimerEvent::RetransmitQuery {
            iface: iface_id,
            group: group_addr,
        },
    ));
}

/// Lower `handle`'s remaining time to `lmqt` if it currently has longer left
/// to run, per "if its timer > LMQT, lower it to LMQT".
fn lower_to_lmqt(
    handle: Option<crate::timer::Handle>,
    lmqt: Duration,
    now: Instant,
    timers: &mut dyn Timers<TimerEvent>,
    rearm: impl FnOnce(&mut dyn Timers<TimerEvent>) -> crate::timer::Handle,
) -> Option<crate::timer::Handle> {
    match handle {
        Some(h) if timers.left(now, h).map_or(false, |left| left > lmqt) => {
            timers.clear(h);
            Some(rearm(timers))
        }
        other => other,
    }
}

/// Q(G): request confirmation that any downstream receiver still wants
/// `group_addr` at all. Lowers `group_timer` to LMQT if it was running
/// longer, schedules the group for the retransmission burst, and arms the
/// scheduler. Returns the immediate query to transmit.
pub fn request_group_query(
    group: &mut Group,
    iface_id: IfaceId,
    group_addr: Ipv4Addr,
    lmqt: Duration,
    lmqi: Duration,
    lmqc: u32,
    now: Instant,
    timers: &mut dyn Timers<TimerEvent>,
) -> OutgoingQuery {
    group.group_timer = lower_to_lmqt(group.group_timer, lmqt, now, timers, |timers| {
        timers.set(
            now,
            lmqt,
            TimerEvent::GroupExpiry {
                iface: iface_id,
                group: group_addr,
            },
        )
    });
    group.retransmit_count = lmqc.saturating_sub(1);
    group.scheduled = true;
    arm_retransmit_timer(group, iface_id, group_addr, lmqi, now, timers);
    OutgoingQuery::Group {
        iface: iface_id,
        group: group_addr,
        suppress: false,
    }
}

/// Q(G,S): request confirmation that any downstream receiver still wants
/// `sources` of `group_addr`. Same per-source lowering/scheduling as
/// [`request_group_query`], applied to each named source.
pub fn request_source_query(
    group: &mut Group,
    iface_id: IfaceId,
    group_addr: Ipv4Addr,
    sources: &[Ipv4Addr],
    lmqt: Duration,
    lmqi: Duration,
    lmqc: u32,
    now: Instant,
    timers: &mut dyn Timers<TimerEvent>,
) -> OutgoingQuery {
    for &addr in sources {
        if let Some(source) = group.source_lookup_mut(addr) {
            source.timer = lower_to_lmqt(source.timer, lmqt, now, timers, |timers| {
                timers.set(
                    now,
                    lmqt,
                    TimerEvent::SourceExpiry {
                        iface: iface_id,
                        group: group_addr,
                        source: addr,
                    },
                )
            });
            source.scheduled = true;
            source.retransmit_count = lmqc.saturating_sub(1);
        }
    }
    arm_retransmit_timer(group, iface_id, group_addr, lmqi, now, timers);
    OutgoingQuery::GroupSource {
        iface: iface_id,
        group: group_addr,
        sources: sources.to_vec(),
        suppress: false,
    }
}

/// Convenience wrapper over [`request_group_query`] for callers (e.g.
/// `report::accept_v2_leave`) that only have the owning `Interface`, not
/// already a borrowed `Group`.
pub fn schedule_group_query(
    iface: &mut Interface,
    iface_id: IfaceId,
    group_addr: Ipv4Addr,
    now: Instant,
    timers: &mut dyn Timers<TimerEvent>,
) -> Option<OutgoingQuery> {
    let lmqt = iface.lmqt();
    let lmqi = iface.last_member_query_interval;
    let lmqc = iface.last_member_query_count;
    let group = iface.group_lookup_mut(group_addr)?;
    Some(request_group_query(
        group, iface_id, group_addr, lmqt, lmqi, lmqc, now, timers,
    ))
}

/// (Re)arm the next general-query timer, choosing `startup_query_interval`
/// while `startup_queries_remaining > 0` and `query_interval` in steady
/// state (RFC 3376 §4.1: "a multicast router that has not yet determined a
/// Querier is present for a link uses the shorter interval").
fn arm_next_general_query(
    iface: &mut Interface,
    iface_id: IfaceId,
    now: Instant,
    timers: &mut dyn Timers<TimerEvent>,
) {
    if let Some(handle) = iface.query_timer.take() {
        timers.clear(handle);
    }
    let delay = if iface.startup_queries_remaining > 0 {
        iface.startup_query_interval
    } else {
        iface.query_interval
    };
    iface.query_timer = Some(timers.set(now, delay, TimerEvent::GeneralQuery { iface: iface_id }));
}

/// Timer callback: an interface's general-query timer fired. Only the
/// querier ever originates a query; a disabled/non-querier/loopback
/// interface silently lets the timer lapse (it should never have been armed
/// for one, but this makes the invariant "only the querier transmits"
/// robust to a stale timer outliving a querier-role change).
pub fn general_query_fire(
    proxy: &mut Proxy,
    now: Instant,
    iface_id: IfaceId,
    timers: &mut dyn Timers<TimerEvent>,
) {
    let Some(iface) = proxy.interfaces.get_mut(iface_id) else {
        return;
    };
    if !iface.is_querier || iface.loopback || iface.role != Role::Downstream {
        return;
    }
    if iface.startup_queries_remaining > 0 {
        iface.startup_queries_remaining -= 1;
    }
    arm_next_general_query(iface, iface_id, now, timers);
    proxy.pending_queries.push(OutgoingQuery::General { iface: iface_id });
}

/// Kick off the startup query burst on every downstream interface (all of
/// which begin as querier, per `Interface::new`). Called once, right after
/// `Proxy::from_config`.
pub fn start_queriers(proxy: &mut Proxy, now: Instant, timers: &mut dyn Timers<TimerEvent>) {
    for id in proxy.interfaces.downstream_ids() {
        general_query_fire(proxy, now, id, timers);
    }
}

/// Timer callback: `other_querier_present_timer` expired with no further
/// queries observed from the lower-addressed querier. Reclaims the querier
/// role and emits a general query immediately (scenario: "After 255s
/// without further queries, reclaims querier role and emits a general
/// query").
pub fn other_querier_expired(
    proxy: &mut Proxy,
    now: Instant,
    iface_id: IfaceId,
    timers: &mut dyn Timers<TimerEvent>,
) {
    {
        let Some(iface) = proxy.interfaces.get_mut(iface_id) else {
            return;
        };
        iface.other_querier_timer = None;
        iface.is_querier = true;
        // Reclaiming is not a fresh startup: go straight to steady state.
        iface.startup_queries_remaining = 0;
        crate::net_debug!("reclaiming querier role on {}", iface.name);
    }
    general_query_fire(proxy, now, iface_id, timers);
}

/// A general query was received on `iface_id` from `src`. Implements
/// querier election (RFC 3376 §6.6.1/§8.2, lowest IPv4 address wins): a
/// query from a numerically lower address cedes the querier role and arms
/// `other_querier_present_timer`; a query from a higher or equal address is
/// ignored (we already are, or remain, querier).
pub fn accept_general_query(
    proxy: &mut Proxy,
    iface_id: IfaceId,
    src: Ipv4Addr,
    now: Instant,
    timers: &mut dyn Timers<TimerEvent>,
) {
    let Some(iface) = proxy.interfaces.get_mut(iface_id) else {
        return;
    };
    if iface.role != Role::Downstream || iface.loopback {
        return;
    }
    if u32::from(src) >= u32::from(iface.addr) {
        return;
    }
    if iface.is_querier {
        iface.is_querier = false;
        if let Some(handle) = iface.query_timer.take() {
            timers.clear(handle);
        }
        crate::net_debug!(
            "ceding querier role on {} to {} (lower address)",
            iface.name,
            src
        );
    }
    let oqpi = iface.oqpi();
    if let Some(handle) = iface.other_querier_timer.take() {
        timers.clear(handle);
    }
    iface.other_querier_timer = Some(timers.set(
        now,
        oqpi,
        TimerEvent::OtherQuerierExpiry { iface: iface_id },
    ));
}

/// Timer callback: a group's combined retransmission scheduler fired.
///
/// Per §4.4: if the group itself is still scheduled, re-send Q(G) and
/// decrement its counter. Then, for every scheduled source, classify by its
/// *current* remaining timer — sources already at or under LMQT go in the
/// "S-flag-clear" batch (no suppression needed; they're already converging),
/// the rest in the "S-flag-set" batch (suppress other routers' own
/// last-member processing) — emit each non-empty batch, and decrement. The
/// timer is re-armed only if anything (group or any source) still has
/// retransmissions left.
pub fn retransmit_fire(
    proxy: &mut Proxy,
    now: Instant,
    iface_id: IfaceId,
    group_addr: Ipv4Addr,
    timers: &mut dyn Timers<TimerEvent>,
    _kernel: &mut dyn crate::kernel::KernelRouter,
) {
    let Some(iface) = proxy.interfaces.get_mut(iface_id) else {
        return;
    };
    let lmqt = iface.lmqt();
    let lmqi = iface.last_member_query_interval;
    let Some(group) = iface.group_lookup_mut(group_addr) else {
        return;
    };
    group.query_timer = None;

    let mut still_pending = false;

    if group.scheduled && group.retransmit_count > 0 {
        proxy.pending_queries.push(OutgoingQuery::Group {
            iface: iface_id,
            group: group_addr,
            suppress: false,
        });
        group.retransmit_count -= 1;
        if group.retransmit_count == 0 {
            group.scheduled = false;
        } else {
            still_pending = true;
        }
    }

    let mut clear_flag_batch = Vec::new();
    let mut set_flag_batch = Vec::new();
    for source in group.sources_mut() {
        if !source.scheduled {
            continue;
        }
        let remaining = source
            .timer
            .and_then(|h| timers.left(now, h))
            .unwrap_or(Duration::from_secs(0));
        if remaining <= lmqt {
            clear_flag_batch.push(source.addr);
        } else {
            set_flag_batch.push(source.addr);
        }
        source.retransmit_count = source.retransmit_count.saturating_sub(1);
        if source.retransmit_count == 0 {
            source.scheduled = false;
        } else {
            still_pending = true;
        }
    }
    if !clear_flag_batch.is_empty() {
        proxy.pending_queries.push(OutgoingQuery::GroupSource {
            iface: iface_id,
            group: group_addr,
            sources: clear_flag_batch,
            suppress: false,
        });
    }
    if !set_flag_batch.is_empty() {
        proxy.pending_queries.push(OutgoingQuery::GroupSource {
            iface: iface_id,
            group: group_addr,
            sources: set_flag_batch,
            suppress: true,
        });
    }

    if still_pending {
        group.query_timer = Some(timers.set(
            now,
            lmqi,
            TimerEvent::RetransmitQuery {
                iface: iface_id,
                group: group_addr,
            },
        ));
    }
}
