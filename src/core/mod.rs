//! The core: C1–C5, wired together into one `Proxy` value owned by the
//! event loop.
//!
//! The original source's global tables (`member_database`, `query_database`,
//! `upStreamVif`) become fields of an explicit value rather than
//! process-wide globals; `Proxy` is that value, in the same spirit as
//! `smoltcp`'s `Interface`/`SocketSet` pair
//! (`src/iface/socket_set.rs`) being owned and threaded through by the
//! caller rather than reached for as ambient state.

pub mod aggregate;
pub mod iface;
pub mod query;
pub mod report;
pub mod store;
#[cfg(test)]
pub mod testing;

use std::net::Ipv4Addr;

use crate::config::Config;
use crate::core::iface::{IfaceId, InterfaceTable};
use crate::core::report::OutgoingQuery;
use crate::error::CoreError;
use crate::kernel::KernelRouter;
use crate::timer::Timers;

/// Every kind of timer the core arms, tagged with the key needed to look the
/// owning record back up when it fires. `timer::Handle` is an opaque key
/// into a central callout queue; `TimerEvent` is the payload the queue hands
/// back on expiry so the event loop knows which record to re-look-up and
/// which component (source/group-timer expiry, query retransmission,
/// v1/v2 compatibility decay) to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// A source's GMI (or lowered last-member) timer expired: on an
    /// INCLUDE source this deletes the source.
    SourceExpiry {
        iface: IfaceId,
        group: Ipv4Addr,
        source: Ipv4Addr,
    },
    /// A group's EXCLUDE-state timer expired: any source still marked
    /// not-forwarding is removed, and the group reverts toward INCLUDE.
    GroupExpiry { iface: IfaceId, group: Ipv4Addr },
    /// `v1_host_timer` expired: no v1 traffic for `GMI`, compat may revert.
    V1HostExpiry { iface: IfaceId, group: Ipv4Addr },
    /// `v2_host_timer` expired: no v2 traffic for `GMI`.
    V2HostExpiry { iface: IfaceId, group: Ipv4Addr },
    /// The group's last-member retransmission scheduler is due to fire
    /// again.
    RetransmitQuery { iface: IfaceId, group: Ipv4Addr },
    /// An interface's general-query timer (startup or steady-state) fired.
    GeneralQuery { iface: IfaceId },
    /// `other_querier_present_timer` expired: reclaim the querier role.
    OtherQuerierExpiry { iface: IfaceId },
}

/// The fully wired-up core: C1 (interfaces/groups/sources all live inside
/// `interfaces`) plus C5's upstream membership database. C3/C4/C5's
/// operations are free functions in their respective modules that take
/// `&mut Proxy` plus the external collaborators (timers, kernel router) —
/// mirroring `Interface::poll(&mut self, device: &mut D, ...)` taking its
/// collaborators as explicit parameters rather than stashing them in `self`.
pub struct Proxy {
    pub interfaces: InterfaceTable,
    pub upstream: aggregate::MembershipDb,
    pub quickleave: bool,
    /// Queries arising from a timer firing rather than from processing a
    /// report, e.g. periodic general queries and last-member
    /// retransmissions. `Proxy::dispatch_timer` has no caller to hand these
    /// back to, so `query::*_fire` accumulate them here; the event loop
    /// drains them with [`Proxy::take_pending_queries`] after each
    /// `run_timers` call.
    pub pending_queries: Vec<OutgoingQuery>,
}

impl Proxy {
    pub fn new() -> Self {
        Proxy {
            interfaces: InterfaceTable::new(),
            upstream: aggregate::MembershipDb::new(),
            quickleave: false,
            pending_queries: Vec::new(),
        }
    }

    /// Build a `Proxy` from a parsed config plus the (out-of-scope)
    /// interface-discovery collaborator's resolved addresses.
    ///
    /// `resolve` maps a configured interface name to its current IPv4
    /// address and whether it is a loopback device; in production this is
    /// backed by `getifaddrs(3)`, in tests by a fixed table.
    pub fn from_config(
        config: &Config,
        mut resolve: impl FnMut(&str) -> Option<(Ipv4Addr, bool)>,
    ) -> Result<Self, CoreError> {
        let mut proxy = Proxy::new();
        proxy.quickleave = config.quickleave;
        for phyint in &config.phyints {
            let (addr, loopback) = resolve(&phyint.name).ok_or(CoreError::NoSuchInterface)?;
            proxy.interfaces.add(phyint, addr, loopback)?;
        }
        Ok(proxy)
    }

    /// Kick off the startup general-query burst on every downstream
    /// interface. Call once after construction, before the event loop starts
    /// polling sockets.
    pub fn start(&mut self, now: crate::time::Instant, timers: &mut dyn Timers<TimerEvent>) {
        query::start_queriers(self, now, timers);
    }

    /// Drain and return every query accumulated by a timer firing since the
    /// last call.
    pub fn take_pending_queries(&mut self) -> Vec<OutgoingQuery> {
        std::mem::take(&mut self.pending_queries)
    }

    /// Advance every interface's and group's timers past `now`, dispatching
    /// each fired event to the component that owns it. This is the "callout
    /// service, invoking each fired event's handler inline.
    pub fn run_timers(
        &mut self,
        now: crate::time::Instant,
        timers: &mut dyn Timers<TimerEvent>,
        kernel: &mut dyn KernelRouter,
    ) {
        for event in timers.age(now) {
            self.dispatch_timer(now, event, timers, kernel);
        }
    }

    fn dispatch_timer(
        &mut self,
        now: crate::time::Instant,
        event: TimerEvent,
        timers: &mut dyn Timers<TimerEvent>,
        kernel: &mut dyn KernelRouter,
    ) {
        match event {
            TimerEvent::SourceExpiry { iface, group, source } => {
                report::source_timer_expired(self, iface, group, source, timers, kernel);
            }
            TimerEvent::GroupExpiry { iface, group } => {
                report::group_timer_expired(self, iface, group, timers, kernel);
            }
            TimerEvent::V1HostExpiry { iface, group } => {
                report::v1_host_timer_expired(self, iface, group);
            }
            TimerEvent::V2HostExpiry { iface, group } => {
                report::v2_host_timer_expired(self, iface, group);
            }
            TimerEvent::RetransmitQuery { iface, group } => {
                query::retransmit_fire(self, now, iface, group, timers, kernel);
            }
            TimerEvent::GeneralQuery { iface } => {
                query::general_query_fire(self, now, iface, timers);
            }
            TimerEvent::OtherQuerierExpiry { iface } => {
                query::other_querier_expired(self, now, iface, timers);
            }
        }
    }
}

impl Default for Proxy {
    fn default() -> Self {
        Self::new()
    }
}
