//! Test doubles for the timer and kernel collaborators, so C3/C4/C5's
//! transition logic can be exercised without a real clock or a real
//! multicast-routing socket. Grounded on smoltcp's own testing style: its
//! socket tests drive an `Interface` with a fixed `Instant` rather than
//! `Instant::now()`, and its device tests use an in-memory `Loopback`
//! (`src/phy/loopback.rs`) instead of a real NIC.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::core::TimerEvent;
use crate::error::KernelError;
use crate::kernel::{FilterMode, KernelRouter};
use crate::time::{Duration, Instant};
use crate::timer::{CalloutQueue, Handle, Timers};

/// A `Timers<TimerEvent>` double backed by the real `CalloutQueue`, so tests
/// exercise the production scheduling logic while controlling "now"
/// themselves instead of reading the system clock.
pub struct FakeTimers {
    queue: CalloutQueue<TimerEvent>,
}

impl FakeTimers {
    pub fn new() -> Self {
        FakeTimers {
            queue: CalloutQueue::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for FakeTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl Timers<TimerEvent> for FakeTimers {
    fn set(&mut self, now: Instant, delay: Duration, event: TimerEvent) -> Handle {
        self.queue.set(now, delay, event)
    }

    fn clear(&mut self, handle: Handle) {
        self.queue.clear(handle)
    }

    fn left(&self, now: Instant, handle: Handle) -> Option<Duration> {
        self.queue.left(now, handle)
    }

    fn in_queue(&self, handle: Handle) -> bool {
        self.queue.in_queue(handle)
    }

    fn age(&mut self, now: Instant) -> Vec<TimerEvent> {
        self.queue.age(now)
    }
}

/// One recorded call into the kernel collaborator, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelCall {
    AddRoute {
        group: Ipv4Addr,
        source: Ipv4Addr,
        parent: u32,
        children: Vec<u32>,
    },
    DelRoute {
        group: Ipv4Addr,
        source: Ipv4Addr,
    },
    SetSourceFilter {
        group: Ipv4Addr,
        iface_addr: Ipv4Addr,
        mode: FilterMode,
        sources: Vec<Ipv4Addr>,
    },
}

/// A `KernelRouter` double that just records every call instead of touching
/// `/proc/net` or issuing `setsockopt(2)`.
#[derive(Default)]
pub struct FakeKernelRouter {
    pub calls: Vec<KernelCall>,
    pub fail_next: bool,
    filters: HashMap<Ipv4Addr, (Ipv4Addr, FilterMode, Vec<Ipv4Addr>)>,
}

impl FakeKernelRouter {
    pub fn new() -> Self {
        FakeKernelRouter::default()
    }

    pub fn current_filter(&self, group: Ipv4Addr) -> Option<(Ipv4Addr, FilterMode, &[Ipv4Addr])> {
        self.filters
            .get(&group)
            .map(|(iface_addr, mode, sources)| (*iface_addr, *mode, sources.as_slice()))
    }
}

impl KernelRouter for FakeKernelRouter {
    fn add_route(
        &mut self,
        group: Ipv4Addr,
        source: Ipv4Addr,
        parent: u32,
        children: &[u32],
    ) -> Result<(), KernelError> {
        if self.fail_next {
            self.fail_next = false;
            return Err(KernelError {
                action: "add_route",
                errno: libc::EINVAL,
            });
        }
        self.calls.push(KernelCall::AddRoute {
            group,
            source,
            parent,
            children: children.to_vec(),
        });
        Ok(())
    }

    fn del_route(&mut self, group: Ipv4Addr, source: Ipv4Addr) -> Result<(), KernelError> {
        self.calls.push(KernelCall::DelRoute { group, source });
        Ok(())
    }

    fn set_source_filter(
        &mut self,
        group: Ipv4Addr,
        iface_addr: Ipv4Addr,
        mode: FilterMode,
        sources: &[Ipv4Addr],
    ) -> Result<(), KernelError> {
        self.filters
            .insert(group, (iface_addr, mode, sources.to_vec()));
        self.calls.push(KernelCall::SetSourceFilter {
            group,
            iface_addr,
            mode,
            sources: sources.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_timers_round_trips_through_the_real_queue() {
        let mut timers = FakeTimers::new();
        let now = Instant::now();
        let iface = crate::core::iface::IfaceId(0);
        let group = Ipv4Addr::new(239, 1, 1, 1);
        let handle = timers.set(
            now,
            Duration::from_secs(1),
            TimerEvent::GeneralQuery { iface },
        );
        assert!(timers.in_queue(handle));
        assert_eq!(
            timers.age(now + Duration::from_secs(2)),
            vec![TimerEvent::GeneralQuery { iface }]
        );
        assert!(timers.is_empty());
        let _ = group;
    }

    #[test]
    fn fake_kernel_router_records_calls() {
        let mut kernel = FakeKernelRouter::new();
        let group = Ipv4Addr::new(239, 1, 1, 1);
        let source = Ipv4Addr::new(10, 0, 0, 1);
        kernel.add_route(group, source, 0, &[1, 2]).unwrap();
        assert_eq!(kernel.calls.len(), 1);
    }

    #[test]
    fn fake_kernel_router_can_be_told_to_fail_once() {
        let mut kernel = FakeKernelRouter::new();
        kernel.fail_next = true;
        let group = Ipv4Addr::new(239, 1, 1, 1);
        let source = Ipv4Addr::new(10, 0, 0, 1);
        assert!(kernel.add_route(group, source, 0, &[]).is_err());
        assert!(kernel.add_route(group, source, 0, &[]).is_ok());
    }
}
