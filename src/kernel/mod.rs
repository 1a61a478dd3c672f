//! The kernel collaborator: programming the Linux multicast forwarding
//! cache (MFC) and the upstream socket's per-group source filter.
//!
//! Grounded on `igmpproxy.h`'s declared `addVIF`/`addMRoute` family (bodies
//! not present in the retrieval pack) for the operations this trait needs to
//! expose; the `MRT_*`/`IP_MSFILTER` struct layouts themselves
//! (`struct vifctl`, `struct mfcctl`, `struct ip_msfilter`) come from
//! `<linux/mroute.h>`/`<linux/in.h>` directly, not from the retrieval pack
//! (only a disabled `#if 0` `ip_msfilter` fragment appears there). Reworked
//! into one small trait so the core's aggregation logic (`core::aggregate`)
//! can be tested against `core::testing::FakeKernelRouter` instead of a real
//! socket, the same way smoltcp's `Device` trait lets `Interface::poll` run
//! against `phy::Loopback` in tests.

pub mod linux;

use std::net::Ipv4Addr;

use crate::error::KernelError;

/// Mode of the upstream socket's full-state source filter
/// (`IP_MSFILTER`'s `imsf_fmode`: `MCAST_INCLUDE`/`MCAST_EXCLUDE`).
/// Deliberately a separate type from `core::store::FilterMode` — this is the
/// wire/syscall-level vocabulary the kernel collaborator speaks, translated
/// from the core's own model at the aggregator boundary (`core::aggregate`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Include,
    Exclude,
}

/// The multicast-routing kernel's interface, as the core depends on it.
pub trait KernelRouter {
    /// Install or refresh an MFC entry forwarding `(source, group)` traffic
    /// received on `parent` out every VIF in `children`.
    fn add_route(
        &mut self,
        group: Ipv4Addr,
        source: Ipv4Addr,
        parent: u32,
        children: &[u32],
    ) -> Result<(), KernelError>;

    /// Remove the MFC entry for `(source, group)`.
    fn del_route(&mut self, group: Ipv4Addr, source: Ipv4Addr) -> Result<(), KernelError>;

    /// Replace the upstream socket's full-state source filter for `group`
    /// with exactly `(mode, sources)` (`IP_MSFILTER`). `iface_addr` is the
    /// local address of the upstream interface the filter applies to — the
    /// raw socket carrying this option isn't bound to one interface, so the
    /// kernel has no other way to tell which interface's filter to update.
    fn set_source_filter(
        &mut self,
        group: Ipv4Addr,
        iface_addr: Ipv4Addr,
        mode: FilterMode,
        sources: &[Ipv4Addr],
    ) -> Result<(), KernelError>;
}
