//! Linux `MRT_*`/`IP_MSFILTER` socket-option backed [`KernelRouter`].
//!
//! `<linux/mroute.h>`'s `struct mfcctl` and `<linux/in.h>`'s
//! `struct ip_msfilter` aren't exposed by the `libc` crate (they're
//! Linux-specific, not POSIX), so they're declared here the same way
//! smoltcp declares the handful of `AF_PACKET`/`SIOCGIFMTU` shapes its
//! `libc`-backed device code needs that aren't in the crate either.

use std::io;
use std::net::Ipv4Addr;
use std::os::unix::io::{AsRawFd, RawFd};

use crate::error::KernelError;
use crate::kernel::{FilterMode, KernelRouter};

const MAXVIFS: usize = 32;

const IPPROTO_IP: libc::c_int = libc::IPPROTO_IP;
const MRT_BASE: libc::c_int = 200;
const MRT_INIT: libc::c_int = MRT_BASE;
const MRT_DONE: libc::c_int = MRT_BASE + 1;
const MRT_ADD_VIF: libc::c_int = MRT_BASE + 2;
const MRT_DEL_VIF: libc::c_int = MRT_BASE + 3;
const MRT_ADD_MFC: libc::c_int = MRT_BASE + 4;
const MRT_DEL_MFC: libc::c_int = MRT_BASE + 5;
/// Not in the `libc` crate's generic `IP_*` constant set (platform-specific).
const IP_MSFILTER: libc::c_int = 41;
const MCAST_INCLUDE: u32 = 1;
const MCAST_EXCLUDE: u32 = 2;

const VIFF_REGISTER: u8 = 0x04;

/// `struct vifctl` (`<linux/mroute.h>`).
#[repr(C)]
struct VifCtl {
    vifc_vifi: u16,
    vifc_flags: u8,
    vifc_threshold: u8,
    vifc_rate_limit: u32,
    vifc_lcl_addr: libc::in_addr,
    vifc_rmt_addr: libc::in_addr,
}

/// `struct mfcctl` (`<linux/mroute.h>`).
#[repr(C)]
struct MfcCtl {
    mfcc_origin: libc::in_addr,
    mfcc_mcastgrp: libc::in_addr,
    mfcc_parent: u16,
    mfcc_ttls: [u8; MAXVIFS],
}

/// `struct ip_msfilter` (`<linux/in.h>`), sized for up to 32 source
/// addresses; `imsf_numsrc` may legitimately be less.
#[repr(C)]
struct IpMsfilter {
    imsf_multiaddr: libc::in_addr,
    imsf_interface: libc::in_addr,
    imsf_fmode: u32,
    imsf_numsrc: u32,
    imsf_slist: [libc::in_addr; MAXVIFS],
}

fn in_addr(addr: Ipv4Addr) -> libc::in_addr {
    libc::in_addr {
        s_addr: u32::from(addr).to_be(),
    }
}

fn setsockopt_raw<T>(fd: RawFd, optname: libc::c_int, value: &T) -> io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            IPPROTO_IP,
            optname,
            value as *const T as *const libc::c_void,
            std::mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn kernel_err(action: &'static str, err: io::Error) -> KernelError {
    KernelError {
        action,
        errno: err.raw_os_error().unwrap_or(-1),
    }
}

/// Owns the raw IGMP socket used both to receive IGMP packets and to carry
/// `MRT_*` socket options, per `mcgroup.c`'s single `MRouterFD`.
pub struct LinuxKernelRouter {
    fd: RawFd,
}

impl LinuxKernelRouter {
    /// Open a raw IGMP socket and enable multicast routing on it
    /// (`MRT_INIT`). Requires `CAP_NET_ADMIN`.
    ///
    /// `IP_HDRINCL` is set so the hand-built headers `wire::ipv4::build_header`
    /// produces (Router Alert option included, per §6) go out on the wire
    /// exactly as constructed instead of being wrapped in a second,
    /// kernel-generated IP header.
    pub fn open() -> Result<Self, KernelError> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_IGMP) };
        if fd < 0 {
            return Err(kernel_err("socket", io::Error::last_os_error()));
        }
        let enable: libc::c_int = 1;
        setsockopt_raw(fd, MRT_INIT, &enable).map_err(|e| kernel_err("MRT_INIT", e))?;
        setsockopt_raw(fd, libc::IP_HDRINCL, &enable).map_err(|e| kernel_err("IP_HDRINCL", e))?;
        Ok(LinuxKernelRouter { fd })
    }

    /// Register `vif` as a VIF at kernel index `vif_index`, bound to
    /// `local_addr`. `threshold` is the TTL threshold below which packets on
    /// this VIF are not forwarded.
    pub fn add_vif(
        &mut self,
        vif_index: u16,
        local_addr: Ipv4Addr,
        threshold: u8,
        rate_limit: u32,
        is_register_vif: bool,
    ) -> Result<(), KernelError> {
        let ctl = VifCtl {
            vifc_vifi: vif_index,
            vifc_flags: if is_register_vif { VIFF_REGISTER } else { 0 },
            vifc_threshold: threshold,
            vifc_rate_limit: rate_limit,
            vifc_lcl_addr: in_addr(local_addr),
            vifc_rmt_addr: in_addr(Ipv4Addr::UNSPECIFIED),
        };
        setsockopt_raw(self.fd, MRT_ADD_VIF, &ctl).map_err(|e| kernel_err("MRT_ADD_VIF", e))
    }

    pub fn del_vif(&mut self, vif_index: u16) -> Result<(), KernelError> {
        setsockopt_raw(self.fd, MRT_DEL_VIF, &vif_index).map_err(|e| kernel_err("MRT_DEL_VIF", e))
    }
}

impl AsRawFd for LinuxKernelRouter {
    /// The raw IGMP socket backing both `MRT_*`/`IP_MSFILTER` socket options
    /// and ordinary IGMP packet receive/transmit, per `mcgroup.c`'s single
    /// `MRouterFD` — the event loop reads and writes IGMP packets on this
    /// same descriptor.
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl KernelRouter for LinuxKernelRouter {
    fn add_route(
        &mut self,
        group: Ipv4Addr,
        source: Ipv4Addr,
        parent: u32,
        children: &[u32],
    ) -> Result<(), KernelError> {
        let mut ttls = [0u8; MAXVIFS];
        for &vif in children {
            if let Some(slot) = ttls.get_mut(vif as usize) {
                *slot = 1;
            }
        }
        let ctl = MfcCtl {
            mfcc_origin: in_addr(source),
            mfcc_mcastgrp: in_addr(group),
            mfcc_parent: parent as u16,
            mfcc_ttls: ttls,
        };
        setsockopt_raw(self.fd, MRT_ADD_MFC, &ctl).map_err(|e| kernel_err("MRT_ADD_MFC", e))
    }

    fn del_route(&mut self, group: Ipv4Addr, source: Ipv4Addr) -> Result<(), KernelError> {
        let ctl = MfcCtl {
            mfcc_origin: in_addr(source),
            mfcc_mcastgrp: in_addr(group),
            mfcc_parent: 0,
            mfcc_ttls: [0; MAXVIFS],
        };
        setsockopt_raw(self.fd, MRT_DEL_MFC, &ctl).map_err(|e| kernel_err("MRT_DEL_MFC", e))
    }

    fn set_source_filter(
        &mut self,
        group: Ipv4Addr,
        iface_addr: Ipv4Addr,
        mode: FilterMode,
        sources: &[Ipv4Addr],
    ) -> Result<(), KernelError> {
        let mut slist = [in_addr(Ipv4Addr::UNSPECIFIED); MAXVIFS];
        let numsrc = sources.len().min(MAXVIFS);
        for (slot, addr) in slist.iter_mut().zip(sources.iter()) {
            *slot = in_addr(*addr);
        }
        let filter = IpMsfilter {
            imsf_multiaddr: in_addr(group),
            imsf_interface: in_addr(iface_addr),
            imsf_fmode: match mode {
                FilterMode::Include => MCAST_INCLUDE,
                FilterMode::Exclude => MCAST_EXCLUDE,
            },
            imsf_numsrc: numsrc as u32,
            imsf_slist: slist,
        };
        setsockopt_raw(self.fd, IP_MSFILTER, &filter).map_err(|e| kernel_err("IP_MSFILTER", e))
    }
}

impl Drop for LinuxKernelRouter {
    fn drop(&mut self) {
        let enable: libc::c_int = 1;
        let _ = setsockopt_raw(self.fd, MRT_DONE, &enable);
        unsafe {
            libc::close(self.fd);
        }
    }
}
