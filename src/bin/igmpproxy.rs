//! `igmpproxy [-n] [-d] [-v[v]] <configfile>`: parses the CLI and config
//! file, discovers interface addresses, wires up a [`igmpproxy::core::Proxy`],
//! and drives it from a single-threaded event loop multiplexing the raw IGMP
//! socket and the callout queue — §5's "central event loop" — exactly as
//! `examples/*.rs` in this crate's teacher repo build a `Device`/`Interface`
//! pair and drive it from a plain `loop { }` around `poll`/`recv`/`send`.
//!
//! Grounded on `igmpproxy.c`'s `main`/argument-parsing and `request.c`'s
//! `sendGeneralMembershipQuery` framing, rebuilt around `getopts` (already an
//! smoltcp dev-dependency, promoted here to a normal one) and this crate's
//! own `KernelRouter`/`Timers` collaborators rather than direct global state.

use std::net::Ipv4Addr;
use std::os::unix::io::AsRawFd;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use getopts::Options;
use log::LevelFilter;

use igmpproxy::config::{Config, DEFAULT_CONFIG_PATH};
use igmpproxy::core::iface::Role;
use igmpproxy::core::report::OutgoingQuery;
use igmpproxy::core::{aggregate, query, report, Proxy, TimerEvent};
use igmpproxy::kernel::linux::LinuxKernelRouter;
use igmpproxy::kernel::KernelRouter;
use igmpproxy::timer::{CalloutQueue, Timers};
use igmpproxy::time::Instant;
use igmpproxy::wire::{self, igmp, ipv4};

const ALL_ROUTERS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 2);

/// `IGMPMSG_NOCACHE` from `<linux/mroute.h>`: the kernel has no MFC entry for
/// an observed `(origin, group)` pair and is asking userspace to decide.
const IGMPMSG_NOCACHE: u8 = 1;

/// Set by `handle_shutdown_signal`, polled once per event-loop iteration.
/// §6: "Exit codes: 0 normal shutdown on SIGINT/SIGTERM" — a plain
/// signal-safe flag plus a poll timeout bound is the same shape
/// `igmpproxy.c`'s own `sigHandler` uses (set a flag, let the main loop
/// notice it between blocking calls) rather than doing any work inside the
/// handler itself.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_shutdown_signal(_signum: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, handle_shutdown_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_shutdown_signal as libc::sighandler_t);
    }
}

struct Cli {
    foreground: bool,
    debug: bool,
    verbosity: u8,
    config_path: String,
}

fn parse_args() -> Result<Cli, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut opts = Options::new();
    opts.optflag("n", "", "do not fork into the background");
    opts.optflag("d", "", "debug: log to stderr instead of syslog");
    opts.optflagmulti("v", "", "increase log verbosity (repeatable)");
    opts.optflag("h", "help", "print usage and exit");
    let matches = opts.parse(&args[1..]).map_err(|e| e.to_string())?;

    if matches.opt_present("h") {
        print!("{}", opts.usage(&format!("Usage: {} [-n] [-d] [-v[v]] <configfile>", args[0])));
        std::process::exit(0);
    }
    let config_path = matches
        .free
        .first()
        .cloned()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    Ok(Cli {
        foreground: matches.opt_present("n"),
        debug: matches.opt_present("d"),
        verbosity: matches.opt_count("v") as u8,
        config_path,
    })
}

/// Fork into the background unless `-n` was given, per §6's CLI contract.
/// The parent exits immediately with success; the child detaches from its
/// controlling terminal (`setsid`) and moves to `/` so it doesn't pin
/// whatever filesystem it was started from. Must run before any socket or
/// timer state is created — a fork after that point would duplicate fds the
/// parent then leaks on exit.
fn daemonize() {
    unsafe {
        match libc::fork() {
            -1 => {
                eprintln!("fork: {}", std::io::Error::last_os_error());
                std::process::exit(1);
            }
            0 => {
                if libc::setsid() == -1 {
                    eprintln!("setsid: {}", std::io::Error::last_os_error());
                    std::process::exit(1);
                }
                let _ = libc::chdir(std::ffi::CString::new("/").unwrap().as_ptr());
            }
            _ => std::process::exit(0),
        }
    }
}

fn install_logging(cli: &Cli) {
    let level = match cli.verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Trace,
    };
    if cli.debug || cli.foreground {
        env_logger::Builder::new().filter_level(level).init();
    } else if let Err(err) = igmpproxy::syslog::SyslogLogger::init("igmpproxy", level) {
        eprintln!("failed to install syslog logger: {err}");
    }
}

/// Resolve every configured interface's current IPv4 address via
/// `getifaddrs(3)`, the (out-of-scope per §1) interface-discovery
/// collaborator `core::Proxy::from_config` depends on.
fn discover_interfaces() -> std::collections::HashMap<String, (Ipv4Addr, bool)> {
    let mut found = std::collections::HashMap::new();
    unsafe {
        let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
        if libc::getifaddrs(&mut head) != 0 {
            return found;
        }
        let mut cur = head;
        while !cur.is_null() {
            let ifa = &*cur;
            if !ifa.ifa_addr.is_null() && (*ifa.ifa_addr).sa_family as i32 == libc::AF_INET {
                let sockaddr_in = &*(ifa.ifa_addr as *const libc::sockaddr_in);
                let addr = Ipv4Addr::from(u32::from_be(sockaddr_in.sin_addr.s_addr));
                let name = std::ffi::CStr::from_ptr(ifa.ifa_name)
                    .to_string_lossy()
                    .into_owned();
                let loopback = ifa.ifa_flags & (libc::IFF_LOOPBACK as u32) != 0;
                found.insert(name, (addr, loopback));
            }
            cur = ifa.ifa_next;
        }
        libc::freeifaddrs(head);
    }
    found
}

/// Render one query for transmission: `QueryRepr::emit` plus the IP framing
/// with the Router Alert option, splitting the source list across multiple
/// packets if it would otherwise exceed [`igmp::V3_QUERY_MAX_SOURCES`].
fn frame_query(src: Ipv4Addr, dst: Ipv4Addr, group: Ipv4Addr, suppress: bool, sources: &[Ipv4Addr]) -> Vec<Vec<u8>> {
    let chunks: Vec<&[Ipv4Addr]> = if sources.is_empty() {
        vec![&[]]
    } else {
        sources.chunks(igmp::V3_QUERY_MAX_SOURCES).collect()
    };
    chunks
        .into_iter()
        .map(|chunk| {
            let repr = igmp::QueryRepr {
                group,
                max_resp_code: igmp::encode_exp_time8(100),
                suppress,
                qrv: 2,
                qqic: igmp::encode_exp_time8(125),
                sources: chunk.to_vec(),
            };
            let payload = repr.emit();
            let header = ipv4::build_header(src, dst, payload.len(), 1);
            let mut packet = Vec::with_capacity(header.len() + payload.len());
            packet.extend_from_slice(&header);
            packet.extend_from_slice(&payload);
            packet
        })
        .collect()
}

fn send_query(fd: i32, proxy: &Proxy, out: OutgoingQuery) {
    let iface_id = match &out {
        OutgoingQuery::General { iface } => *iface,
        OutgoingQuery::Group { iface, .. } => *iface,
        OutgoingQuery::GroupSource { iface, .. } => *iface,
    };
    let Some(iface) = proxy.interfaces.get(iface_id) else {
        return;
    };
    if !iface.is_querier {
        return;
    }
    let (group, suppress, sources): (Ipv4Addr, bool, Vec<Ipv4Addr>) = match out {
        OutgoingQuery::General { .. } => (Ipv4Addr::UNSPECIFIED, false, Vec::new()),
        OutgoingQuery::Group { group, suppress, .. } => (group, suppress, Vec::new()),
        OutgoingQuery::GroupSource { group, suppress, sources, .. } => (group, suppress, sources),
    };
    let dst = if group.is_unspecified() { ALL_ROUTERS } else { group };
    for packet in frame_query(iface.addr, dst, group, suppress, &sources) {
        unsafe {
            let sockaddr = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: 0,
                sin_addr: libc::in_addr {
                    s_addr: u32::from(dst).to_be(),
                },
                sin_zero: [0; 8],
            };
            let ret = libc::sendto(
                fd,
                packet.as_ptr() as *const libc::c_void,
                packet.len(),
                0,
                &sockaddr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            );
            if ret < 0 {
                log::warn!("sendto({}) for query on {} failed: {}", dst, iface.name, std::io::Error::last_os_error());
            }
        }
    }
}

fn run() -> Result<(), ExitCode> {
    let cli = parse_args().map_err(|e| {
        eprintln!("{e}");
        ExitCode::from(2)
    })?;
    if !cli.foreground {
        daemonize();
    }
    install_logging(&cli);
    install_signal_handlers();

    let text = std::fs::read_to_string(&cli.config_path).map_err(|e| {
        log::error!("reading {}: {}", cli.config_path, e);
        ExitCode::from(1)
    })?;
    let config = Config::parse(&text).map_err(|e| {
        log::error!("{}: {}", cli.config_path, e);
        ExitCode::from(1)
    })?;

    let discovered = discover_interfaces();
    let mut proxy = Proxy::from_config(&config, |name| discovered.get(name).copied()).map_err(|e| {
        log::error!("building interface table: {}", e);
        ExitCode::from(1)
    })?;

    let mut kernel = LinuxKernelRouter::open().map_err(|e| {
        log::error!("opening multicast routing socket: {}", e);
        ExitCode::from(1)
    })?;
    for (_, iface) in proxy.interfaces.iter() {
        if iface.role == Role::Disabled {
            continue;
        }
        kernel
            .add_vif(iface.vif.0 as u16, iface.addr, iface.threshold, iface.ratelimit, false)
            .map_err(|e| {
                log::error!("registering VIF for {}: {}", iface.name, e);
                ExitCode::from(1)
            })?;
    }

    let mut timers: CalloutQueue<TimerEvent> = CalloutQueue::new();
    let now = Instant::now();
    proxy.start(now, &mut timers);

    let fd = kernel.as_raw_fd();
    for out in proxy.take_pending_queries() {
        send_query(fd, &proxy, out);
    }

    log::info!("igmpproxy started, config {}", cli.config_path);
    let mut recv_buf = vec![0u8; 2048];
    // A bound on how long a single `poll` call can block for: even with no
    // timer due, SIGINT/SIGTERM must be noticed promptly rather than only
    // after the next query/retransmission deadline.
    const MAX_POLL_MS: i32 = 1000;
    while !SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
        let now = Instant::now();
        let next_deadline = proxy
            .interfaces
            .iter()
            .filter_map(|(_, iface)| iface.query_timer.or(iface.other_querier_timer))
            .filter_map(|h| timers.left(now, h))
            .min()
            .unwrap_or(std::time::Duration::from_secs(1));

        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = (next_deadline.as_millis().min(i32::MAX as u128) as i32).clamp(0, MAX_POLL_MS);
        let ready = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            break;
        }
        if ready > 0 && pfd.revents & libc::POLLIN != 0 {
            let n = unsafe {
                libc::recv(fd, recv_buf.as_mut_ptr() as *mut libc::c_void, recv_buf.len(), 0)
            };
            if n > 0 {
                handle_packet(&mut proxy, &recv_buf[..n as usize], &mut timers, &mut kernel);
            }
        }

        let now = Instant::now();
        proxy.run_timers(now, &mut timers, &mut kernel);
        for out in proxy.take_pending_queries() {
            send_query(fd, &proxy, out);
        }
    }
    log::info!("igmpproxy shutting down");
    Ok(())
}

/// Dispatch one datagram read off the raw IGMP socket: either an actual
/// IGMP packet (normal `protocol = IPPROTO_IGMP` framing) or a kernel
/// data-driven upcall, distinguished the same way `mcgroup.c` does — the
/// upcall reuses the IP header's `protocol` byte position as zero.
fn handle_packet(
    proxy: &mut Proxy,
    buf: &[u8],
    timers: &mut CalloutQueue<TimerEvent>,
    kernel: &mut LinuxKernelRouter,
) {
    let Some((src, protocol, ihl)) = ipv4::parse_header(buf) else {
        return;
    };
    if protocol == 0 {
        handle_upcall(proxy, buf, kernel);
        return;
    }
    let Some(iface_id) = proxy.interfaces.by_addr(src).or_else(|| find_iface_for_src(proxy, src)) else {
        return;
    };
    let payload = &buf[ihl..];
    let Ok(packet) = wire::IgmpPacket::new_checked(payload) else {
        return;
    };
    let now = Instant::now();
    match packet.msg_type() {
        wire::igmp::TYPE_MEMBERSHIP_QUERY => {
            query::accept_general_query(proxy, iface_id, src, now, timers);
        }
        wire::igmp::TYPE_V1_MEMBERSHIP_REPORT => {
            let Some(group) = group_from_v1v2(payload) else { return };
            let out = report::accept_v1v2_report(
                proxy,
                iface_id,
                src,
                group,
                igmpproxy::core::store::CompatVersion::V1,
                now,
                timers,
                kernel,
            );
            proxy.pending_queries.extend(out);
        }
        wire::igmp::TYPE_V2_MEMBERSHIP_REPORT => {
            let Some(group) = group_from_v1v2(payload) else { return };
            let out = report::accept_v1v2_report(
                proxy,
                iface_id,
                src,
                group,
                igmpproxy::core::store::CompatVersion::V2,
                now,
                timers,
                kernel,
            );
            proxy.pending_queries.extend(out);
        }
        wire::igmp::TYPE_V2_LEAVE_GROUP => {
            let Some(group) = group_from_v1v2(payload) else { return };
            let out = report::accept_v2_leave(proxy, iface_id, src, group, now, timers, kernel);
            proxy.pending_queries.extend(out);
        }
        wire::igmp::TYPE_V3_MEMBERSHIP_REPORT => {
            if let Ok(parsed) = wire::ReportRepr::parse(payload) {
                let out =
                    report::accept_v3_report(proxy, iface_id, src, &parsed.records, now, timers, kernel);
                proxy.pending_queries.extend(out);
            }
        }
        _ => {}
    }
}

fn group_from_v1v2(payload: &[u8]) -> Option<Ipv4Addr> {
    if payload.len() < 8 {
        return None;
    }
    Some(Ipv4Addr::new(payload[4], payload[5], payload[6], payload[7]))
}

fn find_iface_for_src(proxy: &Proxy, src: Ipv4Addr) -> Option<igmpproxy::core::iface::IfaceId> {
    proxy
        .interfaces
        .iter()
        .find(|(_, iface)| iface.role == Role::Downstream && iface.is_address_valid_for(src))
        .map(|(id, _)| id)
}

/// `struct igmpmsg` (`<linux/mroute.h>`) overlays the first 20 bytes of what
/// would otherwise be an IP header: `im_msgtype` at offset 8, `im_vif` at
/// offset 10, `im_src`/`im_dst` at offsets 12/16.
fn handle_upcall(proxy: &mut Proxy, buf: &[u8], kernel: &mut LinuxKernelRouter) {
    if buf.len() < 20 || buf[8] != IGMPMSG_NOCACHE {
        return;
    }
    let origin = Ipv4Addr::new(buf[12], buf[13], buf[14], buf[15]);
    let group = Ipv4Addr::new(buf[16], buf[17], buf[18], buf[19]);
    aggregate::handle_data_upcall(proxy, group, origin, kernel);
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => code,
    }
}
