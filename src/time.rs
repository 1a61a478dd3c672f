//! Time handling.
//!
//! The core never reads the system clock directly: every entry point that
//! can trigger a state change takes the current time as a `now: Instant`
//! parameter, the same discipline smoltcp uses for `Interface::poll` and the
//! per-protocol `process_*`/`igmp_egress` methods (see
//! `src/iface/interface/igmp.rs`). This keeps the whole core deterministic
//! and replayable from a test harness that supplies its own clock.
//!
//! Unlike smoltcp, this crate is std-only (it shells out to raw sockets and
//! kernel ioctls), so there's no need for a hand-rolled `Instant`/`Duration`
//! pair that also has to work on bare metal; we re-export `std::time`'s.

pub use std::time::{Duration, Instant};

/// Convenience conversions between IGMPv3's "deciseconds" wire unit (used
/// by QQIC/max-resp-code and by `igmpproxy.conf`'s `lastMemberQueryInterval`)
/// and [`Duration`].
pub fn deciseconds(ds: u32) -> Duration {
    Duration::from_millis(u64::from(ds) * 100)
}

pub fn as_deciseconds(d: Duration) -> u32 {
    (d.as_millis() / 100) as u32
}
