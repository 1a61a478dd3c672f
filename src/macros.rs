//! Small logging/control-flow macros used throughout the core.
//!
//! Grounded on the call sites in `src/iface/interface/{udp,tcp,igmp}.rs`
//! (`check!(...)`) and on `log::info!` used directly in
//! `src/iface/interface/tcp.rs` — this crate has no `net_trace!`/`net_debug!`
//! macro file in the retrieval pack, so these are written in the same style:
//! a thin wrapper around the `log` facade, plus a `check!` that implements
//! the "malformed input: drop, log, state unchanged" rule without an early
//! `return Err(..)` at every call site.

/// Evaluate `$e` (an `Option<T>` or `Result<T, E>`); on `None`/`Err`, log at
/// `warn` level and return from the enclosing function with `$ret` (or `()`
/// if omitted).
macro_rules! check {
    ($e:expr) => {
        check!($e, ())
    };
    ($e:expr, $ret:expr) => {
        match $e {
            Ok(x) => x,
            Err(err) => {
                log::warn!("{}", err);
                return $ret;
            }
        }
    };
}

macro_rules! net_trace {
    ($($arg:tt)*) => { log::trace!($($arg)*) };
}

macro_rules! net_debug {
    ($($arg:tt)*) => { log::debug!($($arg)*) };
}

pub(crate) use check;
pub(crate) use net_debug;
pub(crate) use net_trace;
