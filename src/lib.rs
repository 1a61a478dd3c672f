//! An IGMPv3 multicast-proxy daemon library: the router state machine and
//! upstream aggregator that `src/bin/igmpproxy.rs` drives from a socket event
//! loop.
//!
//! Laid out the way this crate's teacher lays out its own protocol stack
//! (`src/wire` as a standalone on-the-wire concern under one crate root):
//! `wire` is the on-the-wire IGMP/IPv4 collaborator, `core` is C1–C5,
//! `kernel` and `timer` are the two external collaborators the core depends
//! on, `config` turns a config file into the value `core::Proxy::from_config`
//! consumes.

#[macro_use]
mod macros;

pub mod config;
pub mod core;
pub mod error;
pub mod kernel;
pub mod syslog;
pub mod time;
pub mod timer;
pub mod wire;

pub(crate) use macros::{check, net_debug, net_trace};
